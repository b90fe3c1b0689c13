//! Kernel heap allocator (component A).
//!
//! Segregated free-list allocator over a bounded contiguous region: an
//! address-ordered doubly-linked chunk list bounded by two always-used
//! sentinel chunks, with 32 power-of-two size-class free lists threaded
//! through the same chunk headers. `alloc`/`free` are O(number of size
//! classes) and O(1) respectively (ignoring the linear first-fit scan
//! within a class).

#![allow(dead_code)]

use core::{
    alloc::{GlobalAlloc, Layout},
    mem::size_of,
    ptr::{self, NonNull},
};

use spin::Mutex;

/// Kernel heap size.
pub const HEAP_SIZE: usize = 1024 * 1024;

/// Number of size classes; class = floor(log2(payload_size)).
const NUM_CLASSES: usize = 32;

/// Minimum payload size: large enough to hold the free-list link fields
/// when a chunk is free (the header's `free_prev`/`free_next` alias the
/// payload region is not done here -- they live in the header itself -- but
/// we still enforce a floor so tiny allocations don't fragment the chunk
/// list into unusably small pieces).
const MIN_PAYLOAD: usize = size_of::<usize>() * 2;

const ALIGN: usize = 4;

#[repr(C)]
struct ChunkHeader {
    /// Payload size in bytes, excluding this header.
    size: usize,
    used: bool,
    addr_prev: *mut ChunkHeader,
    addr_next: *mut ChunkHeader,
    free_prev: *mut ChunkHeader,
    free_next: *mut ChunkHeader,
}

const HEADER_SIZE: usize = size_of::<ChunkHeader>();

fn class_of(payload_size: usize) -> usize {
    let bits = usize::BITS as usize - payload_size.max(1).leading_zeros() as usize - 1;
    bits.min(NUM_CLASSES - 1)
}

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Heap state: sentinels plus the 32 size-class free-list heads.
struct Heap {
    head_sentinel: *mut ChunkHeader,
    tail_sentinel: *mut ChunkHeader,
    free_lists: [*mut ChunkHeader; NUM_CLASSES],
    base: usize,
    size: usize,
}

// SAFETY: all access to `Heap` goes through `HEAP`'s spinlock; the raw
// pointers inside only ever point into the single backing array owned by
// this module.
unsafe impl Send for Heap {}

impl Heap {
    const fn empty() -> Self {
        Heap {
            head_sentinel: ptr::null_mut(),
            tail_sentinel: ptr::null_mut(),
            free_lists: [ptr::null_mut(); NUM_CLASSES],
            base: 0,
            size: 0,
        }
    }

    /// Lays out the initial sentinel-bounded, single-free-chunk heap over
    /// `[start, start+size)`. `start` must be at least 4-byte aligned.
    unsafe fn init(&mut self, start: *mut u8, size: usize) {
        self.base = start as usize;
        self.size = size;

        let head = start as *mut ChunkHeader;
        head.write(ChunkHeader {
            size: 0,
            used: true,
            addr_prev: ptr::null_mut(),
            addr_next: ptr::null_mut(),
            free_prev: ptr::null_mut(),
            free_next: ptr::null_mut(),
        });

        let free_start = start.add(HEADER_SIZE);
        let tail_addr = start.add(size).sub(HEADER_SIZE);
        let free_payload = tail_addr as usize - free_start as usize - HEADER_SIZE;

        let free_chunk = free_start as *mut ChunkHeader;
        free_chunk.write(ChunkHeader {
            size: free_payload,
            used: false,
            addr_prev: head,
            addr_next: tail_addr as *mut ChunkHeader,
            free_prev: ptr::null_mut(),
            free_next: ptr::null_mut(),
        });

        let tail = tail_addr as *mut ChunkHeader;
        tail.write(ChunkHeader {
            size: 0,
            used: true,
            addr_prev: free_chunk,
            addr_next: ptr::null_mut(),
            free_prev: ptr::null_mut(),
            free_next: ptr::null_mut(),
        });

        (*head).addr_next = free_chunk;

        self.head_sentinel = head;
        self.tail_sentinel = tail;
        let class = class_of(free_payload);
        self.free_list_push(class, free_chunk);
    }

    unsafe fn free_list_push(&mut self, class: usize, chunk: *mut ChunkHeader) {
        (*chunk).free_prev = ptr::null_mut();
        (*chunk).free_next = self.free_lists[class];
        if !self.free_lists[class].is_null() {
            (*self.free_lists[class]).free_prev = chunk;
        }
        self.free_lists[class] = chunk;
    }

    unsafe fn free_list_remove(&mut self, class: usize, chunk: *mut ChunkHeader) {
        if !(*chunk).free_prev.is_null() {
            (*(*chunk).free_prev).free_next = (*chunk).free_next;
        } else {
            self.free_lists[class] = (*chunk).free_next;
        }
        if !(*chunk).free_next.is_null() {
            (*(*chunk).free_next).free_prev = (*chunk).free_prev;
        }
        (*chunk).free_prev = ptr::null_mut();
        (*chunk).free_next = ptr::null_mut();
    }

    unsafe fn alloc(&mut self, requested: usize) -> *mut u8 {
        if requested == 0 {
            return ptr::null_mut();
        }
        let size = align_up(requested.max(MIN_PAYLOAD), ALIGN);
        let start_class = class_of(size);

        for class in start_class..NUM_CLASSES {
            let mut cursor = self.free_lists[class];
            while !cursor.is_null() {
                if (*cursor).size >= size {
                    self.free_list_remove(class, cursor);
                    self.split_and_use(cursor, size);
                    return (cursor as *mut u8).add(HEADER_SIZE);
                }
                cursor = (*cursor).free_next;
            }
        }
        ptr::null_mut()
    }

    /// Splits `chunk` if the remainder after serving `size` bytes is large
    /// enough to host its own header + minimum payload, then marks `chunk`
    /// used.
    unsafe fn split_and_use(&mut self, chunk: *mut ChunkHeader, size: usize) {
        let remainder = (*chunk).size - size;
        if remainder >= HEADER_SIZE + MIN_PAYLOAD {
            let new_chunk_addr = (chunk as *mut u8).add(HEADER_SIZE + size) as *mut ChunkHeader;
            let new_payload = remainder - HEADER_SIZE;
            new_chunk_addr.write(ChunkHeader {
                size: new_payload,
                used: false,
                addr_prev: chunk,
                addr_next: (*chunk).addr_next,
                free_prev: ptr::null_mut(),
                free_next: ptr::null_mut(),
            });
            (*(*chunk).addr_next).addr_prev = new_chunk_addr;
            (*chunk).addr_next = new_chunk_addr;
            (*chunk).size = size;

            let class = class_of(new_payload);
            self.free_list_push(class, new_chunk_addr);
        }
        (*chunk).used = true;
    }

    unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let mut chunk = ptr.sub(HEADER_SIZE) as *mut ChunkHeader;
        (*chunk).used = false;

        // Coalesce with the next chunk in address order, if free.
        let next = (*chunk).addr_next;
        if !next.is_null() && !(*next).used {
            self.free_list_remove(class_of((*next).size), next);
            (*chunk).size += HEADER_SIZE + (*next).size;
            (*chunk).addr_next = (*next).addr_next;
            (*(*chunk).addr_next).addr_prev = chunk;
        }

        // Coalesce with the previous chunk in address order, if free.
        let prev = (*chunk).addr_prev;
        if !prev.is_null() && !(*prev).used {
            self.free_list_remove(class_of((*prev).size), prev);
            (*prev).size += HEADER_SIZE + (*chunk).size;
            (*prev).addr_next = (*chunk).addr_next;
            (*(*prev).addr_next).addr_prev = prev;
            chunk = prev;
        }

        let class = class_of((*chunk).size);
        self.free_list_push(class, chunk);
    }
}

static mut HEAP_MEMORY: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

static HEAP: Mutex<Heap> = Mutex::new(Heap::empty());

/// Initializes the kernel heap over the static backing region. Must be
/// called exactly once, before any allocation (including any `alloc::`
/// container use) elsewhere in the kernel.
pub fn init() {
    log::info!("initializing kernel heap ({} bytes)", HEAP_SIZE);
    // SAFETY: `HEAP_MEMORY` is only ever accessed through this single
    // initialization call and then through the `Heap` it seeds.
    unsafe {
        let start = HEAP_MEMORY.as_mut_ptr();
        HEAP.lock().init(start, HEAP_SIZE);
    }
    log::info!("kernel heap initialized");
}

/// `#[global_allocator]`-compatible wrapper so `alloc::{Vec, BTreeMap, Box}`
/// used by the scheduler/futex/irq modules are served from this heap too.
pub struct KernelHeap;

unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // The chunk allocator always returns 4-byte aligned payloads; for the
        // rare caller requesting stricter alignment we over-allocate and
        // hand back null if we can't honor it from this simple allocator
        // (callers here never request more than pointer-size alignment).
        if layout.align() > ALIGN && layout.align() > size_of::<usize>() {
            return ptr::null_mut();
        }
        HEAP.lock().alloc(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        HEAP.lock().free(ptr);
    }
}

/// Raw allocate, usable outside of the `GlobalAlloc` path (e.g. by the frame
/// allocator's ref-count tables before `alloc::` containers are wired up).
pub fn alloc(size: usize) -> Option<NonNull<u8>> {
    // SAFETY: delegates to the locked heap; returns null on OOM/zero-size.
    let p = unsafe { HEAP.lock().alloc(size) };
    NonNull::new(p)
}

/// Raw free, paired with `alloc`.
pub fn free(ptr: NonNull<u8>) {
    // SAFETY: caller guarantees `ptr` came from `alloc` and hasn't been
    // freed already (double-free is explicitly undefined per spec).
    unsafe {
        HEAP.lock().free(ptr.as_ptr());
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn fresh_heap(size: usize) -> (Mutex<Heap>, Box<[u8]>) {
        let mut mem = vec![0u8; size].into_boxed_slice();
        let h = Mutex::new(Heap::empty());
        unsafe {
            h.lock().init(mem.as_mut_ptr(), size);
        }
        (h, mem)
    }

    #[test]
    fn test_alloc_zero_is_null() {
        let (h, _mem) = fresh_heap(4096);
        unsafe {
            assert!(h.lock().alloc(0).is_null());
        }
    }

    #[test]
    fn test_alloc_and_free_roundtrip() {
        let (h, _mem) = fresh_heap(64 * 1024);
        unsafe {
            let p = h.lock().alloc(128);
            assert!(!p.is_null());
            h.lock().free(p);
            // A second allocation of the same size must succeed, proving
            // the freed chunk was coalesced back in (no permanent loss).
            let p2 = h.lock().alloc(128);
            assert!(!p2.is_null());
        }
    }

    #[test]
    fn test_heap_stress_no_fragmentation_leak() {
        use std::vec::Vec;

        let (h, _mem) = fresh_heap(256 * 1024);
        let mut ptrs: Vec<(*mut u8, usize)> = Vec::new();
        let mut total = 0usize;
        let mut seed = 12345u32;
        let mut next_rand = || {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            (seed >> 16) as usize
        };

        for _ in 0..100 {
            let size = 1 + next_rand() % 512;
            unsafe {
                let p = h.lock().alloc(size);
                assert!(!p.is_null(), "allocation of {size} bytes failed");
                ptrs.push((p, size));
                total += size;
            }
        }

        // Shuffle (Fisher-Yates) then free in that order.
        for i in (1..ptrs.len()).rev() {
            let j = next_rand() % (i + 1);
            ptrs.swap(i, j);
        }
        for (p, _) in &ptrs {
            unsafe {
                h.lock().free(*p);
            }
        }

        unsafe {
            let p = h.lock().alloc(total.min(200 * 1024));
            assert!(!p.is_null(), "post-free allocation should succeed");
        }
    }

    #[test]
    fn test_size_classes() {
        assert_eq!(class_of(1), 0);
        assert_eq!(class_of(2), 1);
        assert_eq!(class_of(3), 1);
        assert_eq!(class_of(4), 2);
        assert_eq!(class_of(1024), 10);
    }
}
