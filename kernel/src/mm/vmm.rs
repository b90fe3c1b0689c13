//! Virtual memory map/unmap (component D).
//!
//! Built directly on the recursive self-mapped page tables in
//! `mm::page_table`; this module owns the page-granularity map/unmap
//! algorithms and their rollback-on-failure behavior.

#![allow(dead_code)]

use crate::error::{Error, KResult};
use crate::mm::page_table;
use crate::mm::{frame_allocator, PageFlags, PhysAddr, VirtAddr, PAGE_SIZE};

fn flags_for(read_only: bool, exec: bool, extra: PageFlags) -> PageFlags {
    let mut flags = PageFlags::PRESENT | extra;
    if !read_only {
        flags = flags | PageFlags::WRITABLE;
    }
    // Execute permission has no representable bit on a 32-bit non-PAE page
    // table (no NX); `exec` is accepted for API symmetry with the spec and
    // otherwise ignored here.
    let _ = exec;
    flags
}

fn align_range(virt: VirtAddr, size: usize) -> (VirtAddr, usize) {
    let start = virt.align_down();
    let end = VirtAddr::new(virt.as_u32() + size as u32).align_up();
    (start, (end.as_u32() - start.as_u32()) as usize)
}

/// Maps device memory at a fixed physical address. The backing frames are
/// marked `HARDWARE` so `kunmap` never returns them to the frame allocator.
pub fn kmap_hw(virt: VirtAddr, phys: PhysAddr, size: usize, read_only: bool, exec: bool) -> KResult<()> {
    if virt.as_u32() == 0 || phys.as_u32() == 0 {
        return Err(Error::NullPointer);
    }
    let (start, len) = align_range(virt, size);
    let pages = len / PAGE_SIZE;
    let flags = flags_for(read_only, exec, PageFlags::HARDWARE);

    for i in 0..pages {
        let v = start.add(i * PAGE_SIZE);
        if page_table::is_present(v) {
            unmap_range(start, i);
            return Err(Error::MappingAlreadyExists);
        }
    }

    for i in 0..pages {
        let v = start.add(i * PAGE_SIZE);
        let p = PhysAddr::new(phys.as_u32() + (i * PAGE_SIZE) as u32);
        if let Err(e) = page_table::ensure_table(v.dir_index()) {
            unmap_range(start, i);
            return Err(e);
        }
        page_table::set_entry(v, p, flags);
        frame_allocator::mark_hardware(p, 1);
    }
    Ok(())
}

/// Allocates fresh frames and maps them at `virt`.
pub fn kmap(virt: VirtAddr, size: usize, read_only: bool, exec: bool) -> KResult<()> {
    if virt.as_u32() == 0 {
        return Err(Error::NullPointer);
    }
    let (start, len) = align_range(virt, size);
    let pages = len / PAGE_SIZE;
    let flags = flags_for(read_only, exec, PageFlags::NONE);

    for i in 0..pages {
        let v = start.add(i * PAGE_SIZE);
        if page_table::is_present(v) {
            unmap_range(start, i);
            return Err(Error::MappingAlreadyExists);
        }
    }

    for i in 0..pages {
        let v = start.add(i * PAGE_SIZE);
        let phys = match frame_allocator::alloc_kframes(1) {
            Ok(p) => p,
            Err(e) => {
                unmap_range(start, i);
                return Err(e);
            }
        };
        if let Err(e) = page_table::ensure_table(v.dir_index()) {
            let _ = frame_allocator::free_kframes(phys, 1);
            unmap_range(start, i);
            return Err(e);
        }
        page_table::set_entry(v, phys, flags);
    }
    Ok(())
}

/// Unmaps `size` bytes starting at `virt`. Releases non-hardware backing
/// frames, invalidates the TLB for each page, and releases any intermediate
/// page table left with zero present entries.
pub fn kunmap(virt: VirtAddr, size: usize) -> KResult<()> {
    if virt.as_u32() == 0 {
        return Err(Error::NullPointer);
    }
    let (start, len) = align_range(virt, size);
    let pages = len / PAGE_SIZE;
    unmap_range(start, pages);
    Ok(())
}

/// Unmaps `count` pages starting at `start`, skipping any that are already
/// absent (idempotent -- two consecutive `kunmap` calls on the same range
/// are both well-defined).
fn unmap_range(start: VirtAddr, count: usize) {
    let mut touched_dirs: [i32; 4] = [-1; 4];
    let mut touched_len = 0usize;

    for i in 0..count {
        let v = start.add(i * PAGE_SIZE);
        let entry = page_table::entry(v);
        if !entry.is_present() {
            continue;
        }
        if !entry.flags().contains(PageFlags::HARDWARE) {
            let _ = frame_allocator::free_kframes(entry.addr(), 1);
        }
        page_table::clear_entry(v);
        page_table::invalidate(v);

        let d = v.dir_index() as i32;
        if !touched_dirs[..touched_len].contains(&d) {
            if touched_len < touched_dirs.len() {
                touched_dirs[touched_len] = d;
                touched_len += 1;
            } else {
                // More than 4 distinct directories touched in one call: check
                // immediately instead of batching (rare, large unmaps only).
                maybe_release_table(v.dir_index());
            }
        }
    }

    for &d in &touched_dirs[..touched_len] {
        maybe_release_table(d as usize);
    }
}

fn maybe_release_table(dir_index: usize) {
    if dir_index == page_table::RECURSIVE_INDEX {
        return;
    }
    if page_table::table_is_empty(dir_index) {
        let _ = page_table::release_table(dir_index);
    }
}

/// True if every page in `[virt, virt+size)` is present.
pub fn is_mapped(virt: VirtAddr, size: usize) -> bool {
    let (start, len) = align_range(virt, size);
    let pages = len / PAGE_SIZE;
    (0..pages).all(|i| page_table::is_present(start.add(i * PAGE_SIZE)))
}

pub fn init() {
    log::info!("virtual memory manager ready (recursive self-map at dir index {})", page_table::RECURSIVE_INDEX);
}
