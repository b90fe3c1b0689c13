//! Page-fault dispatch (component D policy).
//!
//! Handlers register the virtual-address range they own; a fault is routed
//! to the sole handler whose range contains the faulting address (read from
//! CR2). No match is a fatal condition -- there is no generic SIGSEGV
//! delivery path in this kernel, every mapped region must own a handler.

#![allow(dead_code)]

extern crate alloc;

use alloc::vec::Vec;

use spin::Mutex;

use crate::mm::VirtAddr;

pub type FaultHandler = fn(VirtAddr, bool);

struct Region {
    start: u32,
    end: u32,
    handler: FaultHandler,
}

static REGIONS: Mutex<Vec<Region>> = Mutex::new(Vec::new());

/// Registers a fault handler for `[start, end)`. Later registrations that
/// overlap an existing region are rejected by insertion order (first match
/// wins on dispatch), since the spec only requires one handler per region.
pub fn register(start: VirtAddr, end: VirtAddr, handler: FaultHandler) {
    let mut regions = REGIONS.lock();
    let idx = regions.partition_point(|r| r.start < start.as_u32());
    regions.insert(
        idx,
        Region {
            start: start.as_u32(),
            end: end.as_u32(),
            handler,
        },
    );
}

pub fn unregister(start: VirtAddr) {
    let mut regions = REGIONS.lock();
    regions.retain(|r| r.start != start.as_u32());
}

/// Dispatches a fault at `cr2`. `was_write` distinguishes a write fault from
/// a read fault for the handler's own policy decisions.
///
/// # Panics
/// Panics if no registered region contains `cr2` -- an unhandled page fault
/// is always fatal in this kernel.
pub fn dispatch(cr2: u32, was_write: bool) {
    let handler = {
        let regions = REGIONS.lock();
        let idx = regions.partition_point(|r| r.start <= cr2);
        let candidate = idx.checked_sub(1).map(|i| &regions[i]);
        candidate
            .filter(|r| cr2 >= r.start && cr2 < r.end)
            .map(|r| r.handler)
    };

    match handler {
        Some(h) => h(VirtAddr::new(cr2), was_write),
        None => panic!("unhandled page fault at {:#010x} (write={})", cr2, was_write),
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    static LAST_FAULT: AtomicU32 = AtomicU32::new(0);

    fn handler(addr: VirtAddr, _was_write: bool) {
        LAST_FAULT.store(addr.as_u32(), Ordering::SeqCst);
    }

    #[test]
    fn test_dispatch_matches_region() {
        REGIONS.lock().clear();
        register(VirtAddr::new(0x1000), VirtAddr::new(0x2000), handler);
        dispatch(0x1500, false);
        assert_eq!(LAST_FAULT.load(Ordering::SeqCst), 0x1500);
    }

    #[test]
    #[should_panic]
    fn test_dispatch_no_match_panics() {
        REGIONS.lock().clear();
        register(VirtAddr::new(0x1000), VirtAddr::new(0x2000), handler);
        dispatch(0x5000, false);
    }
}
