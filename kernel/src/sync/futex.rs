//! Futex (component H): fast userspace mutex primitive, the wait/wake
//! building block mutexes and semaphores are layered on.
//!
//! Waiters are keyed by the **physical** address backing the word, so two
//! virtual mappings of the same page agree on identity. The hash table here
//! is a short `Vec` scan rather than a real hash -- the expected working set
//! (live contended locks) is small, and this keeps the rollback bookkeeping
//! in §4.8 straightforward: every step is a plain `Vec` push/remove that's
//! trivial to undo in reverse.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{Error, KResult};
use crate::mm::frame_allocator::get_phys;
use crate::mm::VirtAddr;
use crate::sched::{self, ThreadId, WaitType};

struct Waiter {
    thread: ThreadId,
    expected: u32,
    resource_token: u32,
}

struct Bucket {
    addr: u32,
    waiters: Vec<Waiter>,
}

static TABLE: Mutex<Vec<Bucket>> = Mutex::new(Vec::new());

struct CleanupCtx {
    addr: u32,
    thread: ThreadId,
}

/// Resolves the physical address backing a caller-supplied word pointer.
fn phys_key(addr: u32) -> KResult<u32> {
    if addr == 0 {
        return Err(Error::NullPointer);
    }
    get_phys(VirtAddr::new(addr)).map(|p| p.0)
}

/// Runs a thread-terminated-while-waiting cleanup: unlinks the waiter
/// record and drops the bucket if it's now empty. Registered as a resource
/// on the waiting thread for exactly the duration of the wait.
fn reap_terminated_waiter(ctx_ptr: usize) {
    let ctx = unsafe { Box::from_raw(ctx_ptr as *mut CleanupCtx) };
    let mut table = TABLE.lock();
    if let Some(idx) = table.iter().position(|b| b.addr == ctx.addr) {
        table[idx].waiters.retain(|w| w.thread != ctx.thread);
        if table[idx].waiters.is_empty() {
            table.remove(idx);
        }
    }
}

/// Blocks the calling thread while `*addr == val`. Returns immediately
/// (without blocking) if the value has already changed out from under the
/// caller -- the standard futex race-free contract.
pub fn wait(addr: u32, val: u32) -> KResult<()> {
    let phys = phys_key(addr)?;
    let current = unsafe { core::ptr::read_volatile(addr as *const u32) };
    if current != val {
        return Ok(());
    }

    // The thread must be enlisted in its wait bucket before it's discoverable
    // as Waiting, or a wake landing between the two could be lost -- run the
    // whole park-and-enlist sequence with interrupts off so nothing can
    // preempt or wake us in between.
    crate::arch::x86::without_interrupts(|| {
        sched::clear_owner_died();
        let node = sched::lock_thread(WaitType::Resource)?;

        let waiter_pos = {
            let mut table = TABLE.lock();
            let idx = match table.iter().position(|b| b.addr == phys) {
                Some(i) => i,
                None => {
                    table.push(Bucket { addr: phys, waiters: Vec::new() });
                    table.len() - 1
                }
            };
            table[idx].waiters.push(Waiter { thread: node, expected: val, resource_token: 0 });
            (idx, table[idx].waiters.len() - 1)
        };

        let ctx = Box::leak(Box::new(CleanupCtx { addr: phys, thread: node }));
        let token = match sched::add_resource(
            node,
            ctx as *mut CleanupCtx as usize,
            reap_terminated_waiter,
        ) {
            Ok(t) => t,
            Err(e) => {
                // Roll back in reverse: drop the boxed ctx, pop the waiter we
                // just pushed, delete the bucket if it's now empty, unlock the
                // thread we parked.
                unsafe { drop(Box::from_raw(ctx as *mut CleanupCtx)) };
                let mut table = TABLE.lock();
                let (idx, pos) = waiter_pos;
                table[idx].waiters.remove(pos);
                let empty = table[idx].waiters.is_empty();
                if empty {
                    table.remove(idx);
                }
                drop(table);
                let _ = sched::unlock_thread(node, false);
                return Err(e);
            }
        };
        {
            let mut table = TABLE.lock();
            let (idx, pos) = waiter_pos;
            table[idx].waiters[pos].resource_token = token;
        }

        sched::schedule();

        if sched::take_owner_died() {
            return Err(Error::OwnerDied);
        }
        Ok(())
    })
}

/// Wakes up to `n` waiters on `addr` whose stored expected value differs
/// from the current one, head (oldest) to tail.
pub fn wake(addr: u32, n: u32) -> KResult<u32> {
    let phys = phys_key(addr)?;
    let current = unsafe { core::ptr::read_volatile(addr as *const u32) };

    let mut woken = 0u32;
    loop {
        if woken >= n {
            break;
        }
        let next = {
            let mut table = TABLE.lock();
            let idx = match table.iter().position(|b| b.addr == phys) {
                Some(i) => i,
                None => break,
            };
            let pos = table[idx].waiters.iter().position(|w| w.expected != current);
            match pos {
                Some(p) => {
                    let waiter = table[idx].waiters.remove(p);
                    if table[idx].waiters.is_empty() {
                        table.remove(idx);
                    }
                    Some(waiter)
                }
                None => None,
            }
        };
        match next {
            Some(waiter) => {
                let _ = sched::remove_resource(waiter.thread, waiter.resource_token);
                let _ = sched::unlock_thread(waiter.thread, false);
                woken += 1;
            }
            None => break,
        }
    }
    Ok(woken)
}

/// Wakes all waiters on `addr`, marking each `owner_died` so their `wait`
/// returns `OWNER_DIED`. Used by a mutex whose holder terminates while
/// still holding it.
pub fn wake_owner_died(addr: u32) -> KResult<u32> {
    let phys = phys_key(addr)?;
    let mut woken = 0u32;
    loop {
        let next = {
            let mut table = TABLE.lock();
            let idx = match table.iter().position(|b| b.addr == phys) {
                Some(i) => i,
                None => break,
            };
            if table[idx].waiters.is_empty() {
                table.remove(idx);
                break;
            }
            let waiter = table[idx].waiters.remove(0);
            if table[idx].waiters.is_empty() {
                table.remove(idx);
            }
            waiter
        };
        let _ = sched::remove_resource(next.thread, next.resource_token);
        sched::mark_owner_died(next.thread);
        let _ = sched::unlock_thread(next.thread, false);
        woken += 1;
    }
    Ok(woken)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    #[test]
    fn test_phys_key_rejects_null() {
        assert_eq!(super::phys_key(0), Err(crate::error::Error::NullPointer));
    }
}
