//! Mutex (component I), layered on the futex (H).
//!
//! The state word cycles UNLOCKED -> LOCKED -> LOCKED_WAIT the way the
//! classic three-state futex mutex does: a contended acquirer always swaps
//! itself into LOCKED_WAIT rather than trying to distinguish "I raced a free
//! lock" from "someone's already waiting", trading one spurious wake for a
//! simpler, always-correct unlock path.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, KResult};
use crate::sched::{self, ThreadId};
use crate::sync::futex;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const LOCKED_WAIT: u32 = 2;
#[allow(dead_code)]
const WAIT_INIT: u32 = 3;
const DESTROYED: u32 = 4;

const NO_HOLDER: u32 = u32::MAX;
const NO_TOKEN: u32 = u32::MAX;
const NO_SAVED_PRIORITY: u32 = u32::MAX;

pub struct Mutex {
    state: AtomicU32,
    holder: AtomicU32,
    holder_token: AtomicU32,
    recursion: AtomicU32,
    saved_priority: AtomicU32,
    recursive: bool,
    elevate_priority: Option<u8>,
}

impl Mutex {
    pub const fn new(recursive: bool, elevate_priority: Option<u8>) -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
            holder: AtomicU32::new(NO_HOLDER),
            holder_token: AtomicU32::new(NO_TOKEN),
            recursion: AtomicU32::new(0),
            saved_priority: AtomicU32::new(NO_SAVED_PRIORITY),
            recursive,
            elevate_priority,
        }
    }

    fn state_addr(&self) -> u32 {
        &self.state as *const AtomicU32 as u32
    }

    pub fn lock(&self) -> KResult<()> {
        let me = sched::self_id();
        if self.recursive && self.holder.load(Ordering::Acquire) == me {
            self.recursion.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        match self.state.compare_exchange(
            UNLOCKED,
            LOCKED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => return self.on_acquired(me),
            Err(DESTROYED) => return Err(Error::NotInitialized),
            Err(_) => {}
        }

        loop {
            let prev = self.state.swap(LOCKED_WAIT, Ordering::AcqRel);
            match prev {
                DESTROYED => return Err(Error::NotInitialized),
                UNLOCKED => return self.on_acquired(me),
                _ => futex::wait(self.state_addr(), LOCKED_WAIT)?,
            }
        }
    }

    fn on_acquired(&self, me: ThreadId) -> KResult<()> {
        self.holder.store(me, Ordering::Release);
        if self.recursive {
            self.recursion.store(0, Ordering::Relaxed);
        }
        if let Some(elevated) = self.elevate_priority {
            let saved = sched::get_priority(me)?;
            self.saved_priority.store(saved as u32, Ordering::Relaxed);
            sched::set_priority(me, elevated)?;
        }
        let token = sched::add_resource(me, self.state_addr() as usize, on_holder_died)?;
        self.holder_token.store(token, Ordering::Relaxed);
        Ok(())
    }

    pub fn unlock(&self) -> KResult<()> {
        let me = sched::self_id();
        if self.recursive && self.holder.load(Ordering::Acquire) == me {
            if self.recursion.load(Ordering::Relaxed) > 0 {
                self.recursion.fetch_sub(1, Ordering::Relaxed);
                return Ok(());
            }
        }

        self.holder.store(NO_HOLDER, Ordering::Release);
        let token = self.holder_token.swap(NO_TOKEN, Ordering::AcqRel);
        if token != NO_TOKEN {
            let _ = sched::remove_resource(me, token);
        }
        let saved = self.saved_priority.swap(NO_SAVED_PRIORITY, Ordering::AcqRel);
        if saved != NO_SAVED_PRIORITY {
            let _ = sched::set_priority(me, saved as u8);
        }

        let prev = self.state.fetch_sub(1, Ordering::AcqRel);
        if prev != LOCKED {
            self.state.store(UNLOCKED, Ordering::Release);
            futex::wake(self.state_addr(), 1)?;
        }
        Ok(())
    }

    pub fn destroy(&self) -> KResult<()> {
        self.state.store(DESTROYED, Ordering::Release);
        futex::wake(self.state_addr(), u32::MAX)?;
        Ok(())
    }
}

/// Runs when a holder terminates without unlocking: frees the lock and
/// flags every remaining waiter `owner_died` on its way out.
fn on_holder_died(state_addr: usize) {
    let state = unsafe { &*(state_addr as *const AtomicU32) };
    state.store(UNLOCKED, Ordering::Release);
    let _ = futex::wake_owner_died(state_addr as u32);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_new_starts_unlocked() {
        let m = Mutex::new(false, None);
        assert_eq!(m.state.load(Ordering::Relaxed), UNLOCKED);
    }

    #[test]
    fn test_wait_init_constant_reserved() {
        assert_eq!(WAIT_INIT, 3);
    }
}
