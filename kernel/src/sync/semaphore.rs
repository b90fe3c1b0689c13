//! Counting semaphore (component I), layered on the futex (H).

use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use crate::error::KResult;
use crate::sync::futex;

pub struct Semaphore {
    level: AtomicI32,
    waiters: AtomicU32,
    destroyed: AtomicBool,
}

impl Semaphore {
    pub const fn new(initial: i32) -> Self {
        Self {
            level: AtomicI32::new(initial),
            waiters: AtomicU32::new(0),
            destroyed: AtomicBool::new(false),
        }
    }

    fn level_addr(&self) -> u32 {
        &self.level as *const AtomicI32 as u32
    }

    pub fn level(&self) -> i32 {
        self.level.load(Ordering::Acquire)
    }

    /// Decrements the level, blocking when it's already at or below zero.
    pub fn pend(&self) -> KResult<()> {
        loop {
            if self.destroyed.load(Ordering::Acquire) {
                return Err(crate::error::Error::NotInitialized);
            }
            let cur = self.level.load(Ordering::Acquire);
            if cur > 0 {
                if self
                    .level
                    .compare_exchange(cur, cur - 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Ok(());
                }
                continue;
            }
            self.waiters.fetch_add(1, Ordering::AcqRel);
            let woke = futex::wait(self.level_addr(), cur as u32);
            self.waiters.fetch_sub(1, Ordering::AcqRel);
            woke?;
        }
    }

    /// Increments the level and wakes one waiter if any are parked.
    pub fn post(&self) -> KResult<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(crate::error::Error::NotInitialized);
        }
        self.level.fetch_add(1, Ordering::AcqRel);
        if self.waiters.load(Ordering::Acquire) > 0 {
            futex::wake(self.level_addr(), 1)?;
        }
        Ok(())
    }

    pub fn destroy(&self) -> KResult<()> {
        self.destroyed.store(true, Ordering::Release);
        futex::wake(self.level_addr(), u32::MAX)?;
        Ok(())
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_new_level() {
        let s = Semaphore::new(3);
        assert_eq!(s.level(), 3);
    }
}
