//! RAII wrappers for kernel resources.
//!
//! Ensures proper cleanup (frame release, scope-local teardown) when a
//! resource goes out of scope instead of relying on a matching manual call.

use core::ops::{Deref, DerefMut};

use spin::MutexGuard;

use crate::mm::{frame_allocator, PhysAddr};

/// RAII wrapper for a single physical frame. Returns it to the frame
/// allocator when dropped.
pub struct FrameGuard {
    phys: PhysAddr,
    leaked: bool,
}

impl FrameGuard {
    pub fn new(phys: PhysAddr) -> Self {
        Self {
            phys,
            leaked: false,
        }
    }

    pub fn addr(&self) -> PhysAddr {
        self.phys
    }

    /// Release ownership of the frame without deallocating.
    pub fn leak(mut self) -> PhysAddr {
        self.leaked = true;
        self.phys
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if self.leaked {
            return;
        }
        let _ = frame_allocator::free_kframes(self.phys, 1);
        log::trace!("released frame at {:#x}", self.phys.as_u32());
    }
}

/// RAII wrapper for a contiguous run of physical frames.
pub struct FramesGuard {
    phys: PhysAddr,
    count: usize,
    leaked: bool,
}

impl FramesGuard {
    pub fn new(phys: PhysAddr, count: usize) -> Self {
        Self {
            phys,
            count,
            leaked: false,
        }
    }

    pub fn addr(&self) -> PhysAddr {
        self.phys
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn leak(mut self) -> (PhysAddr, usize) {
        self.leaked = true;
        (self.phys, self.count)
    }
}

impl Drop for FramesGuard {
    fn drop(&mut self) {
        if self.leaked {
            return;
        }
        let _ = frame_allocator::free_kframes(self.phys, self.count);
        log::trace!("released {} frames at {:#x}", self.count, self.phys.as_u32());
    }
}

/// RAII lock guard that logs acquisition and release; useful when tracking
/// down a lock-order violation during development.
pub struct TrackedMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    name: &'static str,
}

impl<'a, T> TrackedMutexGuard<'a, T> {
    pub fn new(guard: MutexGuard<'a, T>, name: &'static str) -> Self {
        log::trace!("acquired lock: {name}");
        Self { guard, name }
    }
}

impl<T> Drop for TrackedMutexGuard<'_, T> {
    fn drop(&mut self) {
        log::trace!("released lock: {}", self.name);
    }
}

impl<T> Deref for TrackedMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for TrackedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

/// Generic scope guard that runs cleanup code on drop, used by
/// `crate::defer!`.
pub struct ScopeGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    pub fn cancel(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

#[macro_export]
macro_rules! defer {
    ($e:expr) => {
        let _guard = $crate::raii::ScopeGuard::new(|| $e);
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_guard() {
        let mut cleaned = false;
        {
            let _guard = ScopeGuard::new(|| {
                cleaned = true;
            });
        }
        assert!(cleaned);
    }

    #[test]
    fn test_scope_guard_cancel() {
        let mut cleaned = false;
        {
            let guard = ScopeGuard::new(|| {
                cleaned = true;
            });
            guard.cancel();
        }
        assert!(!cleaned);
    }
}
