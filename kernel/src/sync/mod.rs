//! Synchronization Primitives
//!
//! The futex/mutex/semaphore stack (components H and I) built on top of the
//! scheduler.

pub mod futex;
pub mod mutex;
pub mod semaphore;

pub use mutex::Mutex;
pub use semaphore::Semaphore;
