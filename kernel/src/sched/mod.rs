//! Priority-based preemptive scheduler (component G): thread data model,
//! intrusive ready/sleep queues, and the dispatch loop built on top of
//! `arch::x86::context`.

pub mod queue;
pub mod scheduler;
pub mod task;

pub use queue::ThreadId;
pub use scheduler::{
    add_resource, clear_owner_died, elevate_priority, exit, get_priority, join, lock_thread,
    mark_owner_died, on_timer_tick, ptid, remove_resource, restore_priority, run, schedule,
    self_id, set_priority, sleep, spawn, take_owner_died, terminate_current, threads_info,
    unlock_thread, ThreadInfo,
};
pub use task::{TerminationCause, ThreadState, WaitType};

/// Builds the idle thread and wires up the timer/sched-vector interrupt
/// handlers. Call after `irq`/`exception::init()`; call [`run`] afterwards
/// once the kernel's own startup threads are spawned.
pub fn init() {
    scheduler::init();
}
