//! Scheduler core (component G): priority-based dispatch over the thread
//! arena and queues built in [`super::task`] and [`super::queue`].
//!
//! Unlike the rest of this kernel's globals, the scheduler is not behind a
//! `spin::Mutex`. A mutex guard held across [`switch_to`] would never be
//! released by the thread that acquired it -- the next thread to touch the
//! scheduler runs on the same core and would spin on a lock its predecessor
//! can no longer drop. Instead, mutation that doesn't cross a stack switch
//! runs under [`with_sched`] (interrupts off, short, returns before
//! switching), and the actual switch only ever happens from a context the
//! CPU already disabled interrupts for: inside an interrupt gate. Thread
//! code that needs to block sets its own state up front and then raises
//! `SCHED_VECTOR` via [`schedule`] to let the switch happen on the way back
//! out of that interrupt.
//!
//! [`switch_to`]: crate::arch::x86::context::switch_to

extern crate alloc;

use core::alloc::Layout;

use crate::arch::x86::context::Context;
use crate::arch::x86::{self, timer};
use crate::error::{Error, KResult};
use crate::irq::{self, InterruptFrame};

use super::queue::{Queue, ThreadId};
use super::task::{
    Resource, ReturnState, TerminationCause, ThreadKind, ThreadState, ThreadTable, WaitType,
    IDLE_PRIORITY, MAX_PRIORITY,
};

/// Ticks of CPU time a thread runs before a same-or-lower-priority peer gets
/// a turn. At the 10ms PIT period this is a 50ms quantum.
const DEFAULT_TIME_SLICE_TICKS: u32 = 5;
const IDLE_STACK_SIZE: usize = 16 * 1024;
const STACK_ALIGN: usize = 16;

pub struct Scheduler {
    table: ThreadTable,
    ready: Queue,
    sleepers: Queue,
    current: ThreadId,
    idle: ThreadId,
    current_slice: u32,
}

static mut SCHEDULER: Option<Scheduler> = None;

/// # Safety
/// Only valid while interrupts are disabled or we're already inside an
/// interrupt handler, so no second caller on this core can observe a
/// half-mutated scheduler.
unsafe fn scheduler() -> &'static mut Scheduler {
    #[allow(static_mut_refs)]
    SCHEDULER.as_mut().expect("scheduler not initialized")
}

/// Runs `f` with interrupts disabled, for state changes that don't
/// themselves perform a context switch. Safe to nest inside an interrupt
/// handler (interrupts are already off there; restoring is a no-op).
fn with_sched<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    let was_enabled = irq::disable();
    let r = f(unsafe { scheduler() });
    irq::restore(was_enabled);
    r
}

fn now_ms() -> u64 {
    timer::ticks() * timer::tick_period_ms() as u64
}

fn alloc_stack(size: usize) -> KResult<(usize, usize)> {
    let layout = Layout::from_size_align(size, STACK_ALIGN).map_err(|_| Error::IncorrectValue)?;
    let ptr = unsafe { alloc::alloc::alloc(layout) };
    if ptr.is_null() {
        return Err(Error::Malloc);
    }
    Ok((ptr as usize, size))
}

fn free_stack(base: usize, size: usize) {
    if base == 0 {
        return;
    }
    if let Ok(layout) = Layout::from_size_align(size, STACK_ALIGN) {
        unsafe { alloc::alloc::dealloc(base as *mut u8, layout) };
    }
}

/// Sets up the idle thread and the timer/sched-vector interrupt handlers.
/// Does not start dispatch -- call [`run`] once the kernel has spawned
/// whatever threads it wants ready before the first switch.
pub fn init() {
    let (idle_base, idle_len) = alloc_stack(IDLE_STACK_SIZE).expect("idle stack allocation");
    let idle_top = (idle_base + idle_len) as u32;
    let idle_ctx = Context::new_thread(idle_top, idle_entry, 0);

    let mut table = ThreadTable::new();
    let idle_id = table.spawn(
        None,
        "idle",
        ThreadKind::Kernel,
        IDLE_PRIORITY,
        0,
        idle_ctx,
        idle_base,
        idle_len,
        idle_entry as usize,
        0,
        now_ms(),
    );
    table.get_mut(idle_id).unwrap().state = ThreadState::Running;

    unsafe {
        SCHEDULER = Some(Scheduler {
            table,
            ready: Queue::new(),
            sleepers: Queue::new(),
            current: idle_id,
            idle: idle_id,
            current_slice: DEFAULT_TIME_SLICE_TICKS,
        });
    }

    irq::register_irq_handler(0, irq0_handler).expect("timer IRQ handler");
    irq::register_handler(irq::SCHED_VECTOR, sched_vector_handler).expect("sched vector handler");
}

extern "C" fn idle_entry(_arg: usize) -> ! {
    loop {
        x86::idle();
    }
}

fn irq0_handler(_frame: &mut InterruptFrame) {
    timer::on_tick();
}

fn sched_vector_handler(_frame: &mut InterruptFrame) {
    let s = unsafe { scheduler() };
    reschedule_locked(s);
}

/// Hands off the boot stack to the scheduler and never returns. Threads
/// spawned before this call are already in the ready queue; if none were,
/// idle runs until the first one shows up.
pub fn run() -> ! {
    let mut boot_ctx = Context { esp: 0 };
    let next_id = with_sched(|s| {
        let next = s.ready.pop(&mut s.table).unwrap_or(s.idle);
        s.table.get_mut(next).unwrap().state = ThreadState::Running;
        s.current = next;
        s.current_slice = DEFAULT_TIME_SLICE_TICKS;
        next
    });
    unsafe {
        let to = &scheduler().table.get(next_id).unwrap().context as *const Context;
        x86::enable_interrupts();
        crate::arch::x86::context::switch_to(&mut boot_ctx, to);
    }
    unreachable!("boot stack resumed after handing off to the scheduler");
}

/// Called from the timer ISR (vector 32) once per tick; already running
/// with interrupts disabled via the hardware interrupt gate.
pub fn on_timer_tick() {
    let s = unsafe { scheduler() };
    wake_sleepers(s, now_ms());
    if s.current != s.idle && s.current_slice > 0 {
        s.current_slice -= 1;
    }
    if should_preempt(s) {
        reschedule_locked(s);
    }
}

fn should_preempt(s: &Scheduler) -> bool {
    if s.current == s.idle {
        return !s.ready.is_empty();
    }
    if s.current_slice == 0 {
        return true;
    }
    match s.ready.head() {
        Some(head) => s.table.priority(head) < s.table.priority(s.current),
        None => false,
    }
}

fn wake_sleepers(s: &mut Scheduler, now: u64) {
    loop {
        let due = s
            .sleepers
            .find(&s.table, |id| s.table.get(id).map(|t| t.wakeup_time <= now).unwrap_or(false));
        match due {
            Some(id) => {
                s.sleepers.remove(&mut s.table, id).ok();
                s.table.get_mut(id).unwrap().state = ThreadState::Ready;
                let _ = s.ready.push_prio(&mut s.table, id);
            }
            None => break,
        }
    }
}

/// Saves the outgoing thread (if it's still runnable) back onto the ready
/// queue, picks the next one, and switches. Must only be called from a
/// context where interrupts are already disabled by hardware (an interrupt
/// gate) -- thread code that wants to yield should call [`schedule`] instead.
fn reschedule_locked(s: &mut Scheduler) {
    let current_id = s.current;
    let is_running =
        s.table.get(current_id).map(|t| t.state == ThreadState::Running).unwrap_or(false);
    if is_running {
        s.table.get_mut(current_id).unwrap().state = ThreadState::Ready;
        if current_id != s.idle {
            let _ = s.ready.push_prio(&mut s.table, current_id);
        }
    }

    let next_id = s.ready.pop(&mut s.table).unwrap_or(s.idle);
    s.table.get_mut(next_id).unwrap().state = ThreadState::Running;
    s.current_slice = DEFAULT_TIME_SLICE_TICKS;

    if next_id == current_id {
        s.current = next_id;
        return;
    }

    let from_ctx: *mut Context = &mut s.table.get_mut(current_id).unwrap().context;
    let to_ctx: *const Context = &s.table.get(next_id).unwrap().context;
    s.current = next_id;
    unsafe { crate::arch::x86::context::switch_to(from_ctx, to_ctx) };
}

/// Raises `SCHED_VECTOR` so the actual switch runs on the way back out of
/// the resulting interrupt. Thread code calls this after changing its own
/// scheduling state (blocked, slept, yielded) to give up the CPU.
pub fn schedule() {
    unsafe {
        core::arch::asm!("int {v}", v = const irq::SCHED_VECTOR);
    }
}

#[allow(clippy::too_many_arguments)]
pub fn spawn(
    priority: u8,
    name: &str,
    stack_size: usize,
    affinity: u8,
    entry: extern "C" fn(usize) -> !,
    arg: usize,
) -> KResult<ThreadId> {
    if priority > MAX_PRIORITY {
        return Err(Error::ForbiddenPriority);
    }
    let (stack_base, len) = alloc_stack(stack_size)?;
    let stack_top = (stack_base + len) as u32;
    let context = Context::new_thread(stack_top, entry, arg);

    with_sched(|s| {
        let parent = Some(s.current);
        let id = s.table.spawn(
            parent,
            name,
            ThreadKind::Kernel,
            priority,
            affinity,
            context,
            stack_base,
            len,
            entry as usize,
            arg,
            now_ms(),
        );
        if let Err(e) = s.ready.push_prio(&mut s.table, id) {
            s.table.reap(id);
            return Err(e);
        }
        Ok(id)
    })
}

/// Puts the calling thread to sleep for at least `ms` milliseconds.
pub fn sleep(ms: u32) -> KResult<()> {
    with_sched(|s| -> KResult<()> {
        if s.current == s.idle {
            return Err(Error::UnauthorizedAction);
        }
        let id = s.current;
        let deadline = now_ms() + ms as u64;
        let t = s.table.get_mut(id).unwrap();
        t.state = ThreadState::Sleeping;
        t.wakeup_time = deadline;
        s.sleepers.push(&mut s.table, id)
    })?;
    schedule();
    Ok(())
}

/// Ends the calling thread normally. Never returns; the thread stays a
/// ZOMBIE until a joiner reaps it.
pub fn exit(retval: i32) -> ! {
    with_sched(|s| {
        let id = s.current;
        let joiners = {
            let t = s.table.get_mut(id).unwrap();
            t.retval = retval;
            t.return_state = Some(ReturnState::Returned);
            t.termination_cause = Some(TerminationCause::Normal);
            t.state = ThreadState::Zombie;
            t.end_time = Some(now_ms());
            core::mem::take(&mut t.joiners)
        };
        wake_joiners(s, &joiners);
    });
    schedule();
    unreachable!("exited thread resumed");
}

/// Kills the thread currently running, as from an unrecoverable exception.
/// Must be called from inside an interrupt handler (the fault vector).
pub fn terminate_current(cause: TerminationCause) -> ! {
    let s = unsafe { scheduler() };
    let id = s.current;
    let joiners = {
        let t = s.table.get_mut(id).unwrap();
        t.retval = -1;
        t.return_state = Some(ReturnState::Killed);
        t.termination_cause = Some(cause);
        t.state = ThreadState::Zombie;
        t.end_time = Some(now_ms());
        core::mem::take(&mut t.joiners)
    };
    wake_joiners(s, &joiners);
    reschedule_locked(s);
    unreachable!("terminated thread resumed");
}

fn wake_joiners(s: &mut Scheduler, joiners: &[ThreadId]) {
    for &joiner in joiners {
        if let Some(j) = s.table.get_mut(joiner) {
            j.state = ThreadState::Ready;
        }
        let _ = s.ready.push_prio(&mut s.table, joiner);
    }
}

/// Blocks until `target` becomes a zombie, then reaps it and returns its
/// exit value and cause.
pub fn join(target: ThreadId) -> KResult<(i32, TerminationCause)> {
    loop {
        let outcome = with_sched(|s| -> KResult<Option<(i32, TerminationCause)>> {
            let state = s.table.get(target).ok_or(Error::NoSuchId)?.state;
            if state == ThreadState::Zombie {
                let (retval, cause) = {
                    let t = s.table.get(target).unwrap();
                    (t.retval, t.termination_cause.unwrap_or(TerminationCause::Normal))
                };
                reap(s, target);
                return Ok(Some((retval, cause)));
            }
            let caller = s.current;
            s.table.get_mut(caller).unwrap().state = ThreadState::Joining;
            s.table.get_mut(target).unwrap().joiners.push(caller);
            Ok(None)
        })?;
        match outcome {
            Some(result) => return Ok(result),
            None => schedule(),
        }
    }
}

/// Walks a reaped thread's resource list in reverse registration order,
/// reparents its children to the joiner, frees its stack, and returns its
/// slot to the arena.
fn reap(s: &mut Scheduler, target: ThreadId) {
    let reaper = s.current;
    loop {
        let resource = s.table.get_mut(target).and_then(|t| t.resources.pop());
        match resource {
            Some(Resource { payload, cleanup, .. }) => cleanup(payload),
            None => break,
        }
    }
    let children = core::mem::take(&mut s.table.get_mut(target).unwrap().children);
    for child in children {
        if let Some(c) = s.table.get_mut(child) {
            c.parent = Some(reaper);
        }
    }
    let (stack_base, stack_size) = {
        let t = s.table.get(target).unwrap();
        (t.stack_base, t.stack_size)
    };
    s.table.reap(target);
    free_stack(stack_base, stack_size);
}

/// Marks the calling thread WAITING and removes it from the ready queue,
/// for a caller (futex/mutex/semaphore) about to enqueue it on its own wait
/// list. Returns the thread id to use as the wait-queue node.
pub fn lock_thread(wait_type: WaitType) -> KResult<ThreadId> {
    with_sched(|s| {
        if s.current == s.idle {
            return Err(Error::UnauthorizedAction);
        }
        let id = s.current;
        let t = s.table.get_mut(id).unwrap();
        t.state = ThreadState::Waiting;
        t.wait_type = Some(wait_type);
        Ok(id)
    })
}

/// Makes `node` ready again. If `immediate` and it now outranks the
/// currently running thread, yields right away instead of waiting for the
/// next tick.
pub fn unlock_thread(node: ThreadId, immediate: bool) -> KResult<()> {
    let should_yield = with_sched(|s| -> KResult<bool> {
        let woken_prio = s.table.get(node).ok_or(Error::NoSuchId)?.priority;
        {
            let t = s.table.get_mut(node).unwrap();
            t.state = ThreadState::Ready;
            t.wait_type = None;
        }
        s.ready.push_prio(&mut s.table, node)?;
        let current_prio = s.table.priority(s.current);
        Ok(immediate && woken_prio < current_prio)
    })?;
    if should_yield {
        schedule();
    }
    Ok(())
}

/// Registers a cleanup to run when `thread` is reaped. Returns a token for
/// [`remove_resource`].
pub fn add_resource(thread: ThreadId, payload: usize, cleanup: fn(usize)) -> KResult<u32> {
    with_sched(|s| {
        let t = s.table.get_mut(thread).ok_or(Error::NoSuchId)?;
        Ok(t.add_resource(payload, cleanup))
    })
}

pub fn remove_resource(thread: ThreadId, token: u32) -> KResult<()> {
    with_sched(|s| {
        let t = s.table.get_mut(thread).ok_or(Error::NoSuchId)?;
        if t.remove_resource(token) {
            Ok(())
        } else {
            Err(Error::NoSuchId)
        }
    })
}

/// Elevates `thread`'s priority, saving the original for [`restore_priority`]
/// (priority inheritance). A second elevation before the first restore keeps
/// the original save rather than overwriting it.
pub fn elevate_priority(thread: ThreadId, new_priority: u8) -> KResult<()> {
    with_sched(|s| {
        let t = s.table.get_mut(thread).ok_or(Error::NoSuchId)?;
        if t.saved_priority.is_none() {
            t.saved_priority = Some(t.priority);
        }
        t.priority = t.priority.min(new_priority);
        Ok(())
    })
}

pub fn restore_priority(thread: ThreadId) -> KResult<()> {
    with_sched(|s| {
        let t = s.table.get_mut(thread).ok_or(Error::NoSuchId)?;
        if let Some(p) = t.saved_priority.take() {
            t.priority = p;
        }
        Ok(())
    })
}

pub fn set_priority(thread: ThreadId, priority: u8) -> KResult<()> {
    if priority > MAX_PRIORITY {
        return Err(Error::ForbiddenPriority);
    }
    with_sched(|s| {
        let t = s.table.get_mut(thread).ok_or(Error::NoSuchId)?;
        t.priority = priority;
        t.initial_priority = priority;
        Ok(())
    })
}

pub fn get_priority(thread: ThreadId) -> KResult<u8> {
    with_sched(|s| s.table.get(thread).map(|t| t.priority).ok_or(Error::NoSuchId))
}

/// Clears the calling thread's `owner_died` flag; called before blocking on
/// a futex so a stale flag from a previous wait can't leak through.
pub fn clear_owner_died() {
    with_sched(|s| {
        let id = s.current;
        s.table.get_mut(id).unwrap().owner_died = false;
    });
}

pub fn take_owner_died() -> bool {
    with_sched(|s| {
        let id = s.current;
        core::mem::take(&mut s.table.get_mut(id).unwrap().owner_died)
    })
}

pub fn mark_owner_died(thread: ThreadId) {
    with_sched(|s| {
        if let Some(t) = s.table.get_mut(thread) {
            t.owner_died = true;
        }
    });
}

pub fn self_id() -> ThreadId {
    with_sched(|s| s.current)
}

pub fn ptid(thread: ThreadId) -> KResult<Option<ThreadId>> {
    with_sched(|s| s.table.get(thread).map(|t| t.parent).ok_or(Error::NoSuchId))
}

#[derive(Debug, Clone, Copy)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub priority: u8,
    pub state: ThreadState,
}

pub fn threads_info(out: &mut alloc::vec::Vec<ThreadInfo>) {
    with_sched(|s| {
        out.clear();
        for t in s.table.iter() {
            out.push(ThreadInfo { id: t.id, priority: t.priority, state: t.state });
        }
    });
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    // The scheduler itself needs a live idle thread and interrupt plumbing
    // that only exist post-boot; its behavior is covered by the integration
    // tests in `kernel/tests/scheduler_tests.rs` rather than unit tests here.
    #[test]
    fn test_default_slice_is_positive() {
        assert!(super::DEFAULT_TIME_SLICE_TICKS > 0);
    }
}
