//! FORK, WAITPID, EXIT, SCHED_GET_PARAMS, SCHED_SET_PARAMS.
//!
//! This core has no process/address-space concept, only kernel threads, so
//! FORK degenerates to spawning a new thread at a caller-given entry point
//! (closest equivalent of `pthread_create` rather than a real
//! copy-on-write `fork`); see DESIGN.md for the reasoning.

use crate::error::Error;
use crate::sched::{self, TerminationCause};

const DEFAULT_STACK_SIZE: usize = 64 * 1024;

pub fn sys_fork(entry: u32, arg: u32, priority: u32) -> Result<u32, Error> {
    if entry == 0 {
        return Err(Error::NullPointer);
    }
    if priority > u8::MAX as u32 {
        return Err(Error::ForbiddenPriority);
    }
    let entry_fn: extern "C" fn(usize) -> ! = unsafe { core::mem::transmute(entry as usize) };
    let id = sched::spawn(priority as u8, "fork", DEFAULT_STACK_SIZE, 0, entry_fn, arg as usize)?;
    Ok(id)
}

pub fn sys_waitpid(tid: u32, out_cause_ptr: u32) -> Result<u32, Error> {
    let (retval, cause) = sched::join(tid)?;
    if out_cause_ptr != 0 {
        unsafe {
            (out_cause_ptr as *mut u32).write(cause_code(cause));
        }
    }
    Ok(retval as u32)
}

fn cause_code(cause: TerminationCause) -> u32 {
    match cause {
        TerminationCause::Normal => 0,
        TerminationCause::DivByZero => 1,
        TerminationCause::Panic => 2,
    }
}

pub fn sys_exit(code: i32) -> ! {
    sched::exit(code)
}

pub fn sys_sched_get_params(tid: u32, out_priority_ptr: u32) -> Result<u32, Error> {
    let priority = sched::get_priority(tid)?;
    if out_priority_ptr != 0 {
        unsafe {
            (out_priority_ptr as *mut u32).write(priority as u32);
        }
    }
    Ok(0)
}

pub fn sys_sched_set_params(tid: u32, priority: u32) -> Result<u32, Error> {
    if priority > u8::MAX as u32 {
        return Err(Error::ForbiddenPriority);
    }
    sched::set_priority(tid, priority as u8)?;
    Ok(0)
}
