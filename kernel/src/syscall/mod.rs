//! System call dispatch (component J): a fixed table indexed by syscall id.
//! The gate itself (`int 0x80`, vector `irq::SYSCALL_VECTOR`) is built in
//! `arch::x86::syscall`; this module owns what runs once the frame lands
//! here, matching the same register ABI `raise_syscall` uses to issue one:
//! eax = id, ebx/ecx/edx/esi = up to four arguments, eax on return = result
//! (negative `Error` code, or a non-negative value on success).

mod futex;
mod memory;
mod process;

use crate::error::Error;
use crate::irq::{self, InterruptFrame};

/// The closed set of syscall ids this core dispatches. Anything else is
/// `SYSCALL_UNKNOWN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyscallId {
    Fork = 0,
    WaitPid = 1,
    Exit = 2,
    FutexWait = 3,
    FutexWake = 4,
    SchedGetParams = 5,
    SchedSetParams = 6,
    PageAlloc = 7,
}

impl SyscallId {
    fn from_u32(id: u32) -> Option<Self> {
        Some(match id {
            0 => Self::Fork,
            1 => Self::WaitPid,
            2 => Self::Exit,
            3 => Self::FutexWait,
            4 => Self::FutexWake,
            5 => Self::SchedGetParams,
            6 => Self::SchedSetParams,
            7 => Self::PageAlloc,
            _ => return None,
        })
    }
}

pub fn init() {
    irq::register_handler(irq::SYSCALL_VECTOR, dispatch).expect("syscall gate handler");
}

fn dispatch(frame: &mut InterruptFrame) {
    let id = frame.eax;
    let a1 = frame.ebx;
    let a2 = frame.ecx;
    let a3 = frame.edx;
    let a4 = frame.esi;

    let result: Result<u32, Error> = match SyscallId::from_u32(id) {
        Some(SyscallId::Fork) => process::sys_fork(a1, a2, a3),
        Some(SyscallId::WaitPid) => process::sys_waitpid(a1, a2),
        Some(SyscallId::Exit) => process::sys_exit(a1 as i32),
        Some(SyscallId::FutexWait) => futex::sys_futex_wait(a1, a2),
        Some(SyscallId::FutexWake) => futex::sys_futex_wake(a1, a2),
        Some(SyscallId::SchedGetParams) => process::sys_sched_get_params(a1, a2),
        Some(SyscallId::SchedSetParams) => process::sys_sched_set_params(a1, a2),
        Some(SyscallId::PageAlloc) => memory::sys_page_alloc(a1, a2),
        None => Err(Error::SyscallUnknown),
    };

    frame.eax = match result {
        Ok(v) => v,
        Err(e) => (-(u32::from(e) as i32)) as u32,
    };
}
