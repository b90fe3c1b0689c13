//! FUTEX_WAIT, FUTEX_WAKE.

use crate::error::Error;
use crate::sync::futex;

pub fn sys_futex_wait(addr: u32, val: u32) -> Result<u32, Error> {
    futex::wait(addr, val)?;
    Ok(0)
}

pub fn sys_futex_wake(addr: u32, count: u32) -> Result<u32, Error> {
    futex::wake(addr, count)
}
