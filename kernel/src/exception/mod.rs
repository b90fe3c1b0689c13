//! Exception core (component F): a thin wrapper over (E) for vectors 0-31.
//!
//! Owns the divide-by-zero and general-protection seed handlers; the
//! page-fault vector is wired straight into `mm::page_fault::dispatch`,
//! which owns its own registered-region table (component D's policy).

use crate::error::KResult;
use crate::irq::{self, InterruptFrame};
use crate::sched::{self, TerminationCause};

const DIVIDE_BY_ZERO: u8 = 0;
const GENERAL_PROTECTION_FAULT: u8 = 13;
const PAGE_FAULT: u8 = 14;

/// Registers a handler for a CPU exception vector (0-31). Shares the
/// occupied-slot/null-handler error behavior of (E) since it dispatches
/// through the same table.
pub fn register(vector: u8, handler: irq::Handler) -> KResult<()> {
    irq::register_handler(vector, handler)
}

pub fn remove(vector: u8) -> KResult<()> {
    irq::remove_handler(vector)
}

pub fn init() {
    irq::register_handler(DIVIDE_BY_ZERO, divide_by_zero).expect("divide-by-zero handler");
    irq::register_handler(GENERAL_PROTECTION_FAULT, general_protection_fault)
        .expect("GPF handler");
    irq::register_handler(PAGE_FAULT, page_fault).expect("page fault handler");
}

fn divide_by_zero(frame: &mut InterruptFrame) {
    log::warn!("divide by zero at eip={:#010x}, killing thread", frame.eip);
    sched::terminate_current(TerminationCause::DivByZero);
}

fn general_protection_fault(frame: &mut InterruptFrame) {
    panic!(
        "general protection fault at eip={:#010x} (error code {:#x})",
        frame.eip, frame.error_code
    );
}

fn page_fault(frame: &mut InterruptFrame) {
    let cr2 = crate::arch::x86::mmu::read_cr2();
    let was_write = frame.error_code & 0x2 != 0;
    crate::mm::page_fault::dispatch(cr2.as_u32(), was_write);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_remove() {
        fn handler(_frame: &mut InterruptFrame) {}
        assert!(register(30, handler).is_ok());
        assert!(remove(30).is_ok());
    }
}
