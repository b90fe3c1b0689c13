//! Shared helpers for the `harness = false` integration test binaries.
//!
//! Each test binary is its own freestanding kernel image: no real
//! bootloader/multiboot handoff is exercised here, just the subsystems
//! under test wired up directly, exiting QEMU through the isa-debug-exit
//! device once the checks are done (or from the panic handler on failure).

#![allow(dead_code)]

use nanokern::{serial_print, serial_println};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

const ISA_DEBUG_EXIT_PORT: u16 = 0xf4;

pub fn exit_qemu(code: QemuExitCode) -> ! {
    unsafe {
        nanokern::arch::x86::outl(ISA_DEBUG_EXIT_PORT, code as u32);
    }
    unreachable!("isa-debug-exit did not terminate QEMU");
}

pub fn init_test_env(subsystem: &str) {
    serial_println!("\n=== {subsystem} test suite ===");
}

pub fn test_panic_handler(info: &core::panic::PanicInfo) -> ! {
    serial_println!("[failed]\n{info}\n");
    exit_qemu(QemuExitCode::Failed)
}

pub fn check<T>(name: &str, result: &Result<T, nanokern::error::Error>) {
    serial_print!("{name}...\t");
    match result {
        Ok(_) => serial_println!("[ok]"),
        Err(e) => {
            serial_println!("[failed] {e}");
            exit_qemu(QemuExitCode::Failed);
        }
    }
}
