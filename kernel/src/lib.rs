//! A preemptive, single-core-today x86 microkernel core: interrupt/exception
//! dispatch, a priority scheduler, a futex/mutex/semaphore stack, virtual
//! memory mapping, and a kernel heap.

#![no_std]
#![cfg_attr(target_os = "none", no_main)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]

extern crate alloc;

#[cfg(not(target_os = "none"))]
extern crate std;

#[macro_use]
pub mod print;

mod intrinsics;

pub mod arch;
pub mod error;
pub mod exception;
pub mod irq;
pub mod logging;
pub mod mm;
pub mod raii;
pub mod sched;
pub mod sync;
mod syscall;

#[cfg(all(target_arch = "x86", target_os = "none"))]
#[global_allocator]
static ALLOCATOR: mm::heap::KernelHeap = mm::heap::KernelHeap;

#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Architecture-agnostic entry point, called once from `arch::x86::entry`
/// after the multiboot handoff has been validated. Never returns: the last
/// step hands off to the scheduler's run loop.
#[cfg(target_os = "none")]
pub fn kernel_main(info: &arch::x86::multiboot::BootInfo) -> ! {
    arch::x86::entry::arch_early_init();
    logging::init(log::LevelFilter::Info);

    log::info!("nanokern starting");
    arch::x86::init();
    mm::init(info.mem_size_bytes());
    exception::init();
    syscall::init();
    sched::init();

    sched::spawn(32, "init", DEFAULT_STACK_SIZE, 0, init_thread, 0)
        .expect("spawn init thread");

    log::info!("entering scheduler");
    sched::run();
}

extern "C" fn init_thread(_arg: usize) -> ! {
    log::info!("init thread running");
    sched::exit(0);
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    arch::x86::entry::arch_panic_handler(info);
    arch::x86::halt();
}

/// Heap allocation error handler.
///
/// Panic is intentional: heap allocation failure in a no_std kernel is
/// unrecoverable. The alloc_error_handler ABI requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {layout:?}");
}
