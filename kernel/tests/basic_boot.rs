//! Smoke test: bring up GDT/IDT/paging/heap by hand (no multiboot loader in
//! this harness) and confirm the kernel doesn't fault doing so.

#![no_std]
#![no_main]

extern crate alloc;

use core::panic::PanicInfo;

use nanokern::{arch, exception, mm, serial_println, sync::futex};

#[path = "common/mod.rs"]
mod common;

use common::{exit_qemu, QemuExitCode};

const TEST_MEM_SIZE: u32 = 16 * 1024 * 1024;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("starting basic boot test...");

    arch::x86::entry::arch_early_init();
    arch::x86::init();
    mm::init(TEST_MEM_SIZE);
    exception::init();

    test_heap_alloc();
    test_vmm_round_trip();
    test_futex_wake_without_waiters();

    serial_println!("all tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    common::test_panic_handler(info)
}

fn test_heap_alloc() {
    use alloc::vec::Vec;

    let mut v: Vec<u32> = Vec::new();
    for i in 0..256 {
        v.push(i);
    }
    assert_eq!(v.len(), 256);
    assert_eq!(v[255], 255);
    serial_println!("heap alloc ok");
}

fn test_vmm_round_trip() {
    let virt = mm::VirtAddr::new(0x0040_0000);
    mm::vmm::kmap(virt, mm::PAGE_SIZE, false, false).expect("kmap");
    unsafe {
        (virt.as_u32() as *mut u32).write_volatile(0xDEAD_BEEF);
        assert_eq!((virt.as_u32() as *const u32).read_volatile(), 0xDEAD_BEEF);
    }
    mm::vmm::kunmap(virt, mm::PAGE_SIZE).expect("kunmap");
    serial_println!("vmm round trip ok");
}

fn test_futex_wake_without_waiters() {
    let virt = mm::VirtAddr::new(0x0040_1000);
    mm::vmm::kmap(virt, mm::PAGE_SIZE, false, false).expect("kmap");
    let woken = futex::wake(virt.as_u32(), 1).expect("wake with no waiters");
    assert_eq!(woken, 0);
    mm::vmm::kunmap(virt, mm::PAGE_SIZE).expect("kunmap");
    serial_println!("futex wake-without-waiters ok");
}
