//! End-to-end scheduler tests: spawn, priority ordering, sleep, and a
//! contended mutex. Runs entirely inside spawned threads, since the
//! scheduler's run loop never returns.

#![no_std]
#![no_main]

extern crate alloc;

use core::panic::PanicInfo;
use core::sync::atomic::{AtomicU32, Ordering};

use nanokern::arch;
use nanokern::mm;
use nanokern::sched;
use nanokern::serial_println;
use nanokern::sync::Mutex;

#[path = "common/mod.rs"]
mod common;

use common::{exit_qemu, QemuExitCode};

const TEST_MEM_SIZE: u32 = 16 * 1024 * 1024;
const STACK_SIZE: usize = 16 * 1024;

static ORDER: AtomicU32 = AtomicU32::new(0);
static HIGH_SLOT: AtomicU32 = AtomicU32::new(u32::MAX);
static LOW_SLOT: AtomicU32 = AtomicU32::new(u32::MAX);

static COUNTER: AtomicU32 = AtomicU32::new(0);
static MUTEX: Mutex = Mutex::new(false, None);

#[no_mangle]
pub extern "C" fn _start() -> ! {
    common::init_test_env("scheduler");

    arch::x86::entry::arch_early_init();
    arch::x86::init();
    mm::init(TEST_MEM_SIZE);
    nanokern::exception::init();
    sched::init();

    sched::spawn(60, "harness", STACK_SIZE, 0, harness, 0).expect("spawn harness");
    sched::run();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    common::test_panic_handler(info)
}

extern "C" fn harness(_arg: usize) -> ! {
    test_priority_ordering();
    test_sleep_wakes();
    test_mutex_excludes_contenders();

    serial_println!("all tests passed!");
    exit_qemu(QemuExitCode::Success)
}

fn test_priority_ordering() {
    // Lower numeric priority wins the ready queue, so "high" gets the
    // smaller number.
    let low = sched::spawn(50, "low", STACK_SIZE, 0, low_priority_worker, 0).expect("spawn low");
    let high =
        sched::spawn(10, "high", STACK_SIZE, 0, high_priority_worker, 0).expect("spawn high");

    sched::join(low).expect("join low");
    sched::join(high).expect("join high");

    assert!(HIGH_SLOT.load(Ordering::Acquire) < LOW_SLOT.load(Ordering::Acquire));
    serial_println!("priority ordering ok");
}

extern "C" fn high_priority_worker(_arg: usize) -> ! {
    HIGH_SLOT.store(ORDER.fetch_add(1, Ordering::AcqRel), Ordering::Release);
    sched::exit(0);
}

extern "C" fn low_priority_worker(_arg: usize) -> ! {
    LOW_SLOT.store(ORDER.fetch_add(1, Ordering::AcqRel), Ordering::Release);
    sched::exit(0);
}

fn test_sleep_wakes() {
    let before = sched_now_ms();
    sched::sleep(20).expect("sleep");
    let after = sched_now_ms();
    assert!(after >= before, "clock must not go backwards across a sleep");
    serial_println!("sleep ok");
}

fn sched_now_ms() -> u64 {
    arch::x86::timer::ticks() * arch::x86::timer::tick_period_ms() as u64
}

fn test_mutex_excludes_contenders() {
    const WORKERS: usize = 4;
    const INCREMENTS: u32 = 64;

    let mut ids = alloc::vec::Vec::with_capacity(WORKERS);
    for _ in 0..WORKERS {
        ids.push(
            sched::spawn(30, "contender", STACK_SIZE, 0, mutex_worker, INCREMENTS as usize)
                .expect("spawn contender"),
        );
    }
    for id in ids {
        sched::join(id).expect("join contender");
    }

    assert_eq!(COUNTER.load(Ordering::Acquire), WORKERS as u32 * INCREMENTS);
    serial_println!("mutex contention ok");
}

extern "C" fn mutex_worker(increments: usize) -> ! {
    for _ in 0..increments {
        MUTEX.lock().expect("lock");
        let v = COUNTER.load(Ordering::Relaxed);
        COUNTER.store(v + 1, Ordering::Relaxed);
        MUTEX.unlock().expect("unlock");
    }
    sched::exit(0);
}
