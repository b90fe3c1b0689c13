//! PIT (8253/8254) periodic timer, driving the scheduler tick.

use core::sync::atomic::{AtomicU64, Ordering};

use super::outb;

const PIT_FREQUENCY: u32 = 1_193_182;
const PIT_CHANNEL0_DATA: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;

/// Scheduler tick period. 10ms matches the teacher's default quantum.
const TICK_MS: u32 = 10;

static TICKS: AtomicU64 = AtomicU64::new(0);

pub fn init() {
    let divisor = PIT_FREQUENCY / (1000 / TICK_MS);
    unsafe {
        outb(PIT_COMMAND, 0x36); // channel 0, lobyte/hibyte, rate generator
        outb(PIT_CHANNEL0_DATA, (divisor & 0xFF) as u8);
        outb(PIT_CHANNEL0_DATA, (divisor >> 8) as u8);
    }
    super::set_irq_mask(0, false);
    log::info!("PIT configured for {TICK_MS}ms ticks");
}

pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

pub fn tick_period_ms() -> u32 {
    TICK_MS
}

/// Called from the IRQ0 handler (vector 32).
pub fn on_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    crate::sched::on_timer_tick();
}
