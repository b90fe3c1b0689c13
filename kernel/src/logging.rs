//! `log` crate backend.
//!
//! The teacher workspace declares `log` as a dependency but never installs a
//! `log::Log` implementation; this wires it to the serial backend so
//! `log::info!`/`log::warn!`/`log::debug!`/`log::error!` work everywhere in
//! the kernel, alongside the lower-level `println!`/`serial_println!` macros
//! used before `logging::init()` runs.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        crate::serial_println!(
            "[{:<5} {}] {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Installs the serial-backed logger as the global `log` sink.
///
/// Must run once, after serial output is usable (which is immediately,
/// since `arch::x86::serial::SERIAL1` lazily initializes itself) and before
/// any subsystem wants structured log output. Calling this twice is a
/// programmer error and panics, matching `log::set_logger`'s contract.
pub fn init(max_level: LevelFilter) {
    log::set_logger(&LOGGER).expect("logging::init called more than once");
    log::set_max_level(max_level);
}
