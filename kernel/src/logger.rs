//! `log` facade backend.
//!
//! Records go to the serial port so they survive screen clears and can be
//! captured when the kernel runs headless under QEMU. The VGA console is
//! reserved for user-facing output.

use log::{LevelFilter, Log, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        #[cfg(target_arch = "x86_64")]
        crate::serial_println!(
            "[{:5}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
        #[cfg(not(target_arch = "x86_64"))]
        let _ = record;
    }

    fn flush(&self) {}
}

/// Install the kernel logger. Safe to call once during boot.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Debug);
    }
}
