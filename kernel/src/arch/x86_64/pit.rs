//! Programmable Interval Timer: 100 Hz system tick and scheduler hook.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::interrupts::{self, RegisterFrame};

/// PIT input clock in Hz.
const PIT_INPUT_HZ: u32 = 1_193_182;
/// System tick rate.
pub const TICK_HZ: u32 = 100;
/// Scheduler quantum in ticks (10 ticks = 100 ms at 100 Hz).
const QUANTUM_TICKS: u64 = 10;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
/// Channel 0, lobyte/hibyte access, mode 3 (square wave), binary.
const PIT_MODE: u8 = 0x36;

static TICKS: AtomicU64 = AtomicU64::new(0);
static SCHEDULER_ENABLED: AtomicBool = AtomicBool::new(false);

/// Monotonic tick count since boot; increments once per IRQ0.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Whole seconds since boot.
pub fn uptime_seconds() -> u64 {
    ticks() / TICK_HZ as u64
}

/// Allow the IRQ0 handler to start preempting tasks.
pub fn enable_scheduler() {
    SCHEDULER_ENABLED.store(true, Ordering::Release);
}

/// Program channel 0 for periodic interrupts and register the IRQ0
/// handler. The line stays masked until boot unmasks it.
pub fn init() {
    let divisor = (PIT_INPUT_HZ / TICK_HZ) as u16;

    use x86_64::instructions::port::Port;
    let mut command: Port<u8> = Port::new(PIT_COMMAND);
    let mut data: Port<u8> = Port::new(PIT_CHANNEL0);

    // SAFETY: Standard PIT programming sequence: mode byte, then the
    // divisor low byte and high byte on the channel 0 data port.
    unsafe {
        command.write(PIT_MODE);
        data.write((divisor & 0xFF) as u8);
        data.write((divisor >> 8) as u8);
    }

    interrupts::register_irq_handler(0, timer_irq_handler);
}

/// IRQ0: bump the tick counter and, on quantum boundaries, hand the
/// interrupted frame to the scheduler. A changed return value redirects
/// the IRQ exit path onto the selected task's stack.
fn timer_irq_handler(_irq: u8, frame: *mut RegisterFrame) -> *mut RegisterFrame {
    let now = TICKS.fetch_add(1, Ordering::Relaxed) + 1;

    if SCHEDULER_ENABLED.load(Ordering::Acquire) && now % QUANTUM_TICKS == 0 {
        return crate::sched::timer_tick(frame, now);
    }

    frame
}
