//! COM1 serial port, used for log output and headless diagnostics.

use core::fmt;

use lazy_static::lazy_static;
use spin::Mutex;

/// I/O base of the first serial port.
const COM1: u16 = 0x3F8;

lazy_static! {
    pub static ref SERIAL1: Mutex<uart_16550::SerialPort> = {
        // SAFETY: COM1 is the standard I/O address of the first 16550 UART
        // on PC hardware; nothing else in the kernel drives these ports.
        let mut port = unsafe { uart_16550::SerialPort::new(COM1) };
        port.init();
        Mutex::new(port)
    };
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    use x86_64::instructions::interrupts;

    interrupts::without_interrupts(|| {
        SERIAL1
            .lock()
            .write_fmt(args)
            .expect("serial write_fmt failed");
    });
}
