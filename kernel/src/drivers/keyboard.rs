//! PS/2 keyboard driver.
//!
//! The IRQ1 handler does the minimum possible in interrupt context: one
//! read of port 0x60, one push into a lock-free ring. Translation to
//! characters happens at read time in task context, through a single
//! `pc_keyboard` decoder that owns all modifier state (shift, ctrl, alt,
//! capslock) and swallows key-release scancodes.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use lazy_static::lazy_static;
use pc_keyboard::{layouts, DecodedKey, HandleControl, Keyboard, ScancodeSet1};
use spin::Mutex;

use crate::arch::x86_64::interrupts::{self, RegisterFrame};

/// PS/2 controller data port.
const DATA_PORT: u16 = 0x60;

/// Ring capacity. One slot is sacrificed to distinguish full from empty.
const RING_SIZE: usize = 256;

/// Lock-free single-producer single-consumer scancode ring.
///
/// The IRQ1 handler is the only producer and the shell task the only
/// consumer, so head and tail each have exactly one writer. A full ring
/// drops the incoming scancode.
pub struct ScancodeRing {
    buf: UnsafeCell<[u8; RING_SIZE]>,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// SAFETY: SPSC discipline; each index is written by one side only and
// the buffer slot is published before the head store (Release/Acquire).
unsafe impl Sync for ScancodeRing {}

impl ScancodeRing {
    pub const fn new() -> Self {
        Self {
            buf: UnsafeCell::new([0; RING_SIZE]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Enqueue from interrupt context. Returns false when the ring is
    /// full and the scancode was dropped.
    pub fn push(&self, scancode: u8) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) % RING_SIZE;
        if next == self.tail.load(Ordering::Acquire) {
            return false;
        }
        // SAFETY: Only the producer writes buf[head], and the consumer
        // will not read it until the head store below publishes it.
        unsafe {
            (*self.buf.get())[head] = scancode;
        }
        self.head.store(next, Ordering::Release);
        true
    }

    /// Dequeue from task context.
    pub fn pop(&self) -> Option<u8> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: The slot at tail was published by the producer's
        // Release store; only the consumer advances tail.
        let scancode = unsafe { (*self.buf.get())[tail] };
        self.tail.store((tail + 1) % RING_SIZE, Ordering::Release);
        Some(scancode)
    }

    pub fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Relaxed) == self.head.load(Ordering::Acquire)
    }
}

static SCANCODES: ScancodeRing = ScancodeRing::new();

lazy_static! {
    static ref DECODER: Mutex<Keyboard<layouts::Us104Key, ScancodeSet1>> = Mutex::new(
        Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::Ignore)
    );
}

/// Feed one scancode to a decoder, yielding a character for presses of
/// printable keys and `None` for releases, modifiers, and raw keys.
fn decode_with(
    keyboard: &mut Keyboard<layouts::Us104Key, ScancodeSet1>,
    scancode: u8,
) -> Option<char> {
    let event = keyboard.add_byte(scancode).ok().flatten()?;
    match keyboard.process_keyevent(event)? {
        DecodedKey::Unicode(c) => Some(c),
        DecodedKey::RawKey(_) => None,
    }
}

/// IRQ1: read the scancode and queue it. Dropping on overflow keeps the
/// handler constant-time.
fn keyboard_irq_handler(_irq: u8, frame: *mut RegisterFrame) -> *mut RegisterFrame {
    use x86_64::instructions::port::Port;
    let mut data: Port<u8> = Port::new(DATA_PORT);
    // SAFETY: Reading 0x60 acknowledges the byte the controller latched
    // for this interrupt.
    let scancode = unsafe { data.read() };
    if !SCANCODES.push(scancode) {
        log::debug!("keyboard: ring full, dropping scancode {:#x}", scancode);
    }
    frame
}

/// Register the IRQ1 handler. The line is unmasked by the boot sequence.
pub fn init() {
    interrupts::register_irq_handler(1, keyboard_irq_handler);
    println!("[KBD] keyboard driver ready");
}

/// Non-blocking read: next decoded character, if any scancode queued up
/// translates into one.
pub fn try_getchar() -> Option<char> {
    while let Some(scancode) = SCANCODES.pop() {
        if let Some(c) = decode_with(&mut DECODER.lock(), scancode) {
            return Some(c);
        }
    }
    None
}

/// Blocking read: halt until the ring yields a character. The CPU wakes
/// on every interrupt, including the scheduler tick.
pub fn getchar() -> char {
    loop {
        if let Some(c) = try_getchar() {
            return c;
        }
        crate::arch::x86_64::wait_for_interrupt();
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn decoder() -> Keyboard<layouts::Us104Key, ScancodeSet1> {
        Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::Ignore)
    }

    #[test]
    fn ring_is_fifo() {
        let ring = ScancodeRing::new();
        assert!(ring.is_empty());
        assert!(ring.push(1));
        assert!(ring.push(2));
        assert!(ring.push(3));
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), Some(3));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn ring_overflow_drops() {
        let ring = ScancodeRing::new();
        for i in 0..RING_SIZE - 1 {
            assert!(ring.push(i as u8), "slot {}", i);
        }
        // Full: the next push is dropped, nothing is overwritten.
        assert!(!ring.push(0xFF));
        assert_eq!(ring.pop(), Some(0));
        // One slot freed, pushing works again.
        assert!(ring.push(0xAA));
    }

    #[test]
    fn press_decodes_release_does_not() {
        let mut kb = decoder();
        // Scancode set 1: 0x1E = 'A' key make, 0x9E = break.
        assert_eq!(decode_with(&mut kb, 0x1E), Some('a'));
        assert_eq!(decode_with(&mut kb, 0x9E), None);
    }

    #[test]
    fn shift_modifier_uppercases() {
        let mut kb = decoder();
        // Left shift down (0x2A), 'a' -> 'A', shift up (0xAA), 'a' -> 'a'.
        assert_eq!(decode_with(&mut kb, 0x2A), None);
        assert_eq!(decode_with(&mut kb, 0x1E), Some('A'));
        assert_eq!(decode_with(&mut kb, 0xAA), None);
        assert_eq!(decode_with(&mut kb, 0x1E), Some('a'));
    }

    #[test]
    fn enter_and_backspace_map_to_control_chars() {
        let mut kb = decoder();
        // Enter decodes to a line terminator (CR or LF depending on the
        // layout table); the shell accepts either.
        let enter = decode_with(&mut kb, 0x1C).unwrap();
        assert!(enter == '\n' || enter == '\r');
        assert_eq!(decode_with(&mut kb, 0x0E), Some('\u{8}')); // Backspace
    }
}
