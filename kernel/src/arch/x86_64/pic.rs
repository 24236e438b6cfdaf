//! 8259 PIC pair, remapped to vectors 0x20-0x2F.

use pic8259::ChainedPics;
use spin::Mutex;

/// Vector base of the master PIC after remapping.
pub const PIC_1_OFFSET: u8 = 32;
/// Vector base of the slave PIC after remapping.
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

// SAFETY: The offsets point above the CPU exception range, so remapped
// IRQs cannot alias exception vectors.
static PICS: Mutex<ChainedPics> = Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

/// Remap both PICs and mask every line. Lines are opened individually
/// once their handlers are installed.
pub fn init() {
    // SAFETY: Standard 8259 initialization sequence on the standard
    // ports; runs once during boot with interrupts disabled.
    unsafe {
        PICS.lock().initialize();
        PICS.lock().write_masks(0xFF, 0xFF);
    }
}

/// Mask (disable) one IRQ line.
pub fn set_mask(irq: u8) {
    let mut pics = PICS.lock();
    // SAFETY: Reading and rewriting the interrupt mask registers has no
    // effect beyond enabling/disabling delivery of the given line.
    unsafe {
        let [mut master, mut slave] = pics.read_masks();
        if irq < 8 {
            master |= 1 << irq;
        } else {
            slave |= 1 << (irq - 8);
        }
        pics.write_masks(master, slave);
    }
}

/// Unmask (enable) one IRQ line.
pub fn clear_mask(irq: u8) {
    let mut pics = PICS.lock();
    // SAFETY: see set_mask.
    unsafe {
        let [mut master, mut slave] = pics.read_masks();
        if irq < 8 {
            master &= !(1 << irq);
        } else {
            slave &= !(1 << (irq - 8));
        }
        pics.write_masks(master, slave);
    }
}

/// Signal end-of-interrupt for the given vector. The slave PIC is
/// notified for vectors on its range, the master always.
pub fn end_of_interrupt(vector: u8) {
    // SAFETY: vector comes from the interrupt dispatcher and is within
    // the remapped IRQ range; notifying EOI re-arms the line.
    unsafe {
        PICS.lock().notify_end_of_interrupt(vector);
    }
}
