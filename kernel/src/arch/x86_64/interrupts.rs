//! Interrupt dispatch: register frame, exception diagnostics, IRQ routing.
//!
//! The assembly stubs in `stubs.rs` materialize a [`RegisterFrame`] on the
//! kernel stack and call [`interrupt_dispatch`] with its address. For CPU
//! exceptions the dispatcher prints a diagnostic and halts; for remapped
//! PIC IRQs it runs the registered handler and returns the frame pointer
//! to resume from. The returned pointer becomes RSP before the register
//! restore, which is how the scheduler redirects `iretq` onto another
//! task's stack.

use spin::Mutex;

use super::pic;

/// Saved CPU state as laid out by the interrupt stubs.
///
/// Layout contract:
/// - Field order must match the push/pop sequence in `stubs.rs` exactly
///   (lowest address first).
/// - The tail (`rip`..`ss`) is the hardware `iretq` frame; the CPU pushes
///   it on entry and pops it on exit.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct RegisterFrame {
    pub gs: u64,
    pub fs: u64,
    pub es: u64,
    pub ds: u64,
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,
    pub int_no: u64,
    pub err_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// Handler for a remapped PIC interrupt line.
///
/// Receives the IRQ number (0-15) and the interrupted frame; returns the
/// frame to resume, which may belong to a different task.
pub type IrqHandler = fn(u8, *mut RegisterFrame) -> *mut RegisterFrame;

static IRQ_HANDLERS: Mutex<[Option<IrqHandler>; 16]> = Mutex::new([None; 16]);

/// Register a handler for an IRQ line. Replaces any previous handler.
pub fn register_irq_handler(irq: u8, handler: IrqHandler) {
    if let Some(slot) = IRQ_HANDLERS.lock().get_mut(irq as usize) {
        *slot = Some(handler);
    }
}

static EXCEPTION_NAMES: [&str; 32] = [
    "Division By Zero",
    "Debug",
    "Non Maskable Interrupt",
    "Breakpoint",
    "Overflow",
    "Bound Range Exceeded",
    "Invalid Opcode",
    "Device Not Available",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Invalid TSS",
    "Segment Not Present",
    "Stack Fault",
    "General Protection Fault",
    "Page Fault",
    "Reserved",
    "x87 FPU Error",
    "Alignment Check",
    "Machine Check",
    "SIMD Floating-Point Exception",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Security Exception",
    "Reserved",
];

/// Common entry point called by the assembly stubs.
///
/// Returns the frame whose address the stub loads into RSP before the
/// register restore and `iretq`.
#[no_mangle]
extern "C" fn interrupt_dispatch(frame: *mut RegisterFrame) -> *mut RegisterFrame {
    // SAFETY: The stub hands us the address of the frame it just pushed
    // on the current kernel stack; it stays valid for the whole dispatch.
    let int_no = unsafe { (*frame).int_no };

    if int_no < 32 {
        // SAFETY: see above; the exception path only reads the frame.
        unsafe { exception_handler(&*frame) }
    }

    if (32..48).contains(&int_no) {
        let irq = (int_no - 32) as u8;
        let handler = IRQ_HANDLERS.lock()[irq as usize];
        let resume = match handler {
            Some(handler) => handler(irq, frame),
            None => frame,
        };
        pic::end_of_interrupt(int_no as u8);
        return resume;
    }

    frame
}

/// Print a fatal diagnostic for a CPU exception and halt.
///
/// Vector 8 (double fault) arrives here on IST1, so even a trashed kernel
/// stack yields a readable panel.
fn exception_handler(frame: &RegisterFrame) -> ! {
    use super::vga::{self, Color};

    let name = EXCEPTION_NAMES
        .get(frame.int_no as usize)
        .copied()
        .unwrap_or("Unknown");

    vga::set_color(Color::White, Color::Red);
    println!();
    println!("===========================================");
    println!("  EXCEPTION: {}", name);
    println!("===========================================");
    vga::set_color(Color::LightGray, Color::Black);
    println!("  INT#:    {}", frame.int_no);
    println!("  ERRCODE: {:#x}", frame.err_code);
    println!("  RIP:     {:#x}", frame.rip);
    println!("  CS:      {:#x}", frame.cs);
    println!("  RFLAGS:  {:#x}", frame.rflags);
    println!("  RSP:     {:#x}", frame.rsp);
    println!("  SS:      {:#x}", frame.ss);
    println!();
    println!("  RAX: {:#018x}  RBX: {:#018x}", frame.rax, frame.rbx);
    println!("  RCX: {:#018x}  RDX: {:#018x}", frame.rcx, frame.rdx);
    println!("  RSI: {:#018x}  RDI: {:#018x}", frame.rsi, frame.rdi);
    println!("  RBP: {:#018x}  R8:  {:#018x}", frame.rbp, frame.r8);
    vga::set_color(Color::White, Color::Black);
    println!();
    println!("System halted.");

    super::halt()
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use core::mem::{offset_of, size_of};

    use super::*;

    #[test]
    fn frame_layout_is_frozen() {
        // 4 segment slots + 15 GP registers + int_no/err_code + 5-word
        // hardware frame = 26 * 8 bytes.
        assert_eq!(size_of::<RegisterFrame>(), 208);
        assert_eq!(offset_of!(RegisterFrame, gs), 0);
        assert_eq!(offset_of!(RegisterFrame, ds), 24);
        assert_eq!(offset_of!(RegisterFrame, r15), 32);
        assert_eq!(offset_of!(RegisterFrame, rax), 144);
        assert_eq!(offset_of!(RegisterFrame, int_no), 152);
        assert_eq!(offset_of!(RegisterFrame, err_code), 160);
        assert_eq!(offset_of!(RegisterFrame, rip), 168);
        assert_eq!(offset_of!(RegisterFrame, ss), 200);
    }

    #[test]
    fn exception_names_cover_all_vectors() {
        assert_eq!(EXCEPTION_NAMES.len(), 32);
        assert_eq!(EXCEPTION_NAMES[0], "Division By Zero");
        assert_eq!(EXCEPTION_NAMES[8], "Double Fault");
        assert_eq!(EXCEPTION_NAMES[14], "Page Fault");
    }
}
