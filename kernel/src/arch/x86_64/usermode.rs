//! Ring 3 entry.
//!
//! `jump_to_usermode` builds an `iretq` frame with the ring-3 selectors
//! and drops into user code. The embedded demo payload is
//! position-independent machine code that exercises the syscall gate:
//! `write(1, "Hello Ring 3!\n", 14)` followed by `exit(0)`.

use core::arch::asm;

use super::gdt;

/// Enter ring 3 at `user_rip` with stack `user_rsp`.
///
/// # Safety
///
/// - Code and stack pages must be mapped with the USER flag and the TLB
///   flushed.
/// - The TSS RSP0 and the per-CPU kernel stack must point at the same
///   valid ring-0 stack, or the first syscall/interrupt will crash.
pub unsafe fn jump_to_usermode(user_rsp: u64, user_rip: u64) -> ! {
    let selectors = gdt::selectors();
    let user_ss = selectors.user_data.0 as u64; // 0x1B
    let user_cs = selectors.user_code.0 as u64; // 0x23

    // SAFETY: Caller upholds the mapping and stack preconditions. The
    // swapgs keeps the GS discipline balanced; both bases alias the same
    // per-CPU block so the pivot direction does not matter. RFLAGS 0x202
    // = IF plus the always-one reserved bit.
    unsafe {
        asm!(
            "swapgs",
            "mov ds, {ss:x}",
            "mov es, {ss:x}",
            "push {ss}",        // SS
            "push {rsp}",       // RSP
            "push {rflags}",    // RFLAGS
            "push {cs}",        // CS
            "push {rip}",       // RIP
            "iretq",
            ss = in(reg) user_ss,
            rsp = in(reg) user_rsp,
            rflags = in(reg) 0x202u64,
            cs = in(reg) user_cs,
            rip = in(reg) user_rip,
            options(noreturn),
        );
    }
}

/// Position-independent ring-3 demo payload.
///
/// Layout (offsets in bytes):
/// - 0x00 `lea rsi, [rip+0x22]`, RSI = address of the message
/// - 0x07 `mov rax, 1`, SYS_WRITE
/// - 0x0E `mov rdi, 1`, fd = stdout
/// - 0x15 `mov rdx, 14`, length
/// - 0x1C `syscall`
/// - 0x1E `mov rax, 0`, SYS_EXIT
/// - 0x25 `syscall`
/// - 0x27 `jmp $`, safety net (never reached)
/// - 0x29 message bytes
pub static DEMO_PAYLOAD: [u8; 56] = [
    0x48, 0x8d, 0x35, 0x22, 0x00, 0x00, 0x00, // lea rsi, [rip+0x22]
    0x48, 0xc7, 0xc0, 0x01, 0x00, 0x00, 0x00, // mov rax, 1
    0x48, 0xc7, 0xc7, 0x01, 0x00, 0x00, 0x00, // mov rdi, 1
    0x48, 0xc7, 0xc2, 0x0e, 0x00, 0x00, 0x00, // mov rdx, 14
    0x0f, 0x05, // syscall
    0x48, 0xc7, 0xc0, 0x00, 0x00, 0x00, 0x00, // mov rax, 0
    0x0f, 0x05, // syscall
    0xeb, 0xfe, // jmp $
    b'H', b'e', b'l', b'l', b'o', b' ', b'R', b'i', b'n', b'g', b' ', b'3', b'!', b'\n', 0,
];
