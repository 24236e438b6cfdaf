//! SYSCALL/SYSRET gate and the per-CPU block.
//!
//! Both `GS.Base` and `KernelGS.Base` point at the same static per-CPU
//! block, so the `swapgs` on entry and the one on exit are idempotent no
//! matter which ring started execution; the kernel can reach its stack
//! slot through `gs:` unconditionally.

use core::arch::naked_asm;
use core::cell::UnsafeCell;

use x86_64::VirtAddr;

use super::gdt;

/// Per-CPU data, addressed through the GS base.
///
/// Layout contract: `syscall_entry` hardcodes the offsets
/// (kernel_stack = gs:[0], user_stack = gs:[8]).
#[repr(C, align(16))]
struct PerCpu {
    /// Stack loaded on SYSCALL entry; kept in sync with TSS RSP0.
    kernel_stack: u64,
    /// User RSP stashed across the syscall.
    user_stack: u64,
    /// Raw pointer to the current task's TCB, for future use by handlers.
    current_task: u64,
}

struct PerCpuCell(UnsafeCell<PerCpu>);

// SAFETY: Single CPU; mutation happens either during boot or inside the
// syscall path with interrupts masked by SFMASK.
unsafe impl Sync for PerCpuCell {}

static PER_CPU: PerCpuCell = PerCpuCell(UnsafeCell::new(PerCpu {
    kernel_stack: 0,
    user_stack: 0,
    current_task: 0,
}));

/// Record the kernel stack used for ring-3 -> ring-0 transitions.
pub fn set_kernel_stack(stack_top: u64) {
    // SAFETY: Plain store to the per-CPU slot; the syscall path only
    // reads it at entry, and callers install the stack before any ring-3
    // code can run on it.
    unsafe {
        (*PER_CPU.0.get()).kernel_stack = stack_top;
    }
}

/// Kernel stack currently installed for SYSCALL entry.
pub fn kernel_stack() -> u64 {
    // SAFETY: Plain load, see set_kernel_stack.
    unsafe { (*PER_CPU.0.get()).kernel_stack }
}

/// SYSCALL entry trampoline.
///
/// Register state on entry (defined by the CPU): RCX = user RIP,
/// R11 = user RFLAGS, RAX = syscall number, RDI/RSI/RDX = arguments.
/// The stub pivots to the kernel stack, pushes the user RSP/RFLAGS/RIP in
/// `sysretq`-compatible order, marshals the arguments into the SysV call
/// `syscall_handler(num, a1, a2, a3)`, and returns to ring 3.
///
/// # Safety
///
/// Only the CPU's SYSCALL instruction may enter here, after `init()` has
/// installed the per-CPU block and a valid kernel stack.
#[unsafe(naked)]
pub unsafe extern "C" fn syscall_entry() {
    naked_asm!(
        "swapgs",
        "mov gs:[0x8], rsp",        // stash user RSP
        "mov rsp, gs:[0x0]",        // pivot to the kernel stack
        "push qword ptr gs:[0x8]",  // saved user RSP
        "push r11",                 // user RFLAGS
        "push rcx",                 // user RIP
        "sub rsp, 8",               // SysV call alignment
        // (rax, rdi, rsi, rdx) -> (rdi, rsi, rdx, rcx); RCX/R11 are
        // already saved, so they are free as argument registers.
        "mov rcx, rdx",
        "mov rdx, rsi",
        "mov rsi, rdi",
        "mov rdi, rax",
        "call {handler}",
        "add rsp, 8",
        "pop rcx",                  // user RIP for sysretq
        "pop r11",                  // user RFLAGS for sysretq
        "mov rsp, gs:[0x8]",        // back to the user stack
        "swapgs",
        "sysretq",
        handler = sym crate::syscall::syscall_handler,
    );
}

/// Configure the SYSCALL/SYSRET MSRs and install the per-CPU block.
pub fn init() {
    use x86_64::registers::{
        model_specific::{Efer, EferFlags, GsBase, KernelGsBase, LStar, SFMask, Star},
        rflags::RFlags,
    };

    let selectors = gdt::selectors();
    let per_cpu = VirtAddr::from_ptr(PER_CPU.0.get());

    // SAFETY: Boot-time MSR setup. STAR is derived from the loaded GDT's
    // selector layout; LSTAR points at the trampoline above; SFMASK
    // clears IF/TF/DF on entry so the trampoline runs with interrupts
    // off on a well-defined flags state. Pointing both GS bases at the
    // same block makes repeated swapgs harmless.
    unsafe {
        Efer::update(|flags| flags.insert(EferFlags::SYSTEM_CALL_EXTENSIONS));
        Star::write(
            selectors.user_code,
            selectors.user_data,
            selectors.kernel_code,
            selectors.kernel_data,
        )
        .expect("GDT selector layout incompatible with STAR");
        LStar::write(VirtAddr::new(syscall_entry as usize as u64));
        SFMask::write(RFlags::INTERRUPT_FLAG | RFlags::TRAP_FLAG | RFlags::DIRECTION_FLAG);
        GsBase::write(per_cpu);
        KernelGsBase::write(per_cpu);
    }

    println!("[SYSCALL] syscall/sysret gate ready (per-cpu at {:#x})", per_cpu.as_u64());
}
