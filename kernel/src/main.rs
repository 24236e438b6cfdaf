//! Kernel entry point and boot sequence.
//!
//! The stage-2 loader enters `_start` in long mode with paging active,
//! an identity mapping over low physical memory, and the E820 snapshot
//! at its fixed address. Initialization order is load-bearing: the PIC
//! must be remapped and masked before the IDT goes live, memory comes
//! up before anything allocates, and IRQ lines open only after their
//! handlers exist.

#![no_std]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(not(target_os = "none"))]
extern crate std;

#[cfg(target_os = "none")]
use ferrite_kernel::{
    arch,
    arch::x86_64::{gdt, idt, pic, pit, vga},
    drivers, logger, mm, println, sched, shell,
};

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("[KERNEL PANIC] {}", info);
    arch::halt();
}

#[cfg(target_os = "none")]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    vga::clear_screen();
    println!("ferrite-os v{}", env!("CARGO_PKG_VERSION"));

    // Interrupt plumbing first: remap and mask the PIC before any gate
    // can fire, then segments and the TSS, then the IDT itself.
    pic::init();
    gdt::init();
    idt::init();

    // Memory: physical frames, the loader's page tables, then logging
    // (the logger is allocation-free but lives above the console).
    mm::pmm::init();
    mm::vmm::init();
    logger::init();

    // Ring-3 gate.
    arch::x86_64::syscall::init();

    // Tasks: the sentinel for this boot context, then the shell.
    sched::init();
    if let Err(err) = sched::spawn("shell", shell_task, sched::DEFAULT_STACK_SIZE) {
        println!("[BOOT] failed to start shell: {}", err);
        arch::halt();
    }

    // Timer and keyboard handlers, then open their lines and go.
    pit::init();
    drivers::keyboard::init();
    pit::enable_scheduler();
    pic::clear_mask(0);
    pic::clear_mask(1);
    x86_64::instructions::interrupts::enable();

    println!("[BOOT] ferrite-os up, scheduling enabled");

    // The boot context becomes the PID-0 idle loop: it only runs again
    // when no task is ready.
    loop {
        arch::x86_64::wait_for_interrupt();
    }
}

/// Body of the shell task.
#[cfg(target_os = "none")]
extern "C" fn shell_task() -> ! {
    let mut shell = shell::Shell::new();
    shell.run()
}

/// Host builds of this binary do nothing; the kernel only runs on the
/// bare-metal target. The library's test suite carries the host story.
#[cfg(not(target_os = "none"))]
fn main() {}
