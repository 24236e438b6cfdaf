//! Shell command table and implementations.

use crate::arch::x86_64::{self, pit, power, rtc, usermode, vga};
use crate::mm::{heap, pmm, vmm, PhysicalAddress, VirtualAddress, PAGE_SIZE};
use crate::sched;

/// One shell command.
pub struct Command {
    pub name: &'static str,
    pub help: &'static str,
    pub run: fn(&str),
}

pub static COMMANDS: [Command; 19] = [
    Command { name: "help", help: "Show this help message", run: cmd_help },
    Command { name: "clear", help: "Clear the screen", run: cmd_clear },
    Command { name: "info", help: "Show system information", run: cmd_info },
    Command { name: "echo", help: "Echo arguments to screen", run: cmd_echo },
    Command { name: "color", help: "Change text color (usage: color <fg> <bg>)", run: cmd_color },
    Command { name: "mem", help: "Show memory information", run: cmd_mem },
    Command { name: "mmap", help: "Show physical memory map", run: cmd_mmap },
    Command { name: "meminfo", help: "Show detailed memory statistics", run: cmd_meminfo },
    Command { name: "memtest", help: "Run memory stress tests", run: cmd_memtest },
    Command { name: "time", help: "Show current time", run: cmd_time },
    Command { name: "uptime", help: "Show system uptime", run: cmd_uptime },
    Command { name: "tasks", help: "List all tasks", run: cmd_tasks },
    Command { name: "reboot", help: "Reboot the system", run: cmd_reboot },
    Command { name: "shutdown", help: "Shutdown the system", run: cmd_shutdown },
    Command { name: "halt", help: "Halt the system", run: cmd_halt },
    Command { name: "netconf", help: "Show network configuration", run: cmd_netconf },
    Command { name: "fault", help: "Trigger CPU exceptions (usage: fault <div0|ud|pf>)", run: cmd_fault },
    Command { name: "vmtest", help: "Test the virtual memory manager", run: cmd_vmtest },
    Command { name: "usertest", help: "Run the ring 3 demo payload", run: cmd_usertest },
];

/// Find a command by name.
pub fn find(name: &str) -> Option<&'static Command> {
    COMMANDS.iter().find(|c| c.name == name)
}

fn cmd_help(_args: &str) {
    println!("Available commands:");
    for command in COMMANDS.iter() {
        println!("  {:10} - {}", command.name, command.help);
    }
}

fn cmd_clear(_args: &str) {
    vga::clear_screen();
}

fn cmd_info(_args: &str) {
    println!("ferrite-os v{}", env!("CARGO_PKG_VERSION"));
    println!("  Architecture: x86_64 (long mode)");
    println!("  Video:        VGA text mode 80x25 at {:#x}", 0xB8000);
    println!("  Kernel at:    {:#x} (1 MiB)", 0x100000);
    println!("  Timer:        PIT channel 0 at {} Hz", pit::TICK_HZ);
    println!("  Tasks:        {} of {} slots in use", sched::task_count(), sched::MAX_TASKS);
}

fn cmd_echo(args: &str) {
    println!("{}", args);
}

fn cmd_color(args: &str) {
    let mut words = args.split_whitespace();
    let fg = words.next().and_then(vga::Color::from_name);
    let bg = words.next().and_then(vga::Color::from_name);
    match (fg, bg) {
        (Some(fg), Some(bg)) => vga::set_color(fg, bg),
        _ => {
            println!("usage: color <fg> <bg>");
            println!("colors: black blue green cyan red magenta brown gray");
            println!("        darkgray lightblue lightgreen lightcyan lightred");
            println!("        pink yellow white");
        }
    }
}

fn cmd_mem(_args: &str) {
    println!("Memory layout (approximate):");
    println!("  0x00000000 - 0x000003FF  IVT (real mode)");
    println!("  0x00000400 - 0x000004FF  BIOS data area");
    println!("  0x00007C00 - 0x00007DFF  bootloader stage 1");
    println!("  0x00007E00 - 0x0000BDFF  bootloader stage 2");
    println!("  0x00010000 - 0x00010FFF  BIOS memory map snapshot");
    println!("  0x000B8000 - 0x000B8F9F  VGA text buffer");
    println!("  0x00100000 - ...         kernel image + frame bitmap");
    println!("  {:#x}       kernel heap window", heap::HEAP_START);
}

fn cmd_mmap(_args: &str) {
    let shown = pmm::with_memory_map(|map| {
        println!("BIOS memory map ({} entries):", map.len());
        for region in map.iter() {
            let kind = match region.kind {
                1 => "usable",
                2 => "reserved",
                3 => "ACPI reclaimable",
                4 => "ACPI NVS",
                5 => "bad memory",
                _ => "unknown",
            };
            println!(
                "  {:#018x} - {:#018x}  {:8} KiB  {}",
                region.base,
                region.end(),
                region.length / 1024,
                kind,
            );
        }
    });
    if shown.is_none() {
        println!("memory map not captured");
    }
}

fn cmd_meminfo(_args: &str) {
    println!("=== Memory information ===");

    let Some((total, used)) = pmm::stats() else {
        println!("physical memory manager not initialized");
        return;
    };
    let free = total - used;
    let page_kib = PAGE_SIZE as u64 / 1024;
    vga::set_color(vga::Color::LightCyan, vga::Color::Black);
    println!("Physical memory manager:");
    vga::set_color(vga::Color::White, vga::Color::Black);
    println!("  total pages: {:8} ({} KiB)", total, total * page_kib);
    println!("  used pages:  {:8} ({} KiB)", used, used * page_kib);
    println!("  free pages:  {:8} ({} KiB)", free, free * page_kib);
    println!("  usage:       {}%", used * 100 / total.max(1));

    vga::set_color(vga::Color::LightCyan, vga::Color::Black);
    println!("Virtual memory manager:");
    vga::set_color(vga::Color::White, vga::Color::Black);
    match vmm::root() {
        Some(root) => println!("  PML4 at:     {:#x}", root.as_u64()),
        None => println!("  PML4 at:     (not initialized)"),
    }
    println!("  page size:   4 KiB, 4 levels (PML4 -> PDPT -> PD -> PT)");

    vga::set_color(vga::Color::LightCyan, vga::Color::Black);
    println!("Kernel heap:");
    vga::set_color(vga::Color::White, vga::Color::Black);
    let consumed = heap::current_size();
    println!(
        "  window:      {:#x} + {} MiB",
        heap::HEAP_START,
        heap::HEAP_SIZE / (1024 * 1024)
    );
    println!("  allocated:   {} bytes total", heap::total_allocated());
    println!("  consumed:    {} bytes", consumed);
    println!("  pages mapped: {}", consumed.div_ceil(PAGE_SIZE as u64));
}

/// Bulk VMM and heap stress: 50 mapped frames with distinct patterns,
/// then 100 heap allocations with byte patterns, all verified.
fn cmd_memtest(_args: &str) {
    const FRAMES: u64 = 50;
    const BULK_BASE: u64 = 0xFFFF_9000_0000_0000;

    println!("=== Memory stress test ===");

    let mut frames = [PhysicalAddress::new(0); FRAMES as usize];
    for (i, slot) in frames.iter_mut().enumerate() {
        match pmm::alloc_page() {
            Some(frame) => *slot = frame,
            None => {
                println!("  [FAIL] frame allocation {} failed", i);
                return;
            }
        }
    }

    for (i, frame) in frames.iter().enumerate() {
        let virt = VirtualAddress::new(BULK_BASE + i as u64 * PAGE_SIZE as u64);
        if let Err(err) = vmm::map_page(virt, *frame, vmm::PageFlags::PRESENT | vmm::PageFlags::WRITABLE) {
            println!("  [FAIL] map {}: {}", i, err);
            return;
        }
        // SAFETY: The page was just mapped writable.
        unsafe {
            (virt.as_u64() as *mut u64).write_volatile(0xDEAD_BEEF_0000_0000 | i as u64);
        }
    }

    let mut bad = 0;
    for (i, _) in frames.iter().enumerate() {
        let virt = VirtualAddress::new(BULK_BASE + i as u64 * PAGE_SIZE as u64);
        // SAFETY: Mapped and written above.
        let value = unsafe { (virt.as_u64() as *const u64).read_volatile() };
        if value != 0xDEAD_BEEF_0000_0000 | i as u64 {
            bad += 1;
        }
    }
    if bad == 0 {
        println!("  [PASS] 50 pages mapped, written, verified");
    } else {
        println!("  [FAIL] {} pages had wrong contents", bad);
    }

    for (i, frame) in frames.iter().enumerate() {
        let virt = VirtualAddress::new(BULK_BASE + i as u64 * PAGE_SIZE as u64);
        vmm::unmap_page(virt);
        if vmm::virt_to_phys(virt).is_some() {
            println!("  [FAIL] page {} still mapped after unmap", i);
            return;
        }
        pmm::free_page(*frame);
    }
    println!("  [PASS] all pages unmapped and freed");

    let mut heap_bad = 0;
    for i in 0..100u64 {
        let ptr = heap::kmalloc(256);
        if ptr.is_null() {
            println!("  [FAIL] kmalloc {} returned null", i);
            return;
        }
        // SAFETY: kmalloc returned a live 256-byte region.
        unsafe {
            for j in 0..256u64 {
                ptr.add(j as usize).write((i + j) as u8);
            }
            for j in 0..256u64 {
                if ptr.add(j as usize).read() != (i + j) as u8 {
                    heap_bad += 1;
                }
            }
        }
    }
    if heap_bad == 0 {
        println!("  [PASS] 100 heap allocations verified");
    } else {
        println!("  [FAIL] {} heap bytes had wrong contents", heap_bad);
    }
    println!("=== Memory stress test complete ===");
}

fn cmd_time(_args: &str) {
    let now = rtc::read();
    println!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        now.year, now.month, now.day, now.hour, now.minute, now.second
    );
}

fn cmd_uptime(_args: &str) {
    let seconds = pit::uptime_seconds();
    println!(
        "up {:02}:{:02}:{:02} ({} ticks at {} Hz)",
        seconds / 3600,
        (seconds / 60) % 60,
        seconds % 60,
        pit::ticks(),
        pit::TICK_HZ,
    );
}

fn cmd_tasks(_args: &str) {
    println!("  PID  STATE     STACK    NAME");
    for index in 0..sched::task_count() {
        if let Some(task) = sched::task_by_index(index) {
            println!(
                "  {:3}  {:8}  {:5} K  {}",
                task.pid,
                task.state.as_str(),
                task.stack_size / 1024,
                task.name,
            );
        }
    }
}

fn cmd_reboot(_args: &str) {
    println!("Rebooting...");
    power::reboot();
}

fn cmd_shutdown(_args: &str) {
    println!("Shutting down...");
    power::shutdown();
}

fn cmd_halt(_args: &str) {
    println!("System halted.");
    x86_64::halt();
}

fn cmd_netconf(_args: &str) {
    println!("No network interfaces configured.");
}

/// Deliberately raise a CPU exception to exercise the IDT paths.
fn cmd_fault(args: &str) {
    match args.trim() {
        "div0" => {
            println!("Triggering division by zero...");
            // SAFETY: Intentionally faults; the exception handler halts.
            unsafe {
                core::arch::asm!(
                    "xor edx, edx",
                    "xor ecx, ecx",
                    "mov eax, 1",
                    "div ecx",
                    out("eax") _,
                    out("ecx") _,
                    out("edx") _,
                );
            }
        }
        "ud" => {
            println!("Triggering invalid opcode...");
            // SAFETY: Intentionally faults; the exception handler halts.
            unsafe {
                core::arch::asm!("ud2");
            }
        }
        "pf" => {
            println!("Triggering page fault...");
            // SAFETY: Intentionally faults on an unmapped address; the
            // exception handler halts.
            unsafe {
                core::ptr::read_volatile(0xFFFF_F000_DEAD_0000u64 as *const u64);
            }
        }
        _ => println!("usage: fault <div0|ud|pf>"),
    }
}

/// Single-page VMM round trip with visible intermediate results.
fn cmd_vmtest(_args: &str) {
    println!("=== VMM test ===");

    let Some(frame) = pmm::alloc_page() else {
        println!("  [FAIL] no physical page available");
        return;
    };
    println!("  allocated physical page {:#x}", frame.as_u64());

    let virt = VirtualAddress::new(0xFFFF_8000_0000_1000);
    if let Err(err) = vmm::map_page(virt, frame, vmm::PageFlags::PRESENT | vmm::PageFlags::WRITABLE)
    {
        println!("  [FAIL] map: {}", err);
        pmm::free_page(frame);
        return;
    }
    println!("  mapped at {:#x}", virt.as_u64());

    match vmm::virt_to_phys(virt) {
        Some(resolved) if resolved == frame => println!("  [PASS] translation matches"),
        other => {
            println!("  [FAIL] translation mismatch: {:?}", other);
            return;
        }
    }

    // SAFETY: Just mapped writable.
    let readback = unsafe {
        let ptr = virt.as_u64() as *mut u64;
        ptr.write_volatile(0xDEAD_BEEF_CAFE_BABE);
        ptr.read_volatile()
    };
    if readback == 0xDEAD_BEEF_CAFE_BABE {
        println!("  [PASS] read/write through the mapping");
    } else {
        println!("  [FAIL] read back {:#x}", readback);
    }

    vmm::unmap_page(virt);
    if vmm::virt_to_phys(virt).is_none() {
        println!("  [PASS] unmapped");
    } else {
        println!("  [FAIL] still mapped after unmap");
    }

    pmm::free_page(frame);
    println!("=== VMM test complete ===");
}

/// Map the demo payload into low user memory and drop to ring 3.
fn cmd_usertest(_args: &str) {
    const USER_CODE: u64 = 0x40_0000;
    const USER_STACK: u64 = 0x80_0000;

    let (Some(code_frame), Some(stack_frame)) = (pmm::alloc_page(), pmm::alloc_page()) else {
        println!("usertest: out of physical memory");
        return;
    };

    let user_flags = vmm::PageFlags::PRESENT | vmm::PageFlags::WRITABLE | vmm::PageFlags::USER;
    if let Err(err) = vmm::map_page(VirtualAddress::new(USER_CODE), code_frame, user_flags) {
        println!("usertest: mapping code page failed: {}", err);
        return;
    }
    if let Err(err) = vmm::map_page(VirtualAddress::new(USER_STACK), stack_frame, user_flags) {
        println!("usertest: mapping stack page failed: {}", err);
        return;
    }

    // SAFETY: The code page was just mapped writable at USER_CODE.
    unsafe {
        core::ptr::copy_nonoverlapping(
            usermode::DEMO_PAYLOAD.as_ptr(),
            USER_CODE as *mut u8,
            usermode::DEMO_PAYLOAD.len(),
        );
    }

    // Ring-0 stack shared by the syscall gate and the TSS, so a fault
    // in ring 3 and a SYSCALL land on the same stack. The CPU writes to
    // it, hence static mut.
    const RING0_STACK_SIZE: usize = 8192;
    #[repr(align(16))]
    struct Ring0Stack([u8; RING0_STACK_SIZE]);
    static mut RING0_STACK: Ring0Stack = Ring0Stack([0; RING0_STACK_SIZE]);
    let stack_top = (&raw const RING0_STACK) as u64 + RING0_STACK_SIZE as u64;
    x86_64::set_ring0_stack(stack_top);

    vmm::flush_all();

    println!("Entering ring 3...");
    let user_stack_top = USER_STACK + PAGE_SIZE as u64 - 16;
    // SAFETY: Code and stack pages are mapped USER, the TLB is flushed,
    // and both ring-0 stack slots were just installed.
    unsafe {
        usermode::jump_to_usermode(user_stack_top, USER_CODE);
    }
}
