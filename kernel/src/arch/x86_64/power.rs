//! Reboot and shutdown.

/// QEMU ACPI suspend port; writing 0x2000 powers the VM off.
const QEMU_SHUTDOWN_PORT: u16 = 0x604;
const QEMU_SHUTDOWN_VALUE: u16 = 0x2000;

/// i8042 keyboard controller status/command port.
const I8042_STATUS: u16 = 0x64;
/// i8042 command: pulse the CPU reset line.
const I8042_RESET: u8 = 0xFE;

/// Power the machine off (QEMU and compatible hypervisors).
pub fn shutdown() -> ! {
    use x86_64::instructions::port::Port;
    let mut port: Port<u16> = Port::new(QEMU_SHUTDOWN_PORT);
    // SAFETY: Port 0x604 is the QEMU ACPI PM1a control block; the write
    // terminates the VM. On real hardware it is a no-op and we halt.
    unsafe {
        port.write(QEMU_SHUTDOWN_VALUE);
    }
    super::halt()
}

/// Reset the machine through the keyboard controller, falling back to a
/// forced triple fault.
pub fn reboot() -> ! {
    use x86_64::instructions::port::Port;

    let mut status: Port<u8> = Port::new(I8042_STATUS);
    let mut data: Port<u8> = Port::new(0x60);

    // SAFETY: Draining the i8042 output buffer and issuing the 0xFE reset
    // pulse is the standard legacy reset protocol.
    unsafe {
        for _ in 0..1024 {
            if status.read() & 0x02 == 0 {
                break;
            }
            let _ = data.read();
        }
        status.write(I8042_RESET);
    }

    // Fallback when the controller does not reset us: load an empty IDT
    // and take a breakpoint. The unservable exception escalates to a
    // triple fault, which resets the CPU. Order matters: the 0xFE pulse
    // must already be on the wire before the IDT is torn down.
    #[repr(C, packed)]
    struct NullIdt {
        limit: u16,
        base: u64,
    }
    let null_idt = NullIdt { limit: 0, base: 0 };
    // SAFETY: Deliberately unrecoverable; the CPU resets on the resulting
    // triple fault.
    unsafe {
        core::arch::asm!(
            "lidt [{}]",
            "int3",
            in(reg) &null_idt,
            options(noreturn),
        );
    }
}
