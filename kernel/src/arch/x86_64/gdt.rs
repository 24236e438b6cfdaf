//! Global Descriptor Table and Task State Segment.
//!
//! Selector layout is load-bearing: SYSRET derives its target selectors
//! from `STAR[63:48]` (= kernel data, 0x10) as SS = base+8 and
//! CS = base+16, which forces user data (0x18) to sit directly below user
//! code (0x20). The TSS descriptor spans two slots starting at 0x28.

use lazy_static::lazy_static;
use x86_64::{
    structures::{
        gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector},
        tss::TaskStateSegment,
    },
    VirtAddr,
};

/// Hardware IST slot used by the double-fault handler (IST1).
pub const DOUBLE_FAULT_IST_INDEX: u16 = 1;

const STACK_SIZE: usize = 4096 * 5;

lazy_static! {
    static ref TSS: TaskStateSegment = {
        let mut tss = TaskStateSegment::new();

        // RSP0: stack the CPU switches to on a ring-3 -> ring-0 transition.
        // Rewritten by set_kernel_stack whenever the active ring-0 stack
        // changes. Must be 16-byte aligned for the x86_64 ABI.
        tss.privilege_stack_table[0] = {
            #[repr(align(16))]
            struct AlignedStack([u8; STACK_SIZE]);
            static mut RING0_STACK: AlignedStack = AlignedStack([0; STACK_SIZE]);

            let stack_ptr = &raw const RING0_STACK;
            VirtAddr::from_ptr(stack_ptr) + STACK_SIZE as u64
        };

        // IST1: independent stack for the double-fault handler, so a
        // corrupted kernel stack still yields a readable diagnostic.
        tss.interrupt_stack_table[(DOUBLE_FAULT_IST_INDEX - 1) as usize] = {
            #[repr(align(16))]
            struct AlignedStack([u8; STACK_SIZE]);
            static mut DOUBLE_FAULT_STACK: AlignedStack = AlignedStack([0; STACK_SIZE]);

            let stack_ptr = &raw const DOUBLE_FAULT_STACK;
            VirtAddr::from_ptr(stack_ptr) + STACK_SIZE as u64
        };
        tss
    };
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let kernel_code = gdt.append(Descriptor::kernel_code_segment()); // 0x08
        let kernel_data = gdt.append(Descriptor::kernel_data_segment()); // 0x10
        let user_data = gdt.append(Descriptor::user_data_segment());    // 0x18 (RPL 3 = 0x1B)
        let user_code = gdt.append(Descriptor::user_code_segment());    // 0x20 (RPL 3 = 0x23)
        let tss = gdt.append(Descriptor::tss_segment(&TSS));            // 0x28 (2 slots)
        (
            gdt,
            Selectors {
                kernel_code,
                kernel_data,
                user_data,
                user_code,
                tss,
            },
        )
    };
}

/// GDT segment selectors.
///
/// Layout:
/// - 0x00: null descriptor
/// - 0x08: kernel code (ring 0)
/// - 0x10: kernel data (ring 0)
/// - 0x18: user data (ring 3, selector 0x1B with RPL)
/// - 0x20: user code (ring 3, selector 0x23 with RPL)
/// - 0x28: TSS (occupies 0x28-0x38)
pub struct Selectors {
    pub kernel_code: SegmentSelector,
    pub kernel_data: SegmentSelector,
    pub user_data: SegmentSelector,
    pub user_code: SegmentSelector,
    pub tss: SegmentSelector,
}

/// Load the GDT, reload the segment registers, and load the task register.
pub fn init() {
    use x86_64::instructions::{
        segmentation::{Segment, CS, DS, ES, SS},
        tables::load_tss,
    };

    GDT.0.load();
    // SAFETY: The selectors come from the table that was just loaded, so
    // every register is pointed at a valid descriptor. CS is reloaded via
    // the far-return sequence inside set_reg.
    unsafe {
        CS::set_reg(GDT.1.kernel_code);
        DS::set_reg(GDT.1.kernel_data);
        ES::set_reg(GDT.1.kernel_data);
        SS::set_reg(GDT.1.kernel_data);
        load_tss(GDT.1.tss);
    }
}

/// Selectors for the syscall gate and the user-mode jump.
///
/// The lazy_static initializes the table on first access; callers other
/// than `init()` must run after boot-time initialization.
pub fn selectors() -> &'static Selectors {
    &GDT.1
}

/// Update RSP0 in the TSS.
///
/// Called whenever the kernel stack used for ring-3 -> ring-0 transitions
/// changes. Must run with interrupts disabled.
pub fn set_kernel_stack(stack_top: u64) {
    // SAFETY: The TSS is a boot-time static; writing privilege_stack_table
    // through a raw pointer is sound because callers hold interrupts off,
    // so the CPU cannot consult RSP0 mid-store.
    unsafe {
        let tss_ptr = &*TSS as *const TaskStateSegment as *mut TaskStateSegment;
        (*tss_ptr).privilege_stack_table[0] = VirtAddr::new(stack_top);
    }
}

/// Read RSP0 back from the TSS.
pub fn kernel_stack() -> u64 {
    TSS.privilege_stack_table[0].as_u64()
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn selector_layout_matches_sysret_contract() {
        let s = selectors();
        assert_eq!(s.kernel_code.0, 0x08);
        assert_eq!(s.kernel_data.0, 0x10);
        // Ring-3 selectors carry RPL 3.
        assert_eq!(s.user_data.0, 0x1B);
        assert_eq!(s.user_code.0, 0x23);
        assert_eq!(s.tss.0, 0x28);
        // SYSRET loads SS = STAR[63:48]+8 and CS = STAR[63:48]+16; with
        // kernel data at 0x10 that lands exactly on user data/user code.
        assert_eq!(s.kernel_data.0 + 8 + 3, s.user_data.0);
        assert_eq!(s.kernel_data.0 + 16 + 3, s.user_code.0);
    }

    #[test]
    fn ist_stack_is_aligned() {
        let top = TSS.interrupt_stack_table[(DOUBLE_FAULT_IST_INDEX - 1) as usize];
        assert_eq!(top.as_u64() % 16, 0);
        assert_ne!(top.as_u64(), 0);
    }
}
