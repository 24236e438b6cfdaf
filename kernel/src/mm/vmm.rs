//! Virtual memory manager.
//!
//! Four-level page-table walker with on-demand intermediate table
//! creation. Table frames are dereferenced through a linear physical
//! offset carried by the address space: zero on bare metal, where the
//! boot contract identity-maps low physical memory, and an arena base in
//! host tests.
//!
//! USER-bit propagation is the load-bearing subtlety: the CPU ANDs the
//! USER bits along the whole walk, so a user mapping must set USER on
//! every intermediate entry, including entries created earlier for
//! kernel-only mappings.

use bitflags::bitflags;

use super::{pmm::FrameSource, PhysicalAddress, VirtualAddress, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};

bitflags! {
    /// Page table entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const NO_CACHE = 1 << 4;
        const HUGE = 1 << 7;
    }
}

/// Physical address bits of a page table entry.
const ENTRY_ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

const ENTRY_COUNT: usize = 512;

#[inline]
fn mfence() {
    // SAFETY: mfence has no operands and no side effects beyond ordering.
    unsafe { core::arch::x86_64::_mm_mfence() }
}

/// A four-level address space rooted at a PML4 frame.
pub struct AddressSpace {
    pml4: PhysicalAddress,
    phys_base: u64,
}

impl AddressSpace {
    /// Wrap an existing PML4. `phys_base` is added to physical table
    /// addresses to obtain dereferenceable pointers.
    pub const fn new(pml4: PhysicalAddress, phys_base: u64) -> Self {
        Self { pml4, phys_base }
    }

    /// The address space the CPU is currently using (from CR3), accessed
    /// through the identity mapping.
    #[cfg(target_os = "none")]
    pub fn current() -> Self {
        use x86_64::registers::control::Cr3;
        let (frame, _) = Cr3::read();
        Self::new(PhysicalAddress::new(frame.start_address().as_u64()), 0)
    }

    pub fn root(&self) -> PhysicalAddress {
        self.pml4
    }

    /// The four 9-bit table indices of a canonical address, PML4 first.
    fn indices(virt: VirtualAddress) -> [usize; 4] {
        let addr = virt.as_u64();
        [
            ((addr >> 39) & 0x1FF) as usize,
            ((addr >> 30) & 0x1FF) as usize,
            ((addr >> 21) & 0x1FF) as usize,
            ((addr >> 12) & 0x1FF) as usize,
        ]
    }

    fn entry_ptr(&self, table: PhysicalAddress, index: usize) -> *mut u64 {
        (self.phys_base + table.as_u64() + (index * 8) as u64) as *mut u64
    }

    /// Map one 4 KiB page. Remapping an already-mapped address silently
    /// overwrites the previous leaf.
    pub fn map(
        &mut self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        flags: PageFlags,
        frames: &mut dyn FrameSource,
    ) -> KernelResult<()> {
        let [i4, i3, i2, i1] = Self::indices(virt);
        let user = flags.contains(PageFlags::USER);

        let mut table = self.pml4;
        for index in [i4, i3, i2] {
            table = self.descend(table, index, user, frames)?;
        }

        let leaf = self.entry_ptr(table, i1);
        // SAFETY: leaf points into a table frame reached through the
        // configured physical offset; the volatile store publishes the
        // mapping to the MMU.
        unsafe {
            leaf.write_volatile((phys.as_u64() & ENTRY_ADDR_MASK) | flags.bits() | PageFlags::PRESENT.bits());
        }
        mfence();
        flush_tlb(virt);
        Ok(())
    }

    /// Remove a 4 KiB mapping. Unmapping an unmapped address is a no-op.
    pub fn unmap(&mut self, virt: VirtualAddress) {
        let Some(leaf) = self.walk(virt) else {
            return;
        };
        // SAFETY: walk returned a live leaf pointer inside a present
        // table hierarchy.
        unsafe {
            if leaf.read_volatile() & PageFlags::PRESENT.bits() == 0 {
                return;
            }
            leaf.write_volatile(0);
        }
        mfence();
        flush_tlb(virt);
    }

    /// Resolve a virtual address to its physical counterpart, or `None`
    /// if any level of the walk is not present. Only 4 KiB mappings are
    /// managed; a huge-page entry terminates the walk unresolved.
    pub fn translate(&self, virt: VirtualAddress) -> Option<PhysicalAddress> {
        let leaf = self.walk(virt)?;
        // SAFETY: see unmap.
        let entry = unsafe { leaf.read_volatile() };
        if entry & PageFlags::PRESENT.bits() == 0 {
            return None;
        }
        Some(PhysicalAddress::new(
            (entry & ENTRY_ADDR_MASK) | virt.page_offset(),
        ))
    }

    /// Walk to the PT entry for `virt` without creating tables.
    fn walk(&self, virt: VirtualAddress) -> Option<*mut u64> {
        let [i4, i3, i2, i1] = Self::indices(virt);
        let mut table = self.pml4;
        for index in [i4, i3, i2] {
            let entry_ptr = self.entry_ptr(table, index);
            // SAFETY: entry_ptr stays within the 512-entry table frame.
            let entry = unsafe { entry_ptr.read_volatile() };
            if entry & PageFlags::PRESENT.bits() == 0 || entry & PageFlags::HUGE.bits() != 0 {
                return None;
            }
            table = PhysicalAddress::new(entry & ENTRY_ADDR_MASK);
        }
        Some(self.entry_ptr(table, i1))
    }

    /// Follow (or create) the next-level table behind `table[index]`.
    ///
    /// New tables are zeroed and installed PRESENT|WRITABLE, plus USER
    /// when the target mapping requests it. An existing kernel-only
    /// entry is retrofitted with USER for a user mapping.
    fn descend(
        &mut self,
        table: PhysicalAddress,
        index: usize,
        user: bool,
        frames: &mut dyn FrameSource,
    ) -> KernelResult<PhysicalAddress> {
        let entry_ptr = self.entry_ptr(table, index);
        // SAFETY: entry_ptr stays within the table frame.
        let entry = unsafe { entry_ptr.read_volatile() };

        if entry & PageFlags::PRESENT.bits() != 0 {
            if entry & PageFlags::HUGE.bits() != 0 {
                // A huge mapping occupies this slot; treating it as a
                // table pointer would corrupt the mapped frame.
                return Err(KernelError::InvalidState {
                    expected: "page table",
                    actual: "huge page mapping",
                });
            }
            if user && entry & PageFlags::USER.bits() == 0 {
                // SAFETY: Adding USER to a present intermediate entry
                // widens access without changing the translation.
                unsafe {
                    entry_ptr.write_volatile(entry | PageFlags::USER.bits());
                }
                mfence();
            }
            return Ok(PhysicalAddress::new(entry & ENTRY_ADDR_MASK));
        }

        let frame = frames.alloc_frame().ok_or(KernelError::OutOfMemory {
            requested: PAGE_SIZE,
        })?;

        // SAFETY: The frame was just allocated for our exclusive use; it
        // must read as an empty table before the parent entry makes it
        // reachable, hence the fence between the zeroing and the store.
        unsafe {
            let frame_ptr = (self.phys_base + frame.as_u64()) as *mut u64;
            for i in 0..ENTRY_COUNT {
                frame_ptr.add(i).write_volatile(0);
            }
            mfence();

            let mut parent = frame.as_u64() | PageFlags::PRESENT.bits() | PageFlags::WRITABLE.bits();
            if user {
                parent |= PageFlags::USER.bits();
            }
            entry_ptr.write_volatile(parent);
        }
        mfence();

        Ok(frame)
    }
}

#[inline]
#[allow(unused_variables)]
fn flush_tlb(virt: VirtualAddress) {
    #[cfg(target_os = "none")]
    x86_64::instructions::tlb::flush(x86_64::VirtAddr::new(virt.as_u64()));
}

// ---------------------------------------------------------------------------
// Global kernel address space
// ---------------------------------------------------------------------------

use spin::Mutex;

static KERNEL_SPACE: Mutex<Option<AddressSpace>> = Mutex::new(None);

/// Adopt the page tables the bootloader handed us (CR3).
#[cfg(target_os = "none")]
pub fn init() {
    let space = AddressSpace::current();
    println!("[VMM] active PML4 at {:#x}", space.root().as_u64());
    *KERNEL_SPACE.lock() = Some(space);
}

/// Map `virt` to `phys` in the kernel address space, pulling any needed
/// intermediate tables from the global frame allocator.
pub fn map_page(virt: VirtualAddress, phys: PhysicalAddress, flags: PageFlags) -> KernelResult<()> {
    let mut guard = KERNEL_SPACE.lock();
    let space = guard.as_mut().ok_or(KernelError::NotInitialized {
        subsystem: "vmm",
    })?;
    space.map(virt, phys, flags, &mut super::pmm::GlobalFrameSource)
}

/// Unmap `virt` from the kernel address space.
pub fn unmap_page(virt: VirtualAddress) {
    if let Some(space) = KERNEL_SPACE.lock().as_mut() {
        space.unmap(virt);
    }
}

/// Resolve `virt` in the kernel address space.
pub fn virt_to_phys(virt: VirtualAddress) -> Option<PhysicalAddress> {
    KERNEL_SPACE.lock().as_ref()?.translate(virt)
}

/// Physical address of the active PML4, for diagnostics.
pub fn root() -> Option<PhysicalAddress> {
    KERNEL_SPACE.lock().as_ref().map(AddressSpace::root)
}

/// Reload CR3, flushing the whole TLB. Required before entering ring 3
/// after user mappings were installed.
pub fn flush_all() {
    #[cfg(target_os = "none")]
    x86_64::instructions::tlb::flush_all();
}
