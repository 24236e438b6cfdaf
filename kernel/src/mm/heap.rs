//! Kernel heap.
//!
//! A bump allocator over a fixed higher-half window. Pages are mapped on
//! demand as the bump pointer crosses them; `kfree` is a documented no-op;
//! memory comes back at reboot. Suits a kernel whose long-lived
//! allocations (TCBs, task stacks) are made once at boot.

use spin::Mutex;

use super::{pmm, vmm, VirtualAddress, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};

/// Bottom of the heap window.
pub const HEAP_START: u64 = 0xFFFF_8000_0000_0000;
/// Window size: 16 MiB.
pub const HEAP_SIZE: u64 = 16 * 1024 * 1024;

/// Allocation granularity.
const ALIGN: u64 = 16;

/// Supplies backing pages for the bump window. The kernel implementation
/// maps physical frames; test fixtures record what would be mapped.
pub trait PageBacking {
    /// Make the 4 KiB page at `page` readable and writable, unless it
    /// already is.
    fn ensure_mapped(&mut self, page: VirtualAddress) -> KernelResult<()>;
}

/// Bump-allocator state. Separate from the global so the arithmetic is
/// testable without a live page-table hierarchy.
pub struct BumpHeap {
    base: u64,
    size: u64,
    next: u64,
    total_allocated: u64,
}

impl BumpHeap {
    pub const fn new(base: u64, size: u64) -> Self {
        Self {
            base,
            size,
            next: base,
            total_allocated: 0,
        }
    }

    /// Serve an allocation of `size` bytes, demand-mapping every page the
    /// new region touches. Returns the start of the region.
    pub fn alloc(&mut self, size: usize, backing: &mut dyn PageBacking) -> KernelResult<u64> {
        if size == 0 {
            return Err(KernelError::InvalidArgument {
                name: "size",
                value: "zero",
            });
        }

        let size = super::align_up(size as u64, ALIGN);
        if self.next + size > self.base + self.size {
            return Err(KernelError::OutOfMemory {
                requested: size as usize,
            });
        }

        let first_page = self.next & !(PAGE_SIZE as u64 - 1);
        let last_page = super::align_up(self.next + size, PAGE_SIZE as u64);
        for page in (first_page..last_page).step_by(PAGE_SIZE) {
            backing.ensure_mapped(VirtualAddress::new(page))?;
        }

        let ptr = self.next;
        self.next += size;
        self.total_allocated += size;
        Ok(ptr)
    }

    /// Sum of all served allocation sizes (after rounding).
    pub fn total_allocated(&self) -> u64 {
        self.total_allocated
    }

    /// Bytes consumed from the window.
    pub fn current_size(&self) -> u64 {
        self.next - self.base
    }
}

/// Kernel backing: check the live page tables, allocate a frame and map
/// it PRESENT|WRITABLE (never USER) when the page is missing.
struct KernelBacking;

impl PageBacking for KernelBacking {
    fn ensure_mapped(&mut self, page: VirtualAddress) -> KernelResult<()> {
        if vmm::virt_to_phys(page).is_some() {
            return Ok(());
        }
        let frame = pmm::alloc_page().ok_or(KernelError::OutOfMemory {
            requested: PAGE_SIZE,
        })?;
        vmm::map_page(page, frame, vmm::PageFlags::PRESENT | vmm::PageFlags::WRITABLE)
    }
}

static HEAP: Mutex<BumpHeap> = Mutex::new(BumpHeap::new(HEAP_START, HEAP_SIZE));

/// Allocate kernel memory. Returns a null pointer on failure, matching
/// the allocator's C-style contract; callers must check.
pub fn kmalloc(size: usize) -> *mut u8 {
    match HEAP.lock().alloc(size, &mut KernelBacking) {
        Ok(addr) => addr as *mut u8,
        Err(err) => {
            log::warn!("kmalloc({}) failed: {}", size, err);
            core::ptr::null_mut()
        }
    }
}

/// Release kernel memory. No-op: the bump allocator cannot reclaim.
pub fn kfree(_ptr: *mut u8) {}

/// Sum of all served allocation sizes.
pub fn total_allocated() -> u64 {
    HEAP.lock().total_allocated()
}

/// Bytes consumed from the heap window.
pub fn current_size() -> u64 {
    HEAP.lock().current_size()
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    /// Backing that records which pages were requested.
    #[derive(Default)]
    struct Recorder {
        pages: std::vec::Vec<u64>,
        fail: bool,
    }

    impl PageBacking for Recorder {
        fn ensure_mapped(&mut self, page: VirtualAddress) -> KernelResult<()> {
            if self.fail {
                return Err(KernelError::OutOfMemory {
                    requested: PAGE_SIZE,
                });
            }
            if !self.pages.contains(&page.as_u64()) {
                self.pages.push(page.as_u64());
            }
            Ok(())
        }
    }

    #[test]
    fn allocations_are_sixteen_byte_aligned() {
        let mut heap = BumpHeap::new(HEAP_START, HEAP_SIZE);
        let mut backing = Recorder::default();

        let a = heap.alloc(1, &mut backing).unwrap();
        let b = heap.alloc(17, &mut backing).unwrap();
        let c = heap.alloc(16, &mut backing).unwrap();

        assert_eq!(a % 16, 0);
        assert_eq!(b, a + 16);
        assert_eq!(c, b + 32);
        assert_eq!(heap.total_allocated(), 16 + 32 + 16);
        assert_eq!(heap.current_size(), 64);
    }

    #[test]
    fn zero_size_is_rejected() {
        let mut heap = BumpHeap::new(HEAP_START, HEAP_SIZE);
        assert!(heap.alloc(0, &mut Recorder::default()).is_err());
        assert_eq!(heap.current_size(), 0);
    }

    #[test]
    fn window_overflow_is_rejected() {
        let mut heap = BumpHeap::new(HEAP_START, 2 * PAGE_SIZE as u64);
        let mut backing = Recorder::default();

        assert!(heap.alloc(PAGE_SIZE, &mut backing).is_ok());
        assert!(heap.alloc(PAGE_SIZE, &mut backing).is_ok());
        let err = heap.alloc(16, &mut backing).unwrap_err();
        assert!(matches!(err, KernelError::OutOfMemory { .. }));
        // The failed allocation must not move the pointer.
        assert_eq!(heap.current_size(), 2 * PAGE_SIZE as u64);
    }

    #[test]
    fn pages_are_demand_mapped_once() {
        let mut heap = BumpHeap::new(HEAP_START, HEAP_SIZE);
        let mut backing = Recorder::default();

        // 100 byte allocation touches only the first page.
        heap.alloc(100, &mut backing).unwrap();
        assert_eq!(backing.pages, [HEAP_START]);

        // Crossing into the second page maps exactly one more.
        heap.alloc(PAGE_SIZE, &mut backing).unwrap();
        assert_eq!(backing.pages, [HEAP_START, HEAP_START + PAGE_SIZE as u64]);
    }

    #[test]
    fn backing_failure_surfaces_and_keeps_state() {
        let mut heap = BumpHeap::new(HEAP_START, HEAP_SIZE);
        let mut backing = Recorder {
            fail: true,
            ..Default::default()
        };
        assert!(heap.alloc(64, &mut backing).is_err());
        assert_eq!(heap.current_size(), 0);
        assert_eq!(heap.total_allocated(), 0);
    }
}
