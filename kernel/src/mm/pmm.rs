//! Physical memory manager.
//!
//! A bitmap with one bit per 4 KiB frame over the whole physical range
//! reported by the loader: 1 = used, 0 = free. The bitmap itself lives in
//! physical memory directly after the kernel image and is never moved.

use spin::Mutex;

use super::{memory_map::MemoryMap, PhysicalAddress, PAGE_SIZE};

/// Anything that can hand out physical frames. Implemented by the bitmap
/// allocator and by test fixtures.
pub trait FrameSource {
    fn alloc_frame(&mut self) -> Option<PhysicalAddress>;
}

/// Bitmap frame allocator.
///
/// Holds a raw pointer to its bitmap storage; on bare metal that is the
/// page-aligned region after `__kernel_end`, in tests a leaked slice.
pub struct BitmapFrameAllocator {
    bitmap: *mut u8,
    total_pages: u64,
    used_pages: u64,
}

// SAFETY: The allocator owns its bitmap storage exclusively; all shared
// access goes through the global Mutex.
unsafe impl Send for BitmapFrameAllocator {}

impl BitmapFrameAllocator {
    /// Bitmap bytes needed to cover `total_pages` frames.
    pub const fn bitmap_size(total_pages: u64) -> usize {
        total_pages.div_ceil(8) as usize
    }

    /// Build the allocator over `map`, using `bitmap` as storage.
    ///
    /// Every frame starts out used; usable regions are then freed. The
    /// caller still has to reserve the kernel image and the bitmap
    /// itself via [`reserve_range`](Self::reserve_range).
    ///
    /// # Safety
    ///
    /// `bitmap` must point to at least `bitmap_size(total_pages)` bytes
    /// of writable memory owned exclusively by this allocator.
    pub unsafe fn new(map: &MemoryMap, bitmap: *mut u8) -> Self {
        let total_pages = map.max_address().as_u64() / PAGE_SIZE as u64;
        let mut allocator = Self {
            bitmap,
            total_pages,
            used_pages: total_pages,
        };

        // SAFETY: Caller guarantees the storage size.
        unsafe {
            core::ptr::write_bytes(bitmap, 0xFF, Self::bitmap_size(total_pages));
        }

        for region in map.usable() {
            let first = region.base / PAGE_SIZE as u64;
            let count = region.length / PAGE_SIZE as u64;
            for frame in first..first + count {
                if frame < total_pages && allocator.is_used(frame) {
                    allocator.clear_bit(frame);
                    allocator.used_pages -= 1;
                }
            }
        }

        allocator
    }

    /// Mark every frame overlapping `[start, end)` as used.
    pub fn reserve_range(&mut self, start: u64, end: u64) {
        let first = start / PAGE_SIZE as u64;
        let last = end.div_ceil(PAGE_SIZE as u64);
        for frame in first..last.min(self.total_pages) {
            if !self.is_used(frame) {
                self.set_bit(frame);
                self.used_pages += 1;
            }
        }
    }

    /// Linear first-fit allocation of a single frame.
    pub fn alloc_page(&mut self) -> Option<PhysicalAddress> {
        for frame in 0..self.total_pages {
            if !self.is_used(frame) {
                self.set_bit(frame);
                self.used_pages += 1;
                return Some(PhysicalAddress::new(frame * PAGE_SIZE as u64));
            }
        }
        log::warn!("pmm: out of physical frames ({} total)", self.total_pages);
        None
    }

    /// Return a frame to the pool. Freeing a free frame is a no-op.
    pub fn free_page(&mut self, addr: PhysicalAddress) {
        let frame = addr.frame_index();
        if frame < self.total_pages && self.is_used(frame) {
            self.clear_bit(frame);
            self.used_pages -= 1;
        }
    }

    pub fn total_pages(&self) -> u64 {
        self.total_pages
    }

    pub fn used_pages(&self) -> u64 {
        self.used_pages
    }

    pub fn free_pages(&self) -> u64 {
        self.total_pages - self.used_pages
    }

    /// Whether the frame's bit is set (used).
    pub fn is_used(&self, frame: u64) -> bool {
        // SAFETY: frame < total_pages is checked by all callers; the
        // byte lies inside the storage sized by bitmap_size.
        unsafe { *self.bitmap.add((frame / 8) as usize) & (1 << (frame % 8)) != 0 }
    }

    fn set_bit(&mut self, frame: u64) {
        // SAFETY: see is_used.
        unsafe {
            *self.bitmap.add((frame / 8) as usize) |= 1 << (frame % 8);
        }
    }

    fn clear_bit(&mut self, frame: u64) {
        // SAFETY: see is_used.
        unsafe {
            *self.bitmap.add((frame / 8) as usize) &= !(1 << (frame % 8));
        }
    }
}

impl FrameSource for BitmapFrameAllocator {
    fn alloc_frame(&mut self) -> Option<PhysicalAddress> {
        self.alloc_page()
    }
}

static FRAME_ALLOCATOR: Mutex<Option<BitmapFrameAllocator>> = Mutex::new(None);
static MEMORY_MAP: Mutex<Option<MemoryMap>> = Mutex::new(None);

/// Initialize the global allocator from the loader's memory map.
///
/// The bitmap is placed page-aligned after the kernel image, then the
/// image and the bitmap are re-marked used so they can never be handed
/// out as free frames.
#[cfg(target_os = "none")]
pub fn init() {
    extern "C" {
        static __kernel_start: u8;
        static __kernel_end: u8;
    }

    use super::memory_map::BOOT_MEMORY_MAP_BASE;

    // SAFETY: The boot contract places the snapshot at a fixed, identity
    // mapped physical address; the linker provides the image bounds.
    let (map, kernel_start, kernel_end) = unsafe {
        (
            MemoryMap::from_snapshot(BOOT_MEMORY_MAP_BASE as *const u8),
            &raw const __kernel_start as u64,
            &raw const __kernel_end as u64,
        )
    };

    let total_pages = map.max_address().as_u64() / PAGE_SIZE as u64;
    let bitmap_base = super::align_up(kernel_end, PAGE_SIZE as u64);
    let bitmap_size = BitmapFrameAllocator::bitmap_size(total_pages) as u64;

    // SAFETY: The bitmap region sits in identity-mapped RAM past the
    // image; nothing else claims it before the reserve below makes the
    // claim visible to the allocator itself.
    let mut allocator = unsafe { BitmapFrameAllocator::new(&map, bitmap_base as *mut u8) };
    allocator.reserve_range(kernel_start, bitmap_base + bitmap_size);

    let total = allocator.total_pages();
    let used = allocator.used_pages();
    *FRAME_ALLOCATOR.lock() = Some(allocator);
    *MEMORY_MAP.lock() = Some(map);

    println!(
        "[PMM] {} MiB managed, {} pages ({} reserved)",
        total * PAGE_SIZE as u64 / (1024 * 1024),
        total,
        used,
    );
}

/// Allocate one physical frame from the global allocator.
pub fn alloc_page() -> Option<PhysicalAddress> {
    FRAME_ALLOCATOR.lock().as_mut()?.alloc_page()
}

/// Free one physical frame.
pub fn free_page(addr: PhysicalAddress) {
    if let Some(allocator) = FRAME_ALLOCATOR.lock().as_mut() {
        allocator.free_page(addr);
    }
}

/// (total, used) page counts, or `None` before init.
pub fn stats() -> Option<(u64, u64)> {
    FRAME_ALLOCATOR
        .lock()
        .as_ref()
        .map(|a| (a.total_pages(), a.used_pages()))
}

/// Run `f` over the boot memory map, if it has been captured.
pub fn with_memory_map<R>(f: impl FnOnce(&MemoryMap) -> R) -> Option<R> {
    MEMORY_MAP.lock().as_ref().map(f)
}

/// Adapter that lets the page-table code pull frames from the global
/// allocator without holding its lock across the whole mapping.
pub struct GlobalFrameSource;

impl FrameSource for GlobalFrameSource {
    fn alloc_frame(&mut self) -> Option<PhysicalAddress> {
        alloc_page()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::super::memory_map::Region;
    use super::*;

    fn fixture(total_pages: u64, usable: &[(u64, u64)]) -> BitmapFrameAllocator {
        let regions: std::vec::Vec<Region> = usable
            .iter()
            .map(|&(base, length)| Region {
                base,
                length,
                kind: 1,
            })
            .chain(core::iter::once(Region {
                base: (total_pages - 1) * PAGE_SIZE as u64,
                length: PAGE_SIZE as u64,
                kind: 2,
            }))
            .collect();
        let map = MemoryMap::from_regions(&regions);
        let storage = std::vec![0u8; BitmapFrameAllocator::bitmap_size(total_pages)].leak();
        unsafe { BitmapFrameAllocator::new(&map, storage.as_mut_ptr()) }
    }

    #[test]
    fn usable_regions_become_free() {
        let allocator = fixture(16, &[(0x1000, 4 * PAGE_SIZE as u64)]);
        assert_eq!(allocator.total_pages(), 16);
        assert_eq!(allocator.free_pages(), 4);
        assert!(allocator.is_used(0));
        assert!(!allocator.is_used(1));
        assert!(!allocator.is_used(4));
        assert!(allocator.is_used(5));
    }

    #[test]
    fn alloc_is_first_fit_and_free_restores() {
        let mut allocator = fixture(16, &[(0x2000, 3 * PAGE_SIZE as u64)]);
        let before = allocator.used_pages();

        let first = allocator.alloc_page().unwrap();
        assert_eq!(first.as_u64(), 0x2000);
        assert_eq!(allocator.used_pages(), before + 1);
        assert!(allocator.is_used(first.frame_index()));

        allocator.free_page(first);
        assert_eq!(allocator.used_pages(), before);
        assert!(!allocator.is_used(first.frame_index()));

        // Same frame comes back on the next allocation.
        assert_eq!(allocator.alloc_page().unwrap(), first);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut allocator = fixture(8, &[(0x0, 2 * PAGE_SIZE as u64)]);
        assert!(allocator.alloc_page().is_some());
        assert!(allocator.alloc_page().is_some());
        assert!(allocator.alloc_page().is_none());
    }

    #[test]
    fn double_free_is_ignored() {
        let mut allocator = fixture(8, &[(0x0, 2 * PAGE_SIZE as u64)]);
        let page = allocator.alloc_page().unwrap();
        allocator.free_page(page);
        let used = allocator.used_pages();
        allocator.free_page(page);
        assert_eq!(allocator.used_pages(), used);
    }

    #[test]
    fn reserve_range_covers_partial_pages() {
        let mut allocator = fixture(16, &[(0x0, 16 * PAGE_SIZE as u64)]);
        allocator.reserve_range(0x1800, 0x3800);
        // 0x1800..0x3800 touches frames 1, 2 and 3.
        assert!(!allocator.is_used(0));
        assert!(allocator.is_used(1));
        assert!(allocator.is_used(2));
        assert!(allocator.is_used(3));
        assert!(!allocator.is_used(4));
    }
}
