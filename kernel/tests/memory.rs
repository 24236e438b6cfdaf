//! End-to-end memory tests: the bitmap allocator feeding the page-table
//! walker over a fake physical arena, and the bump heap demand-mapping
//! through both.

use ferrite_kernel::error::KernelResult;
use ferrite_kernel::mm::heap::{BumpHeap, PageBacking};
use ferrite_kernel::mm::memory_map::{MemoryMap, Region};
use ferrite_kernel::mm::pmm::{BitmapFrameAllocator, FrameSource};
use ferrite_kernel::mm::vmm::{AddressSpace, PageFlags};
use ferrite_kernel::mm::{PhysicalAddress, VirtualAddress, PAGE_SIZE};

const ARENA_FRAMES: u64 = 128;
const BULK_BASE: u64 = 0xFFFF_9000_0000_0000;
const HEAP_BASE: u64 = 0xFFFF_8000_0000_0000;

/// Page-aligned fake physical memory. "Physical" addresses are offsets
/// from the arena base, exactly how the kernel sees identity-mapped RAM.
struct Arena {
    _storage: Vec<u8>,
    base: u64,
}

impl Arena {
    fn new() -> Self {
        let storage = vec![0u8; ((ARENA_FRAMES + 1) * PAGE_SIZE as u64) as usize];
        let raw = storage.as_ptr() as u64;
        let base = (raw + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1);
        Self {
            _storage: storage,
            base,
        }
    }

    fn write_u64(&self, phys: PhysicalAddress, value: u64) {
        unsafe { ((self.base + phys.as_u64()) as *mut u64).write_volatile(value) }
    }

    fn read_u64(&self, phys: PhysicalAddress) -> u64 {
        unsafe { ((self.base + phys.as_u64()) as *const u64).read_volatile() }
    }
}

/// Allocator + address space wired over the arena.
fn setup(arena: &Arena) -> (BitmapFrameAllocator, AddressSpace) {
    let map = MemoryMap::from_regions(&[Region {
        base: 0,
        length: ARENA_FRAMES * PAGE_SIZE as u64,
        kind: 1,
    }]);
    let bitmap = vec![0u8; BitmapFrameAllocator::bitmap_size(ARENA_FRAMES)].leak();
    let mut allocator = unsafe { BitmapFrameAllocator::new(&map, bitmap.as_mut_ptr()) };

    let pml4 = allocator.alloc_page().expect("PML4 frame");
    let space = AddressSpace::new(pml4, arena.base);
    (allocator, space)
}

#[test]
fn bulk_map_write_verify_unmap() {
    let arena = Arena::new();
    let (mut allocator, mut space) = setup(&arena);
    let baseline = allocator.used_pages();

    // Allocate and map 50 pages with distinct patterns.
    let mut frames = Vec::new();
    for i in 0..50u64 {
        let frame = allocator.alloc_page().expect("data frame");
        let virt = VirtualAddress::new(BULK_BASE + i * PAGE_SIZE as u64);
        space
            .map(virt, frame, PageFlags::PRESENT | PageFlags::WRITABLE, &mut allocator)
            .expect("map");
        arena.write_u64(frame, 0xDEAD_BEEF_0000_0000 | i);
        frames.push((virt, frame));
    }

    // Every mapping resolves and every pattern survives.
    for (i, (virt, frame)) in frames.iter().enumerate() {
        assert_eq!(space.translate(*virt), Some(*frame));
        assert_eq!(arena.read_u64(*frame), 0xDEAD_BEEF_0000_0000 | i as u64);
    }

    // Unmap and free everything; only the intermediate tables remain
    // allocated (they are never reclaimed).
    let with_data = allocator.used_pages();
    for (virt, frame) in frames {
        space.unmap(virt);
        assert_eq!(space.translate(virt), None);
        allocator.free_page(frame);
    }
    let tables = with_data - baseline - 50;
    assert!(tables > 0, "mapping must have created page tables");
    assert_eq!(allocator.used_pages(), baseline + tables);
}

/// Heap backing that demand-maps pages through the real allocator and
/// address space, as the kernel's backing does.
struct MappedBacking<'a> {
    allocator: &'a mut BitmapFrameAllocator,
    space: &'a mut AddressSpace,
    mapped: u64,
}

impl PageBacking for MappedBacking<'_> {
    fn ensure_mapped(&mut self, page: VirtualAddress) -> KernelResult<()> {
        if self.space.translate(page).is_some() {
            return Ok(());
        }
        let frame = self
            .allocator
            .alloc_frame()
            .ok_or(ferrite_kernel::KernelError::OutOfMemory {
                requested: PAGE_SIZE,
            })?;
        self.mapped += 1;
        // Table frames for the walk come from the same allocator as the
        // data frames.
        self.space
            .map(page, frame, PageFlags::PRESENT | PageFlags::WRITABLE, &mut *self.allocator)
    }
}

#[test]
fn heap_demand_maps_through_the_stack() {
    let arena = Arena::new();
    let (mut allocator, mut space) = setup(&arena);
    let mut heap = BumpHeap::new(HEAP_BASE, 16 * 1024 * 1024);

    let mut backing = MappedBacking {
        allocator: &mut allocator,
        space: &mut space,
        mapped: 0,
    };

    // 100 allocations of 256 bytes: aligned, strictly increasing.
    let mut last = None;
    for _ in 0..100 {
        let ptr = heap.alloc(256, &mut backing).expect("heap alloc");
        assert_eq!(ptr % 16, 0);
        if let Some(prev) = last {
            assert_eq!(ptr, prev + 256);
        }
        last = Some(ptr);
    }

    assert_eq!(heap.total_allocated(), 100 * 256);
    assert_eq!(heap.current_size(), 100 * 256);

    // 25600 bytes of heap touch ceil(25600/4096) + 0 boundary pages.
    let expected_pages = (100 * 256u64).div_ceil(PAGE_SIZE as u64);
    assert_eq!(backing.mapped, expected_pages);

    // Every touched heap page is genuinely mapped.
    for page in 0..expected_pages {
        let virt = VirtualAddress::new(HEAP_BASE + page * PAGE_SIZE as u64);
        assert!(backing.space.translate(virt).is_some());
    }
}

#[test]
fn allocator_counters_round_trip() {
    let arena = Arena::new();
    let (mut allocator, _space) = setup(&arena);

    let before = allocator.used_pages();
    let page = allocator.alloc_page().unwrap();
    assert_eq!(allocator.used_pages(), before + 1);
    assert!(allocator.is_used(page.frame_index()));

    allocator.free_page(page);
    assert_eq!(allocator.used_pages(), before);
    assert!(!allocator.is_used(page.frame_index()));
}
