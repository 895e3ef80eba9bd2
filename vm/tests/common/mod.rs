#![allow(dead_code)]

use kidneyos_shared::mem::{PAGE_FRAME_SIZE, SECTORS_PER_PAGE};
use kidneyos_vm::block::{Block, BlockSector, BlockType, MemoryDevice};
use kidneyos_vm::mem::{AddressSpace, PageState, VirtualMemory, VmConfig};
use kidneyos_vm::paging::{PageMapper, SoftPageTable};
use std::sync::Arc;

/// First page of the region the tests place user pages in.
pub const BASE: usize = 0x0804_8000;

pub struct Fixture {
    pub vm: Arc<VirtualMemory>,
    pub mmu: Arc<SoftPageTable>,
}

pub fn fixture(frames: usize, swap_slots: usize) -> Fixture {
    let sectors = (swap_slots * SECTORS_PER_PAGE) as BlockSector;
    let swap = Block::new(
        BlockType::Swap,
        "swap",
        sectors,
        Box::new(MemoryDevice::new(sectors)),
    );
    let mmu = Arc::new(SoftPageTable::new());
    let vm = VirtualMemory::new(VmConfig { frames }, swap, mmu.clone());
    Fixture { vm, mmu }
}

pub fn page(n: usize) -> usize {
    BASE + n * PAGE_FRAME_SIZE
}

/// A page full of a pattern derived from `seed`.
pub fn pattern(seed: u8) -> Vec<u8> {
    (0..PAGE_FRAME_SIZE)
        .map(|i| seed.wrapping_mul(31).wrapping_add(i as u8))
        .collect()
}

/// Every resident page is mapped to its frame and owns it in the frame
/// table, and nothing else is mapped.
pub fn assert_consistent(fixture: &Fixture, spaces: &[&AddressSpace]) {
    let mut owned = 0;
    for space in spaces {
        let mut resident = Vec::new();
        for (addr, frame) in fixture.mmu.mappings(space.pid()) {
            assert_eq!(
                space.page_state(addr).map(|s| matches!(s, PageState::Resident(f) if f == frame)),
                Some(true),
                "pid {} page {:#x} mapped but not resident in {:?}",
                space.pid(),
                addr,
                frame
            );
            assert_eq!(fixture.vm.frame_owner(frame), Some((space.pid(), addr)));
            assert_eq!(fixture.mmu.lookup(space.pid(), addr), Some(frame));
            resident.push(addr);
        }
        assert_eq!(resident.len(), space.resident_pages());
        owned += resident.len();
    }
    assert_eq!(fixture.vm.stats().frames_allocated, owned);
}

/// Swap slots recorded across all spaces, checking that none appears twice.
pub fn assert_unique_slots(spaces: &[&AddressSpace], pages: usize) {
    let mut seen = std::collections::BTreeSet::new();
    for space in spaces {
        for n in 0..pages {
            if let Some(PageState::Swapped(slot)) = space.page_state(page(n)) {
                assert!(seen.insert(slot), "slot {:?} referenced twice", slot);
            }
        }
    }
}
