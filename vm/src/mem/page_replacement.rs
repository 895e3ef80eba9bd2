use super::frame_table::FrameEntry;
use crate::paging::PageMapper;

/// Chooses which resident frame gives up its page when no frame is free.
pub trait PageReplacementPolicy: Send {
    /// Index of the frame to evict, or `None` if every frame is pinned.
    ///
    /// May clear accessed bits along the way.
    fn select_victim(&mut self, frames: &[FrameEntry], mmu: &dyn PageMapper) -> Option<usize>;
}

/// The clock algorithm.
///
/// The hand sweeps the frames in index order. A frame whose page was accessed
/// since the hand last passed gets its bit cleared and is skipped; the first
/// frame found with the bit clear is the victim, and the hand stops just past
/// it.
#[derive(Debug, Default)]
pub struct SecondChance {
    hand: usize,
}

impl SecondChance {
    pub fn hand(&self) -> usize {
        self.hand
    }
}

impl PageReplacementPolicy for SecondChance {
    fn select_victim(&mut self, frames: &[FrameEntry], mmu: &dyn PageMapper) -> Option<usize> {
        let total = frames.len();
        // The first sweep clears every accessed bit, so a second one finds a
        // victim unless all frames are pinned.
        for _ in 0..2 * total {
            let idx = self.hand % total;
            self.hand = (idx + 1) % total;

            let entry = &frames[idx];
            if entry.is_pinned() {
                continue;
            }
            let Some(owner) = entry.owner() else {
                continue;
            };
            if mmu.is_accessed(owner.pid, owner.page) {
                mmu.set_accessed(owner.pid, owner.page, false);
                continue;
            }
            return Some(idx);
        }
        None
    }
}
