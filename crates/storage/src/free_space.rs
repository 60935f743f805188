use bitvec::prelude::*;

use crate::consts::BLOCK_SIZE;

/// Tracks which blocks of the file are in use. The first two blocks (the
/// store header) are always reserved.
#[derive(Debug, Default)]
pub struct FreeSpaceMap {
    used: BitVec<u64, Lsb0>,
}

impl FreeSpaceMap {
    pub fn new() -> Self {
        let mut used = BitVec::new();
        used.resize(2, true); // header blocks 0 and 1
        FreeSpaceMap { used }
    }

    pub fn mark_used(&mut self, block: u64, len_blocks: u64) {
        let end = (block + len_blocks) as usize;
        if end > self.used.len() {
            self.used.resize(end, false);
        }
        for i in block as usize..end {
            self.used.set(i, true);
        }
    }

    pub fn free(&mut self, block: u64, len_blocks: u64) {
        let end = ((block + len_blocks) as usize).min(self.used.len());
        for i in block as usize..end {
            self.used.set(i, false);
        }
    }

    pub fn is_used(&self, block: u64) -> bool {
        self.used.get(block as usize).map(|b| *b).unwrap_or(false)
    }

    pub fn get_after_last_block(&self) -> u64 {
        self.used.len() as u64
    }

    pub fn get_first_free(&self) -> u64 {
        self.used
            .iter()
            .enumerate()
            .find(|(_, bit)| !**bit)
            .map(|(i, _)| i as u64)
            .unwrap_or(self.used.len() as u64)
    }

    /// Finds the first run of `len_blocks` free blocks, preferring to avoid
    /// `[reserved_low, reserved_high)` (a range a concurrent commit has
    /// claimed for itself). `reserved_high == 0` means "no reservation".
    pub fn allocate(&mut self, len_blocks: u64, reserved_low: u64, reserved_high: u64) -> u64 {
        let block = self.predict_allocation(len_blocks, reserved_low, reserved_high);
        self.mark_used(block, len_blocks);
        block
    }

    pub fn predict_allocation(&self, len_blocks: u64, reserved_low: u64, reserved_high: u64) -> u64 {
        let mut candidate = 0u64;
        loop {
            if self.range_overlaps_reserved(candidate, len_blocks, reserved_low, reserved_high) {
                candidate = reserved_high;
                continue;
            }
            if self.range_is_free(candidate, len_blocks) {
                return candidate;
            }
            candidate += 1;
        }
    }

    fn range_overlaps_reserved(&self, block: u64, len: u64, low: u64, high: u64) -> bool {
        high > low && block < high && block + len > low
    }

    fn range_is_free(&self, block: u64, len_blocks: u64) -> bool {
        let end = block + len_blocks;
        for i in block..end {
            if self.is_used(i) {
                return false;
            }
        }
        true
    }

    pub fn get_fill_rate(&self) -> u32 {
        let after_last = self.get_after_last_block();
        if after_last == 0 {
            return 0;
        }
        let used_count = self.used[..after_last as usize].count_ones() as u64;
        ((used_count * 100) / after_last) as u32
    }

    pub fn get_projected_fill_rate(&self, extra_free_blocks: u64) -> u32 {
        let after_last = self.get_after_last_block();
        let projected_total = after_last.saturating_sub(extra_free_blocks).max(1);
        let used_count = self.used[..after_last as usize].count_ones() as u64;
        ((used_count.min(projected_total) * 100) / projected_total) as u32
    }

    /// Higher priority for blocks further from the start of the file — the
    /// compactor's move phase pulls chunks toward the front.
    pub fn get_move_priority(&self, block: u64) -> u64 {
        block
    }

    pub fn is_fragmented(&self) -> bool {
        let after_last = self.get_after_last_block();
        if after_last == 0 {
            return false;
        }
        self.get_first_free() < after_last.saturating_sub(after_last / 10)
    }

    /// Resets to just the reserved header blocks, used when recovery gives
    /// up on a corrupt chunk chain and opens empty.
    pub fn clear(&mut self) {
        self.used.clear();
        self.used.resize(2, true);
    }

    pub fn block_to_offset(block: u64) -> u64 {
        block * BLOCK_SIZE
    }

    pub fn bytes_to_blocks(len: u64) -> u64 {
        len.div_ceil(BLOCK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_skips_header_blocks() {
        let mut map = FreeSpaceMap::new();
        let block = map.allocate(1, 0, 0);
        assert_eq!(block, 2);
    }

    #[test]
    fn allocate_avoids_reserved_range() {
        let mut map = FreeSpaceMap::new();
        let block = map.allocate(1, 2, 10);
        assert_eq!(block, 10);
    }

    #[test]
    fn free_then_allocate_reuses_block() {
        let mut map = FreeSpaceMap::new();
        let block = map.allocate(2, 0, 0);
        map.free(block, 2);
        let reused = map.allocate(2, 0, 0);
        assert_eq!(reused, block);
    }

    #[test]
    fn fill_rate_reflects_used_fraction() {
        let mut map = FreeSpaceMap::new();
        map.allocate(8, 0, 0);
        assert!(map.get_fill_rate() > 0);
    }
}
