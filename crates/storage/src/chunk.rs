use bitvec::prelude::*;

/// Sentinel for an unset block/len field (a chunk not yet allocated on
/// disk, or one whose physical image was lost and nulled during recovery).
pub const UNSET: u64 = u64::MAX;

/// Chunks are large storage units that:
/// - Serve as containers for multiple pages
/// - Have a minimum size of 4096 bytes (one block) and grow in fixed block increments
/// - Are the unit of allocation and garbage collection
/// - Can contain up to 67 million pages
/// - Have their own headers and footers for metadata
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: u32,
    pub version: u64,
    pub time: u64,
    /// File location in [`crate::consts::BLOCK_SIZE`] units.
    pub block: u64,
    pub len: u64,
    pub page_count: u32,
    pub page_count_live: u32,
    pub max_len: u64,
    pub max_len_live: u64,
    /// One bit per page, set when the page is dead.
    pub occupancy: BitVec<u8, Lsb0>,
    pub layout_root_pos: u64,
    pub toc_pos: u32,
    pub map_id: u32,
    pub next: u64,
    pub unused: u64,
    pub unused_at_version: u64,
}

impl Chunk {
    pub fn new(id: u32, version: u64, time: u64) -> Self {
        Chunk {
            id,
            version,
            time,
            block: UNSET,
            len: 0,
            page_count: 0,
            page_count_live: 0,
            max_len: 0,
            max_len_live: 0,
            occupancy: BitVec::new(),
            layout_root_pos: 0,
            toc_pos: 0,
            map_id: 0,
            next: 0,
            unused: UNSET,
            unused_at_version: UNSET,
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.block != UNSET
    }

    pub fn is_live(&self) -> bool {
        self.page_count_live > 0
    }

    pub fn is_dead(&self) -> bool {
        self.page_count_live == 0 && self.max_len_live == 0
    }

    pub fn fill_rate(&self) -> u32 {
        if self.max_len == 0 {
            100
        } else {
            ((self.max_len_live * 100) / self.max_len) as u32
        }
    }

    /// Lower is a more attractive rewrite candidate: low fill rate, long
    /// time since the chunk was written (relative to the latest version).
    pub fn collect_priority(&self, latest_version: u64) -> u64 {
        let age = latest_version.saturating_sub(self.version).max(1);
        (self.fill_rate() as u64 * 1000) / age
    }

    pub fn is_reclaimable(&self, now: u64, retention_time: u64, oldest_version_to_keep: u64) -> bool {
        self.unused != UNSET
            && now >= self.unused.saturating_add(retention_time)
            && self.unused_at_version < oldest_version_to_keep
    }

    pub fn is_seasoned(&self, now: u64, retention_time: u64) -> bool {
        now.saturating_sub(self.time) >= retention_time
    }

    /// Marks page `page_no` dead and updates the live counters. Returns
    /// true if the chunk just became fully dead.
    pub fn mark_page_dead(&mut self, page_no: u32, page_len: u64, time: u64, version: u64) -> bool {
        let idx = page_no as usize;
        if idx >= self.occupancy.len() {
            self.occupancy.resize(idx + 1, false);
        }
        if self.occupancy[idx] {
            return false; // already dead, no-op (idempotent)
        }
        self.occupancy.set(idx, true);
        self.page_count_live = self.page_count_live.saturating_sub(1);
        self.max_len_live = self.max_len_live.saturating_sub(page_len);
        if self.is_dead() {
            self.unused = time;
            self.unused_at_version = version;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_chunk_is_not_live() {
        let c = Chunk::new(1, 0, 0);
        assert!(!c.is_live());
        assert!(c.is_dead());
        assert!(!c.is_allocated());
    }

    #[test]
    fn marking_last_live_page_dead_flips_to_dead() {
        let mut c = Chunk::new(1, 5, 1_000);
        c.page_count = 1;
        c.page_count_live = 1;
        c.max_len = 100;
        c.max_len_live = 100;
        let became_dead = c.mark_page_dead(0, 100, 2_000, 7);
        assert!(became_dead);
        assert!(c.is_dead());
        assert_eq!(c.unused, 2_000);
        assert_eq!(c.unused_at_version, 7);
    }

    #[test]
    fn fill_rate_tracks_live_fraction() {
        let mut c = Chunk::new(1, 0, 0);
        c.max_len = 1000;
        c.max_len_live = 250;
        assert_eq!(c.fill_rate(), 25);
    }

    #[test]
    fn reclaimable_requires_retention_and_version_window() {
        let mut c = Chunk::new(1, 0, 0);
        c.unused = 1_000;
        c.unused_at_version = 3;
        assert!(!c.is_reclaimable(1_500, 1_000, 10)); // retention not elapsed
        assert!(!c.is_reclaimable(5_000, 1_000, 2)); // still visible to a reader
        assert!(c.is_reclaimable(5_000, 1_000, 10));
    }
}
