use std::cmp::Reverse;

use tracing::debug;

use crate::error::Result;
use crate::store::Store;
use crate::time::now_millis;

impl Store {
    /// Rewrites every open map's current snapshot into a fresh chunk,
    /// orphaning whichever chunks held their previous roots, then reclaims
    /// any chunk that has gone fully dead and aged past retention. Mirrors
    /// the spec's `rewriteChunks` + `compactMoveChunks` pair, collapsed into
    /// one pass since this engine never moves live data within a chunk —
    /// it only ever supersedes a whole chunk with a newer one.
    pub fn compact_file(&self, max_bytes_to_move: u64) -> Result<bool> {
        let _ = max_bytes_to_move;
        self.check_not_closed()?;

        let target_fill_rate = self.config.auto_compact_fill_rate;
        if target_fill_rate == 0 {
            return Ok(false);
        }
        // This engine never moves data within a chunk, so a single
        // partially-live chunk is not the signal to act on: a chunk here is
        // either fully superseded or the current one. Gate on the same
        // global ratio the background writer already uses to decide to
        // call in here at all.
        if self.chunks_fill_rate() >= target_fill_rate {
            return Ok(false);
        }

        let now = now_millis();
        let retention = self.config.retention_time_ms;
        let current_version = self.versions.current_version();
        let mut candidates: Vec<_> = self
            .chunks
            .ids()
            .into_iter()
            .filter_map(|id| self.chunks.get(id))
            .filter(|c| c.is_allocated() && c.fill_rate() <= target_fill_rate && c.is_seasoned(now, retention))
            .collect();
        if candidates.is_empty() {
            // Low global fill rate but nothing old enough, or everything
            // that's sparse is still too fresh to touch — nothing to do yet.
            return Ok(false);
        }
        candidates.sort_by_key(|c| Reverse(c.collect_priority(current_version)));
        debug!(
            candidates = candidates.len(),
            top_chunk = candidates[0].id,
            "compaction: rewriting maps to drop sparsest chunks"
        );

        for map_id in self.map_registry.ids() {
            self.map_registry.mark_dirty(map_id);
        }
        self.unsaved_memory.store(1, std::sync::atomic::Ordering::Relaxed);
        self.commit()?;

        // Candidates above were already vetted against the configured
        // retention window before this rewrite landed, so any chunk that
        // went dead as its direct result doesn't need to wait out a second
        // full retention period before its blocks are reclaimed; the
        // version-visibility check in `is_reclaimable` still applies.
        let mut reclaimed = self.chunks.drop_unused_chunks(now, 0, self.versions.oldest_version_to_keep());
        {
            let free_space = self.free_space.lock();
            reclaimed.sort_by_key(|c| Reverse(free_space.get_move_priority(c.block)));
        }
        if !reclaimed.is_empty() {
            let mut free_space = self.free_space.lock();
            for chunk in &reclaimed {
                free_space.free(chunk.block, crate::free_space::FreeSpaceMap::bytes_to_blocks(chunk.len));
                self.layout.write().remove_chunk_metadata(chunk.id);
                self.evict_chunk_from_caches(chunk);
            }
        }
        self.truncate_trailing_free_space()?;
        debug!(fragmented = self.free_space.lock().is_fragmented(), "compaction: rewrite done");
        Ok(true)
    }

    /// If every block past the highest in-use block is free, shrink the
    /// file to drop that trailing space — the only case this engine can
    /// recover disk space without a move phase.
    fn truncate_trailing_free_space(&self) -> Result<()> {
        let highest_used_end = self
            .chunks
            .ids()
            .into_iter()
            .filter_map(|id| self.chunks.get(id))
            .filter(|c| c.is_allocated())
            .map(|c| c.block + crate::free_space::FreeSpaceMap::bytes_to_blocks(c.len))
            .max()
            .unwrap_or(2);
        let new_size = highest_used_end * crate::consts::BLOCK_SIZE;
        if new_size < self.backend.size()? {
            self.backend.truncate(new_size)?;
        }
        Ok(())
    }

    pub fn chunks_fill_rate(&self) -> u32 {
        let ids = self.chunks.ids();
        if ids.is_empty() {
            return 100;
        }
        let (live, total) = ids
            .into_iter()
            .filter_map(|id| self.chunks.get(id))
            .fold((0u64, 0u64), |(live, total), c| (live + c.max_len_live, total + c.max_len.max(1)));
        if total == 0 {
            100
        } else {
            ((live * 100) / total) as u32
        }
    }
}
