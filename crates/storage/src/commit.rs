use std::sync::atomic::Ordering;

use btree::{Page, PagePos, TocEntry};
use bytes::BytesMut;

use crate::chunk::Chunk;
use crate::chunk_header_footer::{ChunkFooter, ChunkHeader};
use crate::chunk_registry::RemovedPageInfo;
use crate::consts::{BLOCK_SIZE, LAYOUT_MAP_ID, META_MAP_ID};
use crate::error::Result;
use crate::free_space::FreeSpaceMap;
use crate::store::{CommitSink, Store};
use crate::time::now_millis;

impl Store {
    /// Returns immediately if `store_lock` is already held (non-reentrant)
    /// or can't be acquired; otherwise runs [`Self::commit`].
    pub fn try_commit(&self) -> Result<Option<u64>> {
        match self.store_lock.try_lock() {
            Some(_guard) => self.commit_locked(),
            None => Ok(None),
        }
    }

    pub fn commit(&self) -> Result<u64> {
        let _guard = self.store_lock.lock();
        Ok(self.commit_locked()?.unwrap_or_else(|| self.versions.current_version()))
    }

    fn commit_locked(&self) -> Result<Option<u64>> {
        self.check_not_closed()?;
        if !self.has_unsaved_changes() {
            return Ok(None);
        }

        let now = now_millis();
        let reclaimed = self.chunks.drop_unused_chunks(now, self.config.retention_time_ms, self.versions.oldest_version_to_keep());
        if !reclaimed.is_empty() {
            let mut free_space = self.free_space.lock();
            for chunk in &reclaimed {
                free_space.free(chunk.block, FreeSpaceMap::bytes_to_blocks(chunk.len));
                self.layout.write().remove_chunk_metadata(chunk.id);
                self.evict_chunk_from_caches(chunk);
            }
        }

        let v = self.versions.current_version() + 1;

        let mut sink = CommitSink {
            removed: Vec::new(),
            memory_delta: 0,
        };

        let dirty_user_maps = self.map_registry.dirty_roots(v);
        let mut serialized_roots: Vec<(u32, Page)> = Vec::new();
        {
            let mut open_maps = self.open_maps.lock();
            for (map_id, _old_root) in &dirty_user_maps {
                if let Some(bmap) = open_maps.get_mut(map_id) {
                    serialized_roots.push((*map_id, bmap.snapshot_page()));
                }
            }
        }

        let _serialization_guard = self.serialization_lock.lock();

        let mut page_buf = BytesMut::new();
        let mut toc_entries: Vec<TocEntry> = Vec::new();
        let mut new_roots: Vec<(u32, PagePos)> = Vec::new();

        let chunk_id = self.chunks.allocate_chunk_id();

        for (map_id, page) in &serialized_roots {
            if page.total_count() == 0 {
                continue;
            }
            let entry = page.write_into(&mut page_buf);
            let pos = PagePos::new(chunk_id, toc_entries.len() as u32, entry.length_code, entry.is_leaf);
            toc_entries.push(entry);
            new_roots.push((*map_id, pos));
        }

        // meta map, if dirty
        let meta_dirty = self.meta.read().is_dirty();
        let mut meta_pos = self.meta.read().root();
        if meta_dirty {
            let page = self.meta.read().snapshot_page();
            let entry = page.write_into(&mut page_buf);
            meta_pos = PagePos::new(chunk_id, toc_entries.len() as u32, entry.length_code, entry.is_leaf);
            toc_entries.push(entry);
        }

        // apply removed-page accounting gathered from prior versions before
        // snapshotting layout, so this commit's layout reflects it
        let touched = self.chunks.accept_chunk_occupancy_changes(now, v);
        {
            let mut layout = self.layout.write();
            for id in &touched {
                if let Some(chunk) = self.chunks.get(*id) {
                    layout.put_chunk_metadata(*id, chunk.to_metadata_string());
                }
            }
            for (map_id, pos) in &new_roots {
                layout.put_root(*map_id, *pos);
            }
        }

        // layout map itself is serialized last, so it can record this
        // commit's own chunk metadata once the chunk's geometry is known;
        // we reserve its slot now and patch it in below once `toc_pos` and
        // friends are known, then rewrite just that one ToC entry's bytes.
        let layout_snapshot = self.layout.read().snapshot_page();
        let layout_entry = layout_snapshot.write_into(&mut page_buf);
        let layout_pos_in_chunk_idx = toc_entries.len();
        toc_entries.push(layout_entry);

        let _save_chunk_guard = self.save_chunk_lock.lock();

        let toc_pos = (ChunkHeader::LENGTH + page_buf.len()) as u32;
        let mut toc_buf = BytesMut::with_capacity(toc_entries.len() * TocEntry::ENCODED_LEN);
        for entry in &toc_entries {
            entry.write_to(&mut toc_buf);
        }

        let unpadded_len = ChunkHeader::LENGTH + page_buf.len() + toc_buf.len() + ChunkFooter::LENGTH;
        let padded_len = unpadded_len.next_multiple_of(BLOCK_SIZE as usize);
        let len_blocks = FreeSpaceMap::bytes_to_blocks(padded_len as u64);

        let block = {
            let mut free_space = self.free_space.lock();
            free_space.allocate(len_blocks, 0, 0)
        };

        let layout_root_pos = PagePos::new(
            chunk_id,
            layout_pos_in_chunk_idx as u32,
            layout_entry.length_code,
            layout_entry.is_leaf,
        )
        .raw();

        let max_len: u64 = page_buf.len() as u64;

        let chunk = Chunk {
            id: chunk_id,
            version: v,
            time: now,
            block,
            len: padded_len as u64,
            page_count: toc_entries.len() as u32,
            page_count_live: toc_entries.len() as u32,
            max_len,
            max_len_live: max_len,
            occupancy: bitvec::vec::BitVec::repeat(false, toc_entries.len()),
            layout_root_pos,
            toc_pos,
            map_id: LAYOUT_MAP_ID,
            next: 0,
            unused: crate::chunk::UNSET,
            unused_at_version: crate::chunk::UNSET,
        };

        let mut out = self.buffer_pool.acquire();
        out.extend_from_slice(&vec![0u8; ChunkHeader::LENGTH]);
        out.extend_from_slice(&page_buf);
        out.extend_from_slice(&toc_buf);
        out.extend_from_slice(&chunk.to_footer().serialize());
        out.resize(padded_len, 0);
        out[..ChunkHeader::LENGTH].copy_from_slice(&chunk.to_header().serialize());

        self.backend.write_at(block * BLOCK_SIZE, &out)?;
        self.backend.sync()?;
        self.buffer_pool.release(out);

        self.chunks.insert(chunk.clone());
        self.layout.write().put_chunk_metadata(chunk_id, chunk.to_metadata_string());

        {
            let mut open_maps = self.open_maps.lock();
            for (map_id, pos) in &new_roots {
                self.map_registry.update_root(*map_id, *pos);
                self.layout.write().put_root(*map_id, *pos);
                if let Some(bmap) = open_maps.get_mut(map_id) {
                    bmap.commit_root(*pos, &mut sink);
                }
            }
        }
        if meta_dirty {
            self.meta.write().commit_root(meta_pos, &mut sink);
            self.layout.write().put_root(META_MAP_ID, meta_pos);
        }
        self.layout.write().commit_root(PagePos::from_raw(layout_root_pos), &mut sink);

        for (map_id, pos) in sink.removed {
            if let Some(old_chunk_id) = Some(pos.chunk_id()).filter(|_| !pos.is_none()) {
                let page_len = self.page_byte_len(pos).unwrap_or(0);
                self.chunks.account_for_removed_page(RemovedPageInfo {
                    chunk_id: old_chunk_id,
                    page_no: pos.page_number(),
                    page_len,
                    version: v,
                });
                let _ = map_id;
            }
        }

        self.versions.set_current_version(v);
        // No caller here holds a registered reader on the version this
        // commit just superseded, so the floor can follow current_version
        // right away; a registered reader pins it back down until it
        // deregisters.
        self.versions.advance_oldest_version_to_keep();
        self.unsaved_memory.store(0, Ordering::Relaxed);

        let header = crate::header::StoreHeader {
            format: crate::consts::FORMAT,
            format_read: crate::consts::FORMAT,
            created: self.created,
            chunk: chunk_id,
            block,
            version: v,
            clean: false,
        };
        self.write_header(&header)?;

        Ok(Some(v))
    }

    /// Reverts the store to version `target` by discarding every chunk
    /// written after it and reopening maps against their roots as of then.
    /// Idempotent: rolling back twice to the same version is a no-op the
    /// second time. Rejects a `target` that was never a committed version
    /// (any version but 0 needs a surviving chunk stamped with it), and
    /// re-stamps a clean header at the rolled-back state afterward so a
    /// crash before the next commit can't resurrect the discarded versions.
    pub fn rollback_to(&self, target: u64) -> Result<()> {
        let _guard = self.store_lock.lock();
        self.check_not_closed()?;
        if target >= self.versions.current_version() {
            return Ok(());
        }
        if target > 0 && !self.is_known_version(target) {
            return Err(crate::error::StorageError::IllegalArgument(format!(
                "rollback target {target} is not a known version"
            )));
        }
        let stale: Vec<u32> = self
            .chunks
            .ids()
            .into_iter()
            .filter(|id| self.chunks.get(*id).map(|c| c.version > target).unwrap_or(false))
            .collect();
        for id in stale {
            if let Some(chunk) = self.chunks.remove(id) {
                self.evict_chunk_from_caches(&chunk);
            }
            self.layout.write().remove_chunk_metadata(id);
        }
        self.versions.set_current_version(target);
        self.page_cache.clear();
        self.toc_cache.clear();
        self.open_maps.lock().clear();
        for map_id in self.map_registry.ids() {
            if let Some(info) = self.map_registry.get(map_id) {
                let root = self.layout.read().get_root(map_id).unwrap_or(btree::PagePos::NONE);
                let source = crate::store::StoreSource(self);
                let bmap = if root.is_none() {
                    btree::Map::new(map_id, info.create_version)
                } else {
                    btree::Map::open(map_id, info.create_version, root, &source)
                };
                self.open_maps.lock().insert(map_id, bmap);
                self.map_registry.update_root(map_id, root);
            }
        }

        let (chunk_id, block) = self
            .chunks
            .ids()
            .into_iter()
            .filter_map(|id| self.chunks.get(id))
            .find(|c| c.version == target)
            .map(|c| (c.id, c.block))
            .unwrap_or((0, 2));
        let header = crate::header::StoreHeader {
            format: crate::consts::FORMAT,
            format_read: crate::consts::FORMAT,
            created: self.created,
            chunk: chunk_id,
            block,
            version: target,
            clean: true,
        };
        self.write_header(&header)?;
        Ok(())
    }

    /// Whether `target` corresponds to an actual committed version still
    /// present in the chunk registry; version 0 (the pre-first-commit state)
    /// is always considered known since it needs no chunk to roll back to.
    fn is_known_version(&self, target: u64) -> bool {
        self.chunks
            .ids()
            .into_iter()
            .filter_map(|id| self.chunks.get(id))
            .any(|c| c.version == target)
    }
}
