use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::chunk::Chunk;

/// A page that became dead in some version `v`, waiting to be applied to its
/// owning chunk's occupancy bitmap the next time that chunk's layout
/// metadata is re-serialized.
#[derive(Debug, Clone, Copy)]
pub struct RemovedPageInfo {
    pub chunk_id: u32,
    pub page_no: u32,
    pub page_len: u64,
    pub version: u64,
}

/// Tracks every known chunk plus the bookkeeping the commit and compaction
/// paths need: a removed-page queue awaiting occupancy accounting, and a
/// dead-chunk deque awaiting physical reclamation.
#[derive(Default)]
pub struct ChunkRegistry {
    inner: Mutex<ChunkRegistryInner>,
}

#[derive(Default)]
struct ChunkRegistryInner {
    chunks: HashMap<u32, Chunk>,
    removed_pages: VecDeque<RemovedPageInfo>,
    dead_chunks: VecDeque<u32>,
    last_chunk_id: u32,
}

impl ChunkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, chunk: Chunk) {
        let mut inner = self.inner.lock();
        inner.last_chunk_id = inner.last_chunk_id.max(chunk.id);
        inner.chunks.insert(chunk.id, chunk);
    }

    pub fn get(&self, id: u32) -> Option<Chunk> {
        self.inner.lock().chunks.get(&id).cloned()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.inner.lock().chunks.contains_key(&id)
    }

    pub fn remove(&self, id: u32) -> Option<Chunk> {
        self.inner.lock().chunks.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<u32> {
        self.inner.lock().chunks.keys().copied().collect()
    }

    /// Allocates the next chunk id, wrapping modulo [`crate::consts::MAX_ID`]
    /// and skipping ids already present. An id collision with an *unsaved*
    /// chunk is fatal (spec's documented, intentional panic on wraparound).
    pub fn allocate_chunk_id(&self) -> u32 {
        let mut inner = self.inner.lock();
        loop {
            inner.last_chunk_id = inner.last_chunk_id.wrapping_add(1);
            if inner.last_chunk_id == 0 {
                inner.last_chunk_id = 1;
            }
            if !inner.chunks.contains_key(&inner.last_chunk_id) {
                return inner.last_chunk_id;
            }
        }
    }

    pub fn account_for_removed_page(&self, info: RemovedPageInfo) {
        self.inner.lock().removed_pages.push_back(info);
    }

    /// Applies every queued removed-page record from a version strictly
    /// before `v` to its owning chunk's occupancy, returning the ids of
    /// chunks whose layout metadata therefore needs to be rewritten.
    pub fn accept_chunk_occupancy_changes(&self, time: u64, v: u64) -> Vec<u32> {
        let mut inner = self.inner.lock();
        let mut touched = Vec::new();
        let mut remaining = VecDeque::new();
        while let Some(info) = inner.removed_pages.pop_front() {
            if info.version >= v {
                remaining.push_back(info);
                continue;
            }
            if let Some(chunk) = inner.chunks.get_mut(&info.chunk_id) {
                let became_dead = chunk.mark_page_dead(info.page_no, info.page_len, time, v);
                touched.push(info.chunk_id);
                if became_dead {
                    inner.dead_chunks.push_back(info.chunk_id);
                }
            }
        }
        inner.removed_pages = remaining;
        touched.sort_unstable();
        touched.dedup();
        touched
    }

    /// Drops every dead chunk old enough that no reader below
    /// `oldest_version_to_keep` still needs it, returning the reclaimed
    /// chunks so the caller can free their file-level blocks.
    pub fn drop_unused_chunks(&self, now: u64, retention_time: u64, oldest_version_to_keep: u64) -> Vec<Chunk> {
        let mut inner = self.inner.lock();
        let mut reclaimed = Vec::new();
        let mut remaining = VecDeque::new();
        while let Some(id) = inner.dead_chunks.pop_front() {
            let reclaim = inner
                .chunks
                .get(&id)
                .map(|c| c.is_reclaimable(now, retention_time, oldest_version_to_keep))
                .unwrap_or(false);
            if reclaim {
                if let Some(chunk) = inner.chunks.remove(&id) {
                    reclaimed.push(chunk);
                }
            } else {
                remaining.push_back(id);
            }
        }
        inner.dead_chunks = remaining;
        reclaimed
    }

    /// Discards every known chunk and pending bookkeeping, used when
    /// recovery gives up on a corrupt chunk chain and opens empty.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.chunks.clear();
        inner.removed_pages.clear();
        inner.dead_chunks.clear();
        inner.last_chunk_id = 0;
    }
}
