use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use btree::{Map as BMap, Page, PagePos, PageSink, PageSource, TocEntry};
use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::buffer_pool::BufferPool;
use crate::cache::ShardedCache;
use crate::chunk::Chunk;
use crate::chunk_header_footer::{ChunkFooter, ChunkHeader};
use crate::chunk_registry::ChunkRegistry;
use crate::config::StoreConfig;
use crate::consts::{
    BLOCK_SIZE, DEFAULT_RETENTION_TIME_MS, FORMAT_READ_MAX, FORMAT_READ_MIN, FORMAT_WRITE_MAX, FORMAT_WRITE_MIN,
    LAYOUT_MAP_ID, META_MAP_ID,
};
use crate::error::{Result, StorageError};
use crate::file_io::{FileBackend, InMemoryBackend, OsFileBackend};
use crate::free_space::FreeSpaceMap;
use crate::header::StoreHeader;
use crate::layout::LayoutMap;
use crate::map_registry::{MapRegistry, OpenMapInfo};
use crate::meta::MetaMap;
use crate::time::{now_millis, sanitize_creation_time};
use crate::version::VersionTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Open,
    Stopping,
    Closing,
    Closed,
}

/// The top-level engine. Owns the file backend, every registry, and the
/// three commit-pipeline locks (`store_lock`, `serialization_lock`,
/// `save_chunk_lock`), acquired strictly in that order.
pub struct Store {
    pub(crate) config: StoreConfig,
    pub(crate) backend: Arc<dyn FileBackend>,
    pub(crate) state: Mutex<Lifecycle>,
    pub(crate) store_lock: Mutex<()>,
    pub(crate) serialization_lock: Mutex<()>,
    pub(crate) save_chunk_lock: Mutex<()>,
    pub(crate) chunks: ChunkRegistry,
    pub(crate) map_registry: MapRegistry,
    pub(crate) open_maps: Mutex<HashMap<u32, BMap<Vec<u8>, Vec<u8>>>>,
    pub(crate) versions: VersionTracker,
    pub(crate) free_space: Mutex<FreeSpaceMap>,
    pub(crate) buffer_pool: BufferPool,
    pub(crate) page_cache: ShardedCache<u64, Arc<Page>>,
    pub(crate) toc_cache: ShardedCache<u32, Arc<Vec<TocEntry>>>,
    pub(crate) layout: RwLock<LayoutMap>,
    pub(crate) meta: RwLock<MetaMap>,
    pub(crate) panic: Mutex<Option<StorageError>>,
    pub(crate) created: u64,
    pub(crate) unsaved_memory: AtomicI64,
}

impl Store {
    pub fn open(mut config: StoreConfig) -> Result<Arc<Store>> {
        let backend: Arc<dyn FileBackend> = match &config.file_name {
            Some(name) => Arc::new(OsFileBackend::open(name, config.read_only)?),
            None => InMemoryBackend::new(),
        };
        if !config.read_only {
            backend.lock_exclusive()?;
        }

        // The passphrase only exists to derive a key while opening; the
        // store never keeps it around past that, so it's taken and dropped
        // here rather than stored on `self.config`.
        let _encryption_key = config.encryption_key.take();

        let page_cache_capacity = (config.cache_size_mb * 1024 * 1024) / 4096;
        let store = Store {
            backend,
            state: Mutex::new(Lifecycle::Open),
            store_lock: Mutex::new(()),
            serialization_lock: Mutex::new(()),
            save_chunk_lock: Mutex::new(()),
            chunks: ChunkRegistry::new(),
            map_registry: MapRegistry::new(),
            open_maps: Mutex::new(HashMap::new()),
            versions: VersionTracker::new(),
            free_space: Mutex::new(FreeSpaceMap::new()),
            buffer_pool: BufferPool::new(),
            page_cache: ShardedCache::new(page_cache_capacity.max(1), config.cache_concurrency),
            toc_cache: ShardedCache::new(1024, config.cache_concurrency),
            layout: RwLock::new(LayoutMap::new(0)),
            meta: RwLock::new(MetaMap::new(META_MAP_ID, 0)),
            panic: Mutex::new(None),
            created: now_millis(),
            unsaved_memory: AtomicI64::new(0),
            config,
        };

        let store = Arc::new(store);
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        let size = self.backend.size()?;
        if size < 2 * BLOCK_SIZE {
            self.init_empty()
        } else {
            self.recover()
        }
    }

    fn init_empty(&self) -> Result<()> {
        let created = sanitize_creation_time(self.created, self.created, DEFAULT_RETENTION_TIME_MS);
        let header = StoreHeader {
            format: crate::consts::FORMAT,
            format_read: crate::consts::FORMAT,
            created,
            chunk: 0,
            block: 2,
            version: 0,
            clean: true,
        };
        self.write_header(&header)?;
        self.versions.set_current_version(0);
        self.meta.write().set_store_version(header.format);
        Ok(())
    }

    pub(crate) fn write_header(&self, header: &StoreHeader) -> Result<()> {
        let bytes = header.serialize();
        self.backend.write_at(0, &bytes)?;
        self.backend.write_at(BLOCK_SIZE, &bytes)?;
        self.backend.sync()
    }

    pub fn current_version(&self) -> u64 {
        self.versions.current_version()
    }

    pub fn is_in_memory(&self) -> bool {
        self.config.is_in_memory()
    }

    pub(crate) fn check_not_closed(&self) -> Result<()> {
        if let Some(err) = self.panic.lock().clone() {
            return Err(err);
        }
        if *self.state.lock() == Lifecycle::Closed {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    /// Latches the store: stores `error`, attempts a best-effort immediate
    /// close, and re-raises. Every later public call returns the same error.
    pub fn panic(&self, error: StorageError) -> StorageError {
        *self.panic.lock() = Some(error.clone());
        let _ = self.close_immediately_inner();
        error
    }

    fn close_immediately_inner(&self) -> Result<()> {
        *self.state.lock() = Lifecycle::Closed;
        Ok(())
    }

    pub fn close_immediately(&self) {
        let _ = self.close_immediately_inner();
    }

    pub fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state == Lifecycle::Closed {
                return Ok(());
            }
            *state = Lifecycle::Stopping;
        }
        self.commit()?;
        *self.state.lock() = Lifecycle::Closing;

        let header = StoreHeader {
            format: crate::consts::FORMAT,
            format_read: crate::consts::FORMAT,
            created: self.created,
            chunk: self.chunks.ids().into_iter().max().unwrap_or(0),
            block: 2,
            version: self.versions.current_version(),
            clean: true,
        };
        self.write_header(&header)?;
        self.page_cache.clear();
        self.toc_cache.clear();
        *self.state.lock() = Lifecycle::Closed;
        Ok(())
    }

    pub fn open_map(&self, name: &str) -> Result<u32> {
        self.check_not_closed()?;
        if let Some(info) = self.map_registry.find_by_name(name) {
            return Ok(info.id);
        }
        let (id, root, create_version) = {
            let mut meta = self.meta.write();
            if let Some(id) = meta.lookup_id(name) {
                let root = self.layout.read().get_root(id).unwrap_or(PagePos::NONE);
                (id, root, meta.create_version_of(id).unwrap_or(0))
            } else {
                let id = meta.next_map_id();
                let v = self.versions.current_version();
                meta.register_map(id, name, v);
                (id, PagePos::NONE, v)
            }
        };
        let source = StoreSource(self);
        let bmap: BMap<Vec<u8>, Vec<u8>> = if root.is_none() {
            BMap::new(id, create_version)
        } else {
            BMap::open(id, create_version, root, &source)
        };
        self.open_maps.lock().insert(id, bmap);
        self.map_registry.register(OpenMapInfo {
            id,
            name: name.to_string(),
            root,
            create_version,
            dirty: false,
        });
        Ok(id)
    }

    pub fn put(&self, map_id: u32, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.check_not_closed()?;
        let mut maps = self.open_maps.lock();
        let bmap = maps
            .get_mut(&map_id)
            .ok_or_else(|| StorageError::IllegalArgument(format!("map {map_id} not open")))?;
        bmap.put(key, value);
        drop(maps);
        self.map_registry.mark_dirty(map_id);
        self.unsaved_memory.fetch_add(64, Ordering::Relaxed);
        Ok(())
    }

    pub fn get(&self, map_id: u32, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_not_closed()?;
        let maps = self.open_maps.lock();
        let bmap = maps
            .get(&map_id)
            .ok_or_else(|| StorageError::IllegalArgument(format!("map {map_id} not open")))?;
        Ok(bmap.get(&key.to_vec()))
    }

    pub fn remove(&self, map_id: u32, key: &[u8]) -> Result<bool> {
        self.check_not_closed()?;
        let mut maps = self.open_maps.lock();
        let bmap = maps
            .get_mut(&map_id)
            .ok_or_else(|| StorageError::IllegalArgument(format!("map {map_id} not open")))?;
        let removed = bmap.remove(&key.to_vec());
        drop(maps);
        if removed {
            self.map_registry.mark_dirty(map_id);
        }
        Ok(removed)
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved_memory.load(Ordering::Relaxed) > 0
    }

    pub(crate) fn read_toc(&self, chunk: &Chunk) -> Result<Arc<Vec<TocEntry>>> {
        if let Some(cached) = self.toc_cache.get(&chunk.id) {
            return Ok(cached);
        }
        let offset = chunk.block * BLOCK_SIZE + chunk.toc_pos as u64;
        let bytes = self
            .backend
            .read_at(offset, chunk.page_count as usize * TocEntry::ENCODED_LEN)?;
        let mut slice = &bytes[..];
        let entries: Vec<TocEntry> = (0..chunk.page_count).map(|_| TocEntry::read_from(&mut slice)).collect();
        let entries = Arc::new(entries);
        self.toc_cache.put(chunk.id, entries.clone());
        Ok(entries)
    }

    /// Byte length of the page at `pos` as stored on disk, used to keep a
    /// superseded root's chunk occupancy accounting byte-accurate instead of
    /// only page-count-accurate.
    pub(crate) fn page_byte_len(&self, pos: PagePos) -> Result<u64> {
        let chunk = self.chunks.get(pos.chunk_id()).ok_or(StorageError::ChunkNotFound(pos.chunk_id()))?;
        let toc = self.read_toc(&chunk)?;
        let idx = pos.page_number() as usize;
        let entry = *toc
            .get(idx)
            .ok_or_else(|| StorageError::FileCorrupt(format!("missing toc entry {idx}")))?;
        let end = if idx + 1 < toc.len() {
            toc[idx + 1].offset as u64
        } else {
            chunk.toc_pos as u64 - ChunkHeader::LENGTH as u64
        };
        Ok(end - entry.offset as u64)
    }

    pub(crate) fn read_page_raw(&self, map_id: u32, pos: PagePos) -> Result<Page> {
        if let Some(cached) = self.page_cache.get(&pos.raw()) {
            return Ok((*cached).clone());
        }
        let chunk = self
            .chunks
            .get(pos.chunk_id())
            .ok_or(StorageError::ChunkNotFound(pos.chunk_id()))?;
        let toc = self.read_toc(&chunk)?;
        let idx = pos.page_number() as usize;
        let entry = *toc
            .get(idx)
            .ok_or_else(|| StorageError::FileCorrupt(format!("missing toc entry {idx}")))?;
        let data_start = chunk.block * BLOCK_SIZE + ChunkHeader::LENGTH as u64;
        let start = data_start + entry.offset as u64;
        let end = if idx + 1 < toc.len() {
            data_start + toc[idx + 1].offset as u64
        } else {
            chunk.block * BLOCK_SIZE + chunk.toc_pos as u64
        };
        let bytes = self.backend.read_at(start, (end - start) as usize)?;
        let page = Page::read_from(map_id, &bytes);
        self.page_cache.put(pos.raw(), Arc::new(page.clone()));
        Ok(page)
    }

    fn recover(&self) -> Result<()> {
        let header = self.read_valid_header()?;
        self.validate_format(&header)?;

        match self.recover_chunk_chain(&header) {
            Ok(()) => Ok(()),
            Err(e) if self.config.recovery_mode => {
                // Degrade to an empty, writable store rather than propagate a
                // torn-write or truncated-tail error: the caller asked to be
                // tolerant of a crash that landed mid-commit.
                warn!(error = %e, "recovery_mode: discarding unreadable chunk chain, opening empty");
                self.chunks.clear();
                self.free_space.lock().clear();
                *self.layout.write() = LayoutMap::new(0);
                *self.meta.write() = MetaMap::new(META_MAP_ID, 0);
                self.versions.set_current_version(0);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Rejects a file written by a format this build can't interpret. Write
    /// access additionally requires the narrower write-compatible range,
    /// since opening read-write on an old format would silently upgrade it
    /// on the next commit.
    fn validate_format(&self, header: &StoreHeader) -> Result<()> {
        let (min, max) = if self.config.read_only {
            (FORMAT_READ_MIN, FORMAT_READ_MAX)
        } else {
            (FORMAT_WRITE_MIN, FORMAT_WRITE_MAX)
        };
        if header.format < min || header.format > max {
            return Err(StorageError::UnsupportedFormat {
                found: header.format,
                min,
                max,
            });
        }
        Ok(())
    }

    /// Loads the chunk the header claims is newest, falling back to a
    /// backward scan of the file for the newest chunk that still verifies
    /// when that one is missing or torn (the header's own double-copy write
    /// can still outrun a crash mid-commit, leaving it pointing at a chunk
    /// that never finished landing).
    fn recover_chunk_chain(&self, header: &StoreHeader) -> Result<()> {
        let chunk = match self.load_chunk_at(header.block) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "header-referenced chunk unreadable, scanning for the last valid one");
                self.discover_last_valid_chunk()?
            }
        };
        self.versions.set_current_version(chunk.version);
        self.chunks.insert(chunk.clone());

        if chunk.layout_root_pos != 0 {
            let layout_pos = PagePos::from_raw(chunk.layout_root_pos);
            let layout_page = self.read_page_raw(LAYOUT_MAP_ID, layout_pos)?;
            let mut layout = LayoutMap::new(0);
            if let btree::PageKind::Leaf { values } = &layout_page.kind {
                for (k, v) in layout_page.keys.iter().zip(values.iter()) {
                    let key = String::from_utf8_lossy(k).to_string();
                    let value = String::from_utf8_lossy(v).to_string();
                    if let Some(id_hex) = key.strip_prefix("chunk.") {
                        if let Ok(id) = u32::from_str_radix(id_hex, 16) {
                            if let Ok(restored) = crate::chunk::Chunk::from_metadata_string(id, &value) {
                                self.chunks.insert(restored);
                            }
                        }
                    }
                    layout.put_chunk_metadata_raw(key, value);
                }
            }
            *self.layout.write() = layout;
        }

        // Rebuild the free-space map: every saved chunk's blocks are in use.
        {
            let mut free_space = self.free_space.lock();
            for id in self.chunks.ids() {
                if let Some(chunk) = self.chunks.get(id) {
                    if chunk.is_allocated() {
                        free_space.mark_used(chunk.block, FreeSpaceMap::bytes_to_blocks(chunk.len));
                    }
                }
            }
        }

        if let Some(meta_root) = self.layout.read().get_root(META_MAP_ID) {
            let page = self.read_page_raw(META_MAP_ID, meta_root)?;
            let mut meta = MetaMap::new(META_MAP_ID, 0);
            if let btree::PageKind::Leaf { values } = &page.kind {
                for (k, v) in page.keys.iter().zip(values.iter()) {
                    let key = String::from_utf8_lossy(k).to_string();
                    let value = String::from_utf8_lossy(v).to_string();
                    meta.put_raw(key, value);
                }
            }
            *self.meta.write() = meta;
        }
        Ok(())
    }

    fn read_valid_header(&self) -> Result<StoreHeader> {
        let first = self.backend.read_at(0, BLOCK_SIZE as usize)?;
        let second = self.backend.read_at(BLOCK_SIZE, BLOCK_SIZE as usize)?;
        let a = StoreHeader::deserialize(&first);
        let b = StoreHeader::deserialize(&second);
        match (a, b) {
            (Ok(a), Ok(b)) => Ok(if a.version >= b.version { a } else { b }),
            (Ok(a), Err(_)) => Ok(a),
            (Err(_), Ok(b)) => Ok(b),
            (Err(e), Err(_)) => Err(e),
        }
    }

    fn chunks_present_at_block(&self, block: u64) -> Result<bool> {
        Ok(self.backend.size()? > block * BLOCK_SIZE + ChunkHeader::LENGTH as u64)
    }

    fn read_chunk_header(&self, block: u64) -> Result<ChunkHeader> {
        let bytes = self.backend.read_at(block * BLOCK_SIZE, ChunkHeader::LENGTH)?;
        ChunkHeader::deserialize(&bytes)
    }

    /// Loads and footer-verifies the chunk at `block`, failing if either its
    /// header or its footer doesn't check out.
    fn load_chunk_at(&self, block: u64) -> Result<Chunk> {
        if !self.chunks_present_at_block(block)? {
            return Err(StorageError::FileCorrupt("no chunk header at block".into()));
        }
        let chunk_header = self.read_chunk_header(block)?;
        let chunk = Chunk::from_header(chunk_header);
        self.verify_chunk_footer(&chunk)?;
        Ok(chunk)
    }

    /// Backward byte-scan for the newest chunk still intact, used when the
    /// header-referenced chunk can't be loaded. Every chunk's layout page is
    /// a full snapshot of the whole chunk registry and every map root as of
    /// that chunk's version, so any single verified chunk is enough to
    /// reconstruct the entire store state — no multi-chunk chain walk is
    /// needed, just the best `(version DESC, block ASC)` survivor.
    fn discover_last_valid_chunk(&self) -> Result<Chunk> {
        let size = self.backend.size()?;
        let last_block = size / BLOCK_SIZE;
        let mut best: Option<Chunk> = None;
        let mut block = last_block;
        while block > 2 {
            block -= 1;
            let Ok(chunk) = self.load_chunk_at(block) else {
                continue;
            };
            if chunk.block != block {
                continue;
            }
            let better = match &best {
                None => true,
                Some(b) => (chunk.version, std::cmp::Reverse(chunk.block)) > (b.version, std::cmp::Reverse(b.block)),
            };
            if better {
                best = Some(chunk);
            }
        }
        best.ok_or_else(|| StorageError::FileCorrupt("no valid chunk found by backward scan".into()))
    }

    pub(crate) fn verify_chunk_footer(&self, chunk: &Chunk) -> Result<()> {
        let footer_offset =
            chunk.block * BLOCK_SIZE + chunk.toc_pos as u64 + chunk.page_count as u64 * TocEntry::ENCODED_LEN as u64;
        let bytes = self.backend.read_at(footer_offset, ChunkFooter::LENGTH)?;
        let footer = ChunkFooter::deserialize(&bytes)?;
        if footer.id != chunk.id || footer.version != chunk.version || footer.block != chunk.block {
            return Err(StorageError::FileCorrupt("chunk footer does not match its header".into()));
        }
        Ok(())
    }

    /// Evicts every page of `chunk` from the page cache plus its own ToC
    /// cache entry, used right before its blocks are freed so a later read
    /// of a reused block can never return a stale cached page.
    pub(crate) fn evict_chunk_from_caches(&self, chunk: &Chunk) {
        if let Ok(toc) = self.read_toc(chunk) {
            for (idx, entry) in toc.iter().enumerate() {
                let pos = PagePos::new(chunk.id, idx as u32, entry.length_code, entry.is_leaf);
                self.page_cache.remove(&pos.raw());
            }
        }
        self.toc_cache.remove(&chunk.id);
    }
}

/// Adapter letting [`Store`] satisfy `btree`'s page-reading contract without
/// `btree` depending back on `storage`.
pub(crate) struct StoreSource<'a>(pub &'a Store);

impl PageSource for StoreSource<'_> {
    fn read_page(&self, map_id: u32, pos: PagePos) -> Page {
        self.0
            .read_page_raw(map_id, pos)
            .unwrap_or_else(|e| panic!("failed to read page {pos:?}: {e}"))
    }
}

pub(crate) struct CommitSink {
    pub removed: Vec<(u32, PagePos)>,
    pub memory_delta: i64,
}

impl PageSink for CommitSink {
    fn note_removed(&mut self, map_id: u32, pos: PagePos) {
        self.removed.push((map_id, pos));
    }

    fn note_memory_delta(&mut self, delta: i64) {
        self.memory_delta += delta;
    }
}
