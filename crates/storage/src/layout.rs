use btree::{Map, PageSink, PageSource};

use crate::consts::LAYOUT_MAP_ID;

/// The layout map (map id 0, always present): tracks every chunk's metadata
/// string and every open map's root position, keyed by prefix.
///
/// - `"chunk.<hex-id>"` -> [`crate::chunk::Chunk::to_metadata_string`]
/// - `"root.<hex-map-id>"` -> hex [`btree::PagePos::raw`]
pub struct LayoutMap {
    inner: Map<String, String>,
}

impl LayoutMap {
    pub fn new(create_version: u64) -> Self {
        LayoutMap {
            inner: Map::new(LAYOUT_MAP_ID, create_version),
        }
    }

    pub fn open(create_version: u64, root: btree::PagePos, source: &dyn PageSource) -> Self {
        LayoutMap {
            inner: Map::open(LAYOUT_MAP_ID, create_version, root, source),
        }
    }

    pub fn chunk_key(id: u32) -> String {
        format!("chunk.{id:08x}")
    }

    pub fn root_key(map_id: u32) -> String {
        format!("root.{map_id:08x}")
    }

    /// Restores an arbitrary key/value pair verbatim, used while rebuilding
    /// the map from a decoded page during recovery.
    pub fn put_chunk_metadata_raw(&mut self, key: String, value: String) {
        self.inner.put(key, value);
    }

    pub fn put_chunk_metadata(&mut self, id: u32, metadata: String) {
        self.inner.put(Self::chunk_key(id), metadata);
    }

    pub fn get_chunk_metadata(&self, id: u32) -> Option<String> {
        self.inner.get(&Self::chunk_key(id))
    }

    pub fn remove_chunk_metadata(&mut self, id: u32) {
        self.inner.remove(&Self::chunk_key(id));
    }

    pub fn put_root(&mut self, map_id: u32, pos: btree::PagePos) {
        self.inner.put(Self::root_key(map_id), format!("{:x}", pos.raw()));
    }

    pub fn get_root(&self, map_id: u32) -> Option<btree::PagePos> {
        self.inner
            .get(&Self::root_key(map_id))
            .and_then(|v| u64::from_str_radix(&v, 16).ok())
            .map(btree::PagePos::from_raw)
    }

    pub fn iter(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.inner.iter()
    }

    pub fn snapshot_page(&self) -> btree::Page {
        self.inner.snapshot_page()
    }

    pub fn commit_root(&mut self, new_root: btree::PagePos, sink: &mut dyn PageSink) {
        self.inner.commit_root(new_root, sink);
    }

    pub fn root(&self) -> btree::PagePos {
        self.inner.root()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.is_dirty()
    }
}
