use std::collections::BTreeMap;
use std::marker::PhantomData;

use crate::codec::Codec;
use crate::page::{Page, PageKind};
use crate::pos::PagePos;

/// Resolves a page position to its page. Implemented by the store (reading
/// through its page cache and, on miss, the chunk it lives in).
pub trait PageSource {
    fn read_page(&self, map_id: u32, pos: PagePos) -> Page;
}

/// Notified when a map's root is superseded, so the store can account the
/// old page as removed and track unsaved memory.
pub trait PageSink {
    fn note_removed(&mut self, map_id: u32, pos: PagePos);
    fn note_memory_delta(&mut self, delta: i64);
}

/// A named, ordered, copy-on-write map. Real B-trees split and merge pages
/// as they grow; this collaborator keeps every version's whole contents in
/// one leaf page instead, since the engine under test never looks past
/// `Page::write_into`/`Page::read_from`.
pub struct Map<K, V> {
    map_id: u32,
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    root: PagePos,
    create_version: u64,
    dirty: bool,
    _phantom: PhantomData<(K, V)>,
}

impl<K: Codec + Ord + Clone, V: Codec + Clone> Map<K, V> {
    pub fn new(map_id: u32, create_version: u64) -> Self {
        Map {
            map_id,
            entries: BTreeMap::new(),
            root: PagePos::NONE,
            create_version,
            dirty: false,
            _phantom: PhantomData,
        }
    }

    pub fn open(
        map_id: u32,
        create_version: u64,
        root: PagePos,
        source: &dyn PageSource,
    ) -> Self {
        let mut entries = BTreeMap::new();
        if !root.is_none() {
            let page = source.read_page(map_id, root);
            if let PageKind::Leaf { values } = page.kind {
                for (k, v) in page.keys.into_iter().zip(values.into_iter()) {
                    entries.insert(k, v);
                }
            }
        }
        Map {
            map_id,
            entries,
            root,
            create_version,
            dirty: false,
            _phantom: PhantomData,
        }
    }

    pub fn map_id(&self) -> u32 {
        self.map_id
    }

    pub fn create_version(&self) -> u64 {
        self.create_version
    }

    pub fn root(&self) -> PagePos {
        self.root
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(&key.encode()).map(|v| V::decode(v))
    }

    pub fn put(&mut self, key: K, value: V) {
        self.entries.insert(key.encode(), value.encode());
        self.dirty = true;
    }

    pub fn remove(&mut self, key: &K) -> bool {
        let removed = self.entries.remove(&key.encode()).is_some();
        self.dirty = self.dirty || removed;
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, V)> + '_ {
        self.entries
            .iter()
            .map(|(k, v)| (K::decode(k), V::decode(v)))
    }

    /// Builds the page representing this map's current contents, ready to
    /// be handed to the chunk serializer.
    pub fn snapshot_page(&self) -> Page {
        let (keys, values): (Vec<_>, Vec<_>) = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .unzip();
        Page::new_leaf(self.map_id, keys, values)
    }

    /// Records the new position produced by serializing [`Self::snapshot_page`]
    /// and reports the old root (if any) to `sink` for removal accounting.
    pub fn commit_root(&mut self, new_root: PagePos, sink: &mut dyn PageSink) {
        if !self.root.is_none() {
            sink.note_removed(self.map_id, self.root);
        }
        self.root = new_root;
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSource;
    impl PageSource for NullSource {
        fn read_page(&self, _map_id: u32, _pos: PagePos) -> Page {
            panic!("no pages to read")
        }
    }

    struct RecordingSink {
        removed: Vec<PagePos>,
        memory_delta: i64,
    }
    impl PageSink for RecordingSink {
        fn note_removed(&mut self, _map_id: u32, pos: PagePos) {
            self.removed.push(pos);
        }
        fn note_memory_delta(&mut self, delta: i64) {
            self.memory_delta += delta;
        }
    }

    #[test]
    fn put_get_remove() {
        let mut map: Map<String, String> = Map::new(1, 0);
        map.put("a".to_string(), "1".to_string());
        map.put("b".to_string(), "2".to_string());
        assert_eq!(map.get(&"a".to_string()), Some("1".to_string()));
        assert!(map.remove(&"a".to_string()));
        assert_eq!(map.get(&"a".to_string()), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn snapshot_and_reopen_roundtrips() {
        let mut map: Map<String, String> = Map::new(1, 0);
        map.put("k".to_string(), "v".to_string());
        let page = map.snapshot_page();
        let mut buf = bytes::BytesMut::new();
        let entry = page.write_into(&mut buf);
        let pos = PagePos::new(5, 0, entry.length_code, entry.is_leaf);

        struct FixedSource(Vec<u8>, u32);
        impl PageSource for FixedSource {
            fn read_page(&self, map_id: u32, _pos: PagePos) -> Page {
                Page::read_from(map_id, &self.0)
            }
        }
        let source = FixedSource(buf.to_vec(), 1);
        let reopened: Map<String, String> = Map::open(1, 0, pos, &source);
        assert_eq!(reopened.get(&"k".to_string()), Some("v".to_string()));
    }

    #[test]
    fn commit_root_reports_old_root() {
        let mut map: Map<String, String> = Map::new(1, 0);
        map.put("a".to_string(), "1".to_string());
        let mut sink = RecordingSink {
            removed: vec![],
            memory_delta: 0,
        };
        let first = PagePos::new(1, 0, 1, true);
        map.commit_root(first, &mut sink);
        assert!(sink.removed.is_empty());

        map.put("b".to_string(), "2".to_string());
        let second = PagePos::new(1, 1, 1, true);
        map.commit_root(second, &mut sink);
        assert_eq!(sink.removed, vec![first]);
        assert!(!map.is_dirty());
    }
}
