use std::collections::HashMap;

use btree::PagePos;
use parking_lot::Mutex;

/// Bookkeeping for one open named map: its id, its last-committed root, the
/// version it was created at, and whether it has uncommitted changes.
#[derive(Debug, Clone)]
pub struct OpenMapInfo {
    pub id: u32,
    pub name: String,
    pub root: PagePos,
    pub create_version: u64,
    pub dirty: bool,
}

/// Registry of every map currently open against the store. Guarded by a
/// single mutex; contention is expected to be low (map open/close, not
/// per-entry put/get).
#[derive(Default)]
pub struct MapRegistry {
    inner: Mutex<HashMap<u32, OpenMapInfo>>,
}

impl MapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, info: OpenMapInfo) {
        self.inner.lock().insert(info.id, info);
    }

    pub fn unregister(&self, id: u32) -> Option<OpenMapInfo> {
        self.inner.lock().remove(&id)
    }

    pub fn get(&self, id: u32) -> Option<OpenMapInfo> {
        self.inner.lock().get(&id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<OpenMapInfo> {
        self.inner.lock().values().find(|m| m.name == name).cloned()
    }

    pub fn mark_dirty(&self, id: u32) {
        if let Some(info) = self.inner.lock().get_mut(&id) {
            info.dirty = true;
        }
    }

    pub fn update_root(&self, id: u32, root: PagePos) {
        if let Some(info) = self.inner.lock().get_mut(&id) {
            info.root = root;
            info.dirty = false;
        }
    }

    /// Roots of every map whose `create_version < v` and that has unsaved
    /// changes — the set a commit needs to serialize (spec §4.2 step 3).
    pub fn dirty_roots(&self, v: u64) -> Vec<(u32, PagePos)> {
        self.inner
            .lock()
            .values()
            .filter(|m| m.create_version < v && m.dirty)
            .map(|m| (m.id, m.root))
            .collect()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.inner.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_roots_only_includes_changed_maps_created_before_v() {
        let registry = MapRegistry::new();
        registry.register(OpenMapInfo {
            id: 1,
            name: "a".into(),
            root: PagePos::NONE,
            create_version: 0,
            dirty: true,
        });
        registry.register(OpenMapInfo {
            id: 2,
            name: "b".into(),
            root: PagePos::NONE,
            create_version: 5,
            dirty: true,
        });
        let roots = registry.dirty_roots(3);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].0, 1);
    }

    #[test]
    fn update_root_clears_dirty_flag() {
        let registry = MapRegistry::new();
        registry.register(OpenMapInfo {
            id: 1,
            name: "a".into(),
            root: PagePos::NONE,
            create_version: 0,
            dirty: true,
        });
        let pos = PagePos::new(1, 0, 1, true);
        registry.update_root(1, pos);
        let info = registry.get(1).unwrap();
        assert_eq!(info.root, pos);
        assert!(!info.dirty);
    }
}
