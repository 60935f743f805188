//! A thin, ergonomic facade over [`storage::Store`]: open a store, open a
//! named map on it, and read/write through a small typed handle instead of
//! juggling map ids.

use std::sync::Arc;

pub use storage::{CompressionMode, Result, StorageError, Store, StoreConfig, StoreConfigBuilder};

/// A handle to one open named map within a [`Store`].
pub struct Map {
    store: Arc<Store>,
    id: u32,
}

impl Map {
    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        self.store.put(self.id, key.into(), value.into())
    }

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.store.get(self.id, key.as_ref())
    }

    pub fn remove(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        self.store.remove(self.id, key.as_ref())
    }
}

/// Opens a store and returns a handle, the entry point most callers reach
/// for instead of constructing [`Store`] directly.
pub fn open(config: StoreConfig) -> Result<Arc<Store>> {
    Store::open(config)
}

pub fn open_map(store: &Arc<Store>, name: &str) -> Result<Map> {
    let id = store.open_map(name)?;
    Ok(Map {
        store: store.clone(),
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facade_put_get_roundtrips() {
        let store = open(StoreConfig::builder().in_memory().build().unwrap()).unwrap();
        let map = open_map(&store, "widgets").unwrap();
        map.put("k", "v").unwrap();
        store.commit().unwrap();
        assert_eq!(map.get("k").unwrap(), Some(b"v".to_vec()));
    }
}
