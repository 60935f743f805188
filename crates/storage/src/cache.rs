use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

/// A cache sharded into `cacheConcurrency` segments, each independently
/// capacity-bounded and guarded by its own lock — the pragmatic stand-in for
/// the source's purpose-built LIRS cache (see DESIGN.md).
pub struct ShardedCache<K, V> {
    shards: Vec<Mutex<LruCache<K, V>>>,
}

impl<K: Hash + Eq + Clone, V: Clone> ShardedCache<K, V> {
    pub fn new(total_capacity: usize, shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let per_shard = (total_capacity / shard_count).max(1);
        let cap = NonZeroUsize::new(per_shard).unwrap();
        let shards = (0..shard_count)
            .map(|_| Mutex::new(LruCache::new(cap)))
            .collect();
        ShardedCache { shards }
    }

    fn shard_for(&self, key: &K) -> &Mutex<LruCache<K, V>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.shard_for(key).lock().get(key).cloned()
    }

    pub fn put(&self, key: K, value: V) {
        self.shard_for(&key).lock().put(key, value);
    }

    pub fn remove(&self, key: &K) {
        self.shard_for(key).lock().pop(key);
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get() {
        let cache: ShardedCache<u64, String> = ShardedCache::new(16, 4);
        cache.put(1, "a".to_string());
        assert_eq!(cache.get(&1), Some("a".to_string()));
        assert_eq!(cache.get(&2), None);
    }

    #[test]
    fn remove_evicts_entry() {
        let cache: ShardedCache<u64, String> = ShardedCache::new(16, 4);
        cache.put(1, "a".to_string());
        cache.remove(&1);
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn clear_empties_all_shards() {
        let cache: ShardedCache<u64, String> = ShardedCache::new(16, 4);
        for i in 0..10 {
            cache.put(i, i.to_string());
        }
        cache.clear();
        assert!(cache.is_empty());
    }
}
