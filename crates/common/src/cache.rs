//! Bounded LRU cache for git objects.
//!
//! Entries are keyed by repository and object id and carry the Live State
//! generation they were filled under. A lookup made under any other
//! generation is a miss, and the refresh coordinator drops superseded
//! entries eagerly when it swaps in a new generation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use object_store::{ObjectId, TreeEntry};
use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// Which view of an object an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Tree,
    Blob,
    BlobSize,
    /// One fixed-size slice of a blob, by index.
    Chunk(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub repository: Arc<str>,
    pub id: ObjectId,
    pub kind: ObjectKind,
}

impl CacheKey {
    pub fn new(repository: &Arc<str>, id: ObjectId, kind: ObjectKind) -> Self {
        Self {
            repository: repository.clone(),
            id,
            kind,
        }
    }
}

/// Cached object data. Clones share the underlying buffers.
#[derive(Debug, Clone)]
pub enum CachedObject {
    Tree(Arc<Vec<TreeEntry>>),
    Blob(Bytes),
    BlobSize(u64),
}

impl CachedObject {
    fn weight(&self) -> u64 {
        let overhead = std::mem::size_of::<CacheKey>() + std::mem::size_of::<Self>();
        let body = match self {
            CachedObject::Tree(entries) => entries.iter().map(TreeEntry::weight).sum(),
            CachedObject::Blob(data) => data.len(),
            CachedObject::BlobSize(_) => 0,
        };
        (overhead + body) as u64
    }
}

#[derive(Debug, Clone)]
struct Tagged {
    generation: u64,
    object: CachedObject,
}

/// Configuration for the object cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectCacheConfig {
    /// Maximum cache size in megabytes
    pub max_size_mb: u64,
    /// Drop entries not read for this many seconds (0 disables idle expiry)
    pub time_to_idle_secs: u64,
}

impl Default for ObjectCacheConfig {
    fn default() -> Self {
        Self {
            max_size_mb: 256,
            time_to_idle_secs: 300,
        }
    }
}

/// Generation-tagged object cache shared by every filesystem operation.
#[derive(Clone)]
pub struct ObjectCache {
    entries: Cache<CacheKey, Tagged>,
    current: Arc<AtomicU64>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    config: ObjectCacheConfig,
}

impl ObjectCache {
    pub fn new(config: ObjectCacheConfig) -> Self {
        let capacity = Self::capacity_bytes(&config);
        let mut builder = Cache::builder()
            .eviction_policy(EvictionPolicy::lru())
            .max_capacity(capacity)
            .weigher(|_key: &CacheKey, value: &Tagged| -> u32 {
                value.object.weight().try_into().unwrap_or(u32::MAX)
            })
            .support_invalidation_closures();
        if config.time_to_idle_secs > 0 {
            builder = builder.time_to_idle(Duration::from_secs(config.time_to_idle_secs));
        }

        Self {
            entries: builder.build(),
            current: Arc::new(AtomicU64::new(0)),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    fn capacity_bytes(config: &ObjectCacheConfig) -> u64 {
        config.max_size_mb.saturating_mul(MIB)
    }

    /// Look up `key` as seen from `generation`.
    pub fn get(&self, key: &CacheKey, generation: u64) -> Option<CachedObject> {
        match self.entries.get(key) {
            Some(tagged) if tagged.generation == generation => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(tagged.object)
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Like [`get`](Self::get) but leaves the hit and miss counters alone.
    pub fn peek(&self, key: &CacheKey, generation: u64) -> Option<CachedObject> {
        self.entries
            .get(key)
            .filter(|tagged| tagged.generation == generation)
            .map(|tagged| tagged.object)
    }

    /// Store `object` under `key`, replacing any previous value.
    ///
    /// Ignored when `generation` is not the current one, so readers still
    /// working on a superseded snapshot never repopulate the cache.
    pub fn put(&self, key: CacheKey, object: CachedObject, generation: u64) {
        if generation != self.current.load(Ordering::Acquire) {
            return;
        }
        if object.weight() > Self::capacity_bytes(&self.config) {
            tracing::debug!(id = %key.id, "object larger than cache, not caching");
            return;
        }
        self.entries.insert(key, Tagged { generation, object });
    }

    /// Make `current` the live generation and drop every entry filled under
    /// another one.
    pub fn invalidate_generation(&self, current: u64) {
        self.current.store(current, Ordering::Release);
        if let Err(e) = self
            .entries
            .invalidate_entries_if(move |_key, tagged| tagged.generation != current)
        {
            tracing::warn!(error = %e, "predicate invalidation failed, clearing cache");
            self.entries.invalidate_all();
        }
    }

    /// Generation new entries are accepted for.
    pub fn generation(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Invalidate all cached entries
    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        self.entries.run_pending_tasks();
        CacheStats {
            entry_count: self.entries.entry_count(),
            weighted_size: self.entries.weighted_size(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            generation: self.generation(),
            max_size_mb: self.config.max_size_mb,
            time_to_idle_secs: self.config.time_to_idle_secs,
        }
    }
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("config", &self.config)
            .field("generation", &self.generation())
            .field("entry_count", &self.entries.entry_count())
            .finish()
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entry_count: u64,
    /// Approximate bytes held
    pub weighted_size: u64,
    pub hits: u64,
    pub misses: u64,
    pub generation: u64,
    pub max_size_mb: u64,
    pub time_to_idle_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::EntryKind;

    fn key(repo: &str, byte: u8, kind: ObjectKind) -> CacheKey {
        CacheKey::new(&Arc::from(repo), ObjectId::from([byte; 20]), kind)
    }

    fn blob(data: &'static [u8]) -> CachedObject {
        CachedObject::Blob(Bytes::from_static(data))
    }

    #[test]
    fn test_blob_cache() {
        let cache = ObjectCache::new(ObjectCacheConfig::default());
        cache.put(key("demo", 1, ObjectKind::Blob), blob(b"hello"), 0);

        match cache.get(&key("demo", 1, ObjectKind::Blob), 0) {
            Some(CachedObject::Blob(data)) => assert_eq!(data.as_ref(), b"hello"),
            other => panic!("expected blob, got {:?}", other),
        }
        assert!(cache.get(&key("other", 1, ObjectKind::Blob), 0).is_none());
        assert!(cache.get(&key("demo", 1, ObjectKind::BlobSize), 0).is_none());
        assert!(cache.get(&key("demo", 1, ObjectKind::Chunk(0)), 0).is_none());
    }

    #[test]
    fn test_tree_cache() {
        let cache = ObjectCache::new(ObjectCacheConfig::default());
        let entries = Arc::new(vec![TreeEntry {
            name: "guide.txt".to_string(),
            mode: EntryKind::MODE_BLOB,
            id: ObjectId::from([7; 20]),
            kind: EntryKind::Blob { executable: false },
        }]);
        cache.put(
            key("demo", 2, ObjectKind::Tree),
            CachedObject::Tree(entries.clone()),
            0,
        );

        match cache.get(&key("demo", 2, ObjectKind::Tree), 0) {
            Some(CachedObject::Tree(cached)) => assert!(Arc::ptr_eq(&cached, &entries)),
            other => panic!("expected tree, got {:?}", other),
        }
    }

    #[test]
    fn test_other_generation_is_a_miss() {
        let cache = ObjectCache::new(ObjectCacheConfig::default());
        cache.put(key("demo", 1, ObjectKind::Blob), blob(b"v0"), 0);
        assert!(cache.get(&key("demo", 1, ObjectKind::Blob), 1).is_none());
    }

    #[test]
    fn test_put_from_superseded_generation_is_ignored() {
        let cache = ObjectCache::new(ObjectCacheConfig::default());
        cache.invalidate_generation(3);
        cache.put(key("demo", 1, ObjectKind::Blob), blob(b"stale"), 2);
        assert!(cache.get(&key("demo", 1, ObjectKind::Blob), 2).is_none());

        cache.put(key("demo", 1, ObjectKind::Blob), blob(b"fresh"), 3);
        assert!(cache.get(&key("demo", 1, ObjectKind::Blob), 3).is_some());
    }

    #[test]
    fn test_invalidate_generation() {
        let cache = ObjectCache::new(ObjectCacheConfig::default());
        cache.put(key("demo", 1, ObjectKind::Blob), blob(b"a"), 0);
        cache.put(key("demo", 2, ObjectKind::BlobSize), CachedObject::BlobSize(1), 0);

        cache.invalidate_generation(1);
        assert!(cache.entries.get(&key("demo", 1, ObjectKind::Blob)).is_none());
        assert!(cache.entries.get(&key("demo", 2, ObjectKind::BlobSize)).is_none());
        assert_eq!(cache.generation(), 1);
    }

    #[test]
    fn test_put_overwrites() {
        let cache = ObjectCache::new(ObjectCacheConfig::default());
        cache.put(key("demo", 1, ObjectKind::BlobSize), CachedObject::BlobSize(1), 0);
        cache.put(key("demo", 1, ObjectKind::BlobSize), CachedObject::BlobSize(2), 0);
        assert!(matches!(
            cache.get(&key("demo", 1, ObjectKind::BlobSize), 0),
            Some(CachedObject::BlobSize(2))
        ));
    }

    #[test]
    fn test_eviction_respects_capacity() {
        let cache = ObjectCache::new(ObjectCacheConfig {
            max_size_mb: 1,
            time_to_idle_secs: 0,
        });
        let chunk = Bytes::from(vec![0u8; 300 * 1024]);
        for i in 0..8u8 {
            cache.put(
                key("demo", i, ObjectKind::Blob),
                CachedObject::Blob(chunk.clone()),
                0,
            );
        }
        let stats = cache.stats();
        assert!(stats.weighted_size <= MIB, "{stats:?}");
        assert!(stats.entry_count < 8);
    }

    #[test]
    fn test_oversized_object_is_not_cached() {
        let cache = ObjectCache::new(ObjectCacheConfig {
            max_size_mb: 1,
            time_to_idle_secs: 0,
        });
        let huge = CachedObject::Blob(Bytes::from(vec![0u8; 2 * MIB as usize]));
        cache.put(key("demo", 9, ObjectKind::Blob), huge, 0);
        assert!(cache.get(&key("demo", 9, ObjectKind::Blob), 0).is_none());
    }

    #[test]
    fn test_hit_and_miss_counters() {
        let cache = ObjectCache::new(ObjectCacheConfig::default());
        cache.put(key("demo", 1, ObjectKind::Blob), blob(b"x"), 0);
        let _ = cache.get(&key("demo", 1, ObjectKind::Blob), 0);
        let _ = cache.get(&key("demo", 2, ObjectKind::Blob), 0);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_peek_is_not_counted() {
        let cache = ObjectCache::new(ObjectCacheConfig::default());
        cache.put(key("demo", 1, ObjectKind::Chunk(3)), blob(b"x"), 0);
        assert!(cache.peek(&key("demo", 1, ObjectKind::Chunk(3)), 0).is_some());
        assert!(cache.peek(&key("demo", 1, ObjectKind::Chunk(3)), 1).is_none());
        assert!(cache.peek(&key("demo", 1, ObjectKind::Blob), 0).is_none());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (0, 0));
    }
}
