//! Read-through cache decorator for storage backends.
//!
//! [`CacheBackend`] wraps any backend and keeps a write-through in-memory map
//! of entries seen through it. Reads and writes made through the same
//! decorator instance are always coherent: a `get` after a `put` or `delete`
//! reflects that write. Writes made *directly* to the underlying store stay
//! invisible until [`CacheBackend::purge`] or a cache-invalidating write on
//! the same key — a documented stale-read window, not a bug. The core purges
//! the cache during post-unseal bring-up so a newly-active node never serves
//! entries from before it held the lock.
//!
//! Listings are never cached; they pass straight through.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::{StorageBackend, StorageError};

/// A write-through, read-through cache over another [`StorageBackend`].
#[derive(Debug)]
pub struct CacheBackend {
    inner: Arc<dyn StorageBackend>,
    cache: RwLock<HashMap<String, Vec<u8>>>,
}

impl CacheBackend {
    /// Wrap the given backend in a cache.
    #[must_use]
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Drop every cached entry. The underlying store is untouched.
    pub async fn purge(&self) {
        let mut cache = self.cache.write().await;
        let dropped = cache.len();
        cache.clear();
        debug!(entries = dropped, "storage cache purged");
    }
}

#[async_trait::async_trait]
impl StorageBackend for CacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        {
            let cache = self.cache.read().await;
            if let Some(value) = cache.get(key) {
                return Ok(Some(value.clone()));
            }
        }

        let value = self.inner.get(key).await?;
        if let Some(ref bytes) = value {
            let mut cache = self.cache.write().await;
            cache.insert(key.to_owned(), bytes.clone());
        }
        Ok(value)
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.inner.put(key, value).await?;
        let mut cache = self.cache.write().await;
        cache.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key).await?;
        let mut cache = self.cache.write().await;
        cache.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        // Listings always hit the backend; caching them would make prefix
        // results diverge from keys written through other instances.
        self.inner.list(prefix).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::MemoryBackend;

    fn make_cache() -> (Arc<MemoryBackend>, CacheBackend) {
        let inner = Arc::new(MemoryBackend::new());
        let cache = CacheBackend::new(Arc::clone(&inner) as Arc<dyn StorageBackend>);
        (inner, cache)
    }

    #[tokio::test]
    async fn read_through_populates_cache() {
        let (inner, cache) = make_cache();
        inner.put("foo", b"bar").await.unwrap();

        assert_eq!(cache.get("foo").await.unwrap(), Some(b"bar".to_vec()));

        // Delete beneath the cache — the cached copy must survive.
        inner.delete("foo").await.unwrap();
        assert_eq!(cache.get("foo").await.unwrap(), Some(b"bar".to_vec()));
    }

    #[tokio::test]
    async fn stale_read_until_purge() {
        let (inner, cache) = make_cache();
        cache.put("foo", b"bar").await.unwrap();

        inner.delete("foo").await.unwrap();
        assert_eq!(cache.get("foo").await.unwrap(), Some(b"bar".to_vec()));

        cache.purge().await;
        assert_eq!(cache.get("foo").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_writes_through() {
        let (inner, cache) = make_cache();
        cache.put("key", b"value").await.unwrap();
        assert_eq!(inner.get("key").await.unwrap(), Some(b"value".to_vec()));
    }

    #[tokio::test]
    async fn delete_invalidates_cached_entry() {
        let (inner, cache) = make_cache();
        cache.put("key", b"value").await.unwrap();
        cache.delete("key").await.unwrap();

        assert_eq!(cache.get("key").await.unwrap(), None);
        assert_eq!(inner.get("key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn purge_leaves_underlying_store_intact() {
        let (inner, cache) = make_cache();
        cache.put("key", b"value").await.unwrap();
        cache.purge().await;

        assert_eq!(inner.get("key").await.unwrap(), Some(b"value".to_vec()));
        // Re-read repopulates through the backend.
        assert_eq!(cache.get("key").await.unwrap(), Some(b"value".to_vec()));
    }

    #[tokio::test]
    async fn list_passes_through() {
        let (inner, cache) = make_cache();
        cache.put("kv/a", b"1").await.unwrap();
        inner.put("kv/b", b"2").await.unwrap();

        let keys = cache.list("kv/").await.unwrap();
        assert_eq!(keys, vec!["kv/a", "kv/b"]);
    }

    #[tokio::test]
    async fn misses_are_not_cached() {
        let (inner, cache) = make_cache();
        assert_eq!(cache.get("late").await.unwrap(), None);

        // A key created directly in the backend after a miss is visible —
        // only positive entries are cached.
        inner.put("late", b"now").await.unwrap();
        assert_eq!(cache.get("late").await.unwrap(), Some(b"now".to_vec()));
    }
}
