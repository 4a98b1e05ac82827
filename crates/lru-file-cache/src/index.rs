//! In-memory LRU index of cached files

use crate::types::{CacheEntry, CacheStats};
use lru::LruCache;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Item-bounded LRU index mapping cache keys to file paths.
///
/// Every operation takes the same mutex. Evicting an entry deletes its file
/// while the lock is held, so the mapping and the directory never disagree
/// about an evicted key. A capacity of zero turns the index into a no-op.
pub struct CacheIndex {
    /// `None` when the capacity is zero
    entries: Option<Mutex<LruCache<String, PathBuf>>>,
    capacity: usize,
    /// Cache hit counter
    hits: AtomicU64,
    /// Cache miss counter
    misses: AtomicU64,
}

impl CacheIndex {
    /// Create an empty index holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        let entries = NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        if entries.is_none() {
            warn!("Cache capacity is zero, caching is disabled");
        }

        Self {
            entries,
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the index can hold anything at all
    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    /// Look up the file for `key`, marking it most recently used.
    ///
    /// Never touches the disk: a returned path may have been removed out of
    /// band, and callers must treat a failed open as a miss.
    pub async fn get(&self, key: &str) -> Option<PathBuf> {
        let found = match &self.entries {
            Some(entries) => entries.lock().await.get(key).cloned(),
            None => None,
        };

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache miss");
        }
        found
    }

    /// Publish `path` as the file for `key`.
    ///
    /// The file must already be fully written. Updating an existing key only
    /// swaps the path and refreshes recency; the previous path is left alone.
    /// Inserting a new key into a full index first evicts the least recently
    /// used entry and deletes its file. Deletion failures are logged and never
    /// fail the insert.
    pub async fn put(&self, key: impl Into<String>, path: impl Into<PathBuf>) {
        let key = key.into();
        let path = path.into();

        let Some(entries) = &self.entries else {
            debug!(key = %key, "Cache capacity is zero, skipping insert");
            return;
        };

        let mut entries = entries.lock().await;

        if let Some(existing) = entries.get_mut(&key) {
            *existing = path;
            debug!(key = %key, "Updated cache entry");
            return;
        }

        if entries.len() >= self.capacity {
            if let Some((evicted_key, evicted_path)) = entries.pop_lru() {
                remove_evicted_file(&evicted_path).await;
                debug!(key = %evicted_key, path = ?evicted_path, "Evicted cache entry");
            }
        }

        debug!(key = %key, path = ?path, "Added cache entry");
        entries.put(key, path);
    }

    /// Drop the mapping for `key` without touching the disk
    pub async fn remove(&self, key: &str) -> Option<PathBuf> {
        let entries = self.entries.as_ref()?;
        let removed = entries.lock().await.pop(key);
        if removed.is_some() {
            debug!(key = %key, "Removed cache entry");
        }
        removed
    }

    /// Drop the entry for `key` only if it still maps to `path`.
    ///
    /// For a path returned by [`get`](Self::get) whose file turned out to be
    /// missing. A newer path published for the same key in the meantime is
    /// kept. The lookup that returned `path` is recounted as a miss.
    pub async fn remove_stale(&self, key: &str, path: &Path) -> bool {
        let Some(entries) = &self.entries else {
            return false;
        };

        let removed = {
            let mut entries = entries.lock().await;
            if entries.peek(key).is_some_and(|current| current == path) {
                entries.pop(key).is_some()
            } else {
                false
            }
        };

        let _ = self
            .hits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |h| h.checked_sub(1));
        self.misses.fetch_add(1, Ordering::Relaxed);

        if removed {
            debug!(key = %key, path = ?path, "Removed stale cache entry");
        }
        removed
    }

    /// Number of published entries
    pub async fn len(&self) -> usize {
        match &self.entries {
            Some(entries) => entries.lock().await.len(),
            None => 0,
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of all entries, most recently used first. Does not touch recency.
    pub async fn entries(&self) -> Vec<CacheEntry> {
        match &self.entries {
            Some(entries) => entries
                .lock()
                .await
                .iter()
                .map(|(key, path)| CacheEntry {
                    key: key.clone(),
                    path: path.clone(),
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Get current cache statistics
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len().await,
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

async fn remove_evicted_file(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?path, error = %e, "Failed to remove evicted cache file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn write_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, name.as_bytes()).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let index = CacheIndex::new(10);
        index.put("a", "/cache/a.jpg").await;

        assert_eq!(index.get("a").await, Some(PathBuf::from("/cache/a.jpg")));
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let index = CacheIndex::new(10);
        assert!(index.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_evicts_least_recently_inserted() {
        let dir = tempdir().unwrap();
        let index = CacheIndex::new(3);

        for name in ["k1", "k2", "k3", "k4"] {
            let path = write_file(dir.path(), name).await;
            index.put(name, path).await;
        }

        assert!(index.get("k1").await.is_none());
        for name in ["k2", "k3", "k4"] {
            assert!(index.get(name).await.is_some(), "{name} should be cached");
        }
        assert_eq!(index.len().await, 3);
    }

    #[tokio::test]
    async fn test_get_protects_from_eviction() {
        let dir = tempdir().unwrap();
        let index = CacheIndex::new(2);

        let a = write_file(dir.path(), "a").await;
        let b = write_file(dir.path(), "b").await;
        let c = write_file(dir.path(), "c").await;

        index.put("a", &a).await;
        index.put("b", &b).await;

        // "a" is the oldest until it is read
        assert!(index.get("a").await.is_some());
        index.put("c", &c).await;

        assert!(index.get("a").await.is_some());
        assert!(index.get("b").await.is_none());
        assert!(index.get("c").await.is_some());
        assert!(!b.exists());
        assert!(a.exists());
    }

    #[tokio::test]
    async fn test_eviction_deletes_file() {
        let dir = tempdir().unwrap();
        let index = CacheIndex::new(1);

        let first = write_file(dir.path(), "first").await;
        let second = write_file(dir.path(), "second").await;

        index.put("first", &first).await;
        index.put("second", &second).await;

        let err = fs::metadata(&first).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(second.exists());
    }

    #[tokio::test]
    async fn test_eviction_of_missing_file_still_inserts() {
        let dir = tempdir().unwrap();
        let index = CacheIndex::new(1);

        index.put("gone", dir.path().join("never-written")).await;
        let kept = write_file(dir.path(), "kept").await;
        index.put("kept", &kept).await;

        assert!(index.get("gone").await.is_none());
        assert_eq!(index.get("kept").await, Some(kept));
    }

    #[tokio::test]
    async fn test_zero_capacity_never_hits() {
        let dir = tempdir().unwrap();
        let index = CacheIndex::new(0);
        assert!(!index.is_enabled());

        let path = write_file(dir.path(), "a").await;
        for _ in 0..3 {
            index.put("a", &path).await;
            assert!(index.get("a").await.is_none());
        }

        assert_eq!(index.len().await, 0);
        assert!(index.remove("a").await.is_none());
        // A no-op cache never deletes anything either
        assert!(path.exists());

        let stats = index.stats().await;
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 3);
    }

    #[tokio::test]
    async fn test_update_replaces_path_and_refreshes_recency() {
        let dir = tempdir().unwrap();
        let index = CacheIndex::new(2);

        let path_a = write_file(dir.path(), "path-a").await;
        let path_b = write_file(dir.path(), "path-b").await;
        let other = write_file(dir.path(), "other").await;
        let newest = write_file(dir.path(), "newest").await;

        index.put("k", &path_a).await;
        index.put("other", &other).await;
        index.put("k", &path_b).await;

        let keys: Vec<String> = index.entries().await.into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["k".to_string(), "other".to_string()]);
        assert_eq!(index.len().await, 2);

        // The update made "other" the eviction candidate
        index.put("newest", &newest).await;
        assert_eq!(index.get("k").await, Some(path_b.clone()));
        assert!(index.get("other").await.is_none());

        // Updating never deletes the superseded file
        assert!(path_a.exists());
        assert!(path_b.exists());
    }

    #[tokio::test]
    async fn test_remove_keeps_file() {
        let dir = tempdir().unwrap();
        let index = CacheIndex::new(2);
        let path = write_file(dir.path(), "a").await;

        index.put("a", &path).await;
        assert_eq!(index.remove("a").await, Some(path.clone()));
        assert!(index.get("a").await.is_none());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_remove_stale_drops_matching_entry() {
        let index = CacheIndex::new(2);
        index.put("a", "/cache/a.jpg").await;

        let path = index.get("a").await.unwrap();
        assert!(index.remove_stale("a", &path).await);
        assert!(index.is_empty().await);

        // The dangling hit is recounted as a miss
        let stats = index.stats().await;
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_remove_stale_keeps_republished_entry() {
        let index = CacheIndex::new(2);
        index.put("a", "/cache/a.jpg").await;
        let stale = index.get("a").await.unwrap();

        // Another writer publishes a new path before the stale one is dropped
        index.put("a", "/cache/a-new.jpg").await;

        assert!(!index.remove_stale("a", &stale).await);
        assert_eq!(
            index.entries().await[0].path,
            PathBuf::from("/cache/a-new.jpg")
        );
    }

    #[tokio::test]
    async fn test_entries_does_not_touch_recency() {
        let index = CacheIndex::new(2);
        index.put("old", "/cache/old.jpg").await;
        index.put("new", "/cache/new.jpg").await;

        let snapshot = index.entries().await;
        assert_eq!(snapshot[0].key, "new");
        assert_eq!(snapshot[1].key, "old");

        index.put("newest", "/cache/newest.jpg").await;
        assert!(index.get("old").await.is_none());
    }

    #[tokio::test]
    async fn test_stats_counts_hits_and_misses() {
        let index = CacheIndex::new(4);

        index.get("a").await;
        index.put("a", "/cache/a.jpg").await;
        index.get("a").await;
        index.get("a").await;

        let stats = index.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let dir = tempdir().unwrap();
        let index = Arc::new(CacheIndex::new(16));

        let mut handles = Vec::new();
        for worker in 0..8 {
            let index = index.clone();
            let dir = dir.path().to_path_buf();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let key = format!("w{worker}-{i}");
                    let path = dir.join(&key);
                    fs::write(&path, b"x").await.unwrap();
                    index.put(key.clone(), path).await;
                    index.get(&key).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(index.len().await, 16);

        // Every surviving entry still has its file, every evicted one is gone
        let mut files = 0;
        let mut read_dir = fs::read_dir(dir.path()).await.unwrap();
        while read_dir.next_entry().await.unwrap().is_some() {
            files += 1;
        }
        assert_eq!(files, 16);
        for entry in index.entries().await {
            assert!(entry.path.exists());
        }
    }
}
