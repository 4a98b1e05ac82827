//! Startup reconciliation of a cache directory

use crate::key::{is_cache_file_name, is_temp_file_name};
use std::io;
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

/// Ensure `cache_dir` exists and delete the files a previous run left behind.
///
/// A fresh [`CacheIndex`](crate::CacheIndex) is empty, so any published cache
/// file or temp file already in the directory is unreachable. Only names the
/// cache itself produces are removed; anything else is left in place.
/// Returns the number of files removed.
pub async fn purge_orphans(cache_dir: &Path) -> io::Result<usize> {
    fs::create_dir_all(cache_dir).await?;

    let mut removed = 0;
    let mut read_dir = fs::read_dir(cache_dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !(is_cache_file_name(name) || is_temp_file_name(name)) {
            continue;
        }
        if !entry.file_type().await?.is_file() {
            continue;
        }

        match fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = ?entry.path(), error = %e, "Failed to remove orphaned cache file"),
        }
    }

    info!(cache_dir = ?cache_dir, removed, "Cache directory reconciled");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{cache_file_path, cache_temp_path};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_creates_missing_directory() {
        let dir = tempdir().unwrap();
        let cache_dir = dir.path().join("nested").join("cache");

        let removed = purge_orphans(&cache_dir).await.unwrap();
        assert_eq!(removed, 0);
        assert!(cache_dir.is_dir());
    }

    #[tokio::test]
    async fn test_removes_only_owned_files() {
        let dir = tempdir().unwrap();
        let cached = cache_file_path(dir.path(), "100_100_example.com/a.jpg");
        let temp = cache_temp_path(dir.path(), "100_100_example.com/b.jpg", 7);
        let foreign = dir.path().join("notes.txt");

        fs::write(&cached, b"jpeg").await.unwrap();
        fs::write(&temp, b"partial").await.unwrap();
        fs::write(&foreign, b"keep me").await.unwrap();

        let removed = purge_orphans(dir.path()).await.unwrap();
        assert_eq!(removed, 2);
        assert!(!cached.exists());
        assert!(!temp.exists());
        assert!(foreign.exists());
    }
}
