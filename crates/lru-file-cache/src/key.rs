//! Cache file naming

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Extension of every file the cache publishes
pub const CACHE_FILE_EXTENSION: &str = "jpg";

const TEMP_FILE_SUFFIX: &str = ".tmp";

/// File name for a cache key: hex SHA-256 of the key plus the extension.
///
/// The digest keeps arbitrary keys (URLs with slashes, query strings) out of
/// the filesystem namespace while staying a pure function of the key.
pub fn cache_file_name(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{}.{}", hex::encode(hasher.finalize()), CACHE_FILE_EXTENSION)
}

/// Full path of a key's file inside `cache_dir`
pub fn cache_file_path(cache_dir: &Path, key: &str) -> PathBuf {
    cache_dir.join(cache_file_name(key))
}

/// Temp path a key's bytes are written to before being renamed into place.
///
/// `unique` must differ between concurrent writers of the same key.
pub fn cache_temp_path(cache_dir: &Path, key: &str, unique: u64) -> PathBuf {
    cache_dir.join(format!(".{}.{}{}", cache_file_name(key), unique, TEMP_FILE_SUFFIX))
}

/// Whether `name` looks like a temp file produced by [`cache_temp_path`]
pub fn is_temp_file_name(name: &str) -> bool {
    name.strip_prefix('.')
        .and_then(|rest| rest.strip_suffix(TEMP_FILE_SUFFIX))
        .and_then(|rest| rest.rsplit_once('.'))
        .map(|(file, unique)| {
            is_cache_file_name(file)
                && !unique.is_empty()
                && unique.chars().all(|c| c.is_ascii_digit())
        })
        .unwrap_or(false)
}

/// Whether `name` looks like a file produced by [`cache_file_name`]
pub fn is_cache_file_name(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) => {
            ext == CACHE_FILE_EXTENSION
                && stem.len() == 64
                && stem.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}
