//! Item-bounded LRU index over files on disk
//!
//! The index maps a cache key to the path of a file holding that key's bytes.
//! It keeps exact least-recently-used order and deletes a file from disk when
//! its entry is evicted. Writing the file is the caller's job; the index only
//! publishes paths that already exist.

mod index;
mod key;
mod reconcile;
mod types;

pub use index::CacheIndex;
pub use key::{
    cache_file_name, cache_file_path, cache_temp_path, is_cache_file_name, is_temp_file_name,
    CACHE_FILE_EXTENSION,
};
pub use reconcile::purge_orphans;
pub use types::{CacheEntry, CacheStats};
