//! The `/fill` request pipeline
//!
//! parse → cache probe → (hit: open cached file) | (miss: fetch → validate →
//! resize → persist → publish). Every component error is converted to a
//! [`PipelineError`] here, so the HTTP layer only ever sees one error type.

use crate::error::PipelineError;
use crate::fetcher::RemoteFetcher;
use crate::transform::ImageTransform;
use axum::body::Bytes;
use axum::http::HeaderMap;
use lru_file_cache::{cache_file_path, cache_temp_path, CacheIndex};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Path prefix of the resize endpoint
pub const FILL_PREFIX: &str = "/fill/";

/// Scheme prepended to the source part of the path
const SOURCE_SCHEME: &str = "http://";

/// A parsed `/fill/{width}/{height}/{source}` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillRequest {
    pub width: u32,
    pub height: u32,
    /// Source location without scheme, as it appeared in the path
    pub source: String,
}

impl FillRequest {
    /// Parse a request path (optionally with query string).
    ///
    /// The query string, if any, belongs to the source URL.
    pub fn parse(path_and_query: &str, max_dimension: u32) -> Result<Self, PipelineError> {
        let rest = path_and_query
            .strip_prefix(FILL_PREFIX)
            .ok_or_else(|| PipelineError::BadRequest("invalid URL format".into()))?;

        let mut parts = rest.splitn(3, '/');
        let (Some(width), Some(height), Some(source)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(PipelineError::BadRequest("invalid URL format".into()));
        };

        let width = parse_dimension(width, max_dimension)
            .ok_or_else(|| PipelineError::BadRequest("invalid width".into()))?;
        let height = parse_dimension(height, max_dimension)
            .ok_or_else(|| PipelineError::BadRequest("invalid height".into()))?;

        if source.is_empty() || source.starts_with('?') {
            return Err(PipelineError::BadRequest("missing image URL".into()));
        }

        Ok(Self {
            width,
            height,
            source: source.to_string(),
        })
    }

    /// Cache key identifying this exact output
    pub fn cache_key(&self) -> String {
        format!("{}_{}_{}", self.width, self.height, self.source)
    }

    /// URL the source image is fetched from
    pub fn source_url(&self) -> String {
        format!("{}{}", SOURCE_SCHEME, self.source)
    }
}

fn parse_dimension(raw: &str, max: u32) -> Option<u32> {
    raw.parse::<u32>().ok().filter(|&d| d > 0 && d <= max)
}

/// A successfully produced thumbnail
#[derive(Debug)]
pub enum Thumbnail {
    /// Served from the cache; the file is already open
    Cached { path: PathBuf, file: fs::File },
    /// Freshly resized (and persisted, when caching is enabled)
    Fresh { data: Bytes },
}

/// Orchestrates one `/fill` request against the shared cache
pub struct Pipeline {
    cache: Arc<CacheIndex>,
    fetcher: RemoteFetcher,
    transform: ImageTransform,
    cache_dir: PathBuf,
    max_dimension: u32,
    /// Distinguishes temp files of concurrent writers
    write_seq: AtomicU64,
}

impl Pipeline {
    pub fn new(
        cache: Arc<CacheIndex>,
        fetcher: RemoteFetcher,
        transform: ImageTransform,
        cache_dir: PathBuf,
        max_dimension: u32,
    ) -> Self {
        Self {
            cache,
            fetcher,
            transform,
            cache_dir,
            max_dimension,
            write_seq: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &CacheIndex {
        &self.cache
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Run the whole pipeline for one request.
    ///
    /// `headers` are the inbound request headers, forwarded to the source.
    /// Once `cancel` fires no index entry is created for this request.
    pub async fn process(
        &self,
        path_and_query: &str,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<Thumbnail, PipelineError> {
        let request = FillRequest::parse(path_and_query, self.max_dimension).map_err(|e| {
            warn!(path = %path_and_query, error = %e, "Invalid fill request");
            e
        })?;
        let key = request.cache_key();
        info!(
            source = %request.source,
            width = request.width,
            height = request.height,
            "Processing fill request"
        );

        if let Some(thumbnail) = self.probe(&key).await {
            return Ok(thumbnail);
        }

        let source_url = request.source_url();
        let fetched = self.fetcher.fetch(&source_url, headers, cancel).await?;
        if !fetched.status.is_success() {
            warn!(url = %source_url, status = %fetched.status, "Source server returned an error");
            return Err(PipelineError::UpstreamStatus {
                status: fetched.status,
                content_type: fetched.content_type,
                body: fetched.body,
            });
        }

        self.transform.validate(&fetched.body)?;

        let data = self
            .transform
            .resize(cancel, fetched.body.to_vec(), request.width, request.height)
            .await?;
        let data = Bytes::from(data);

        self.persist(&key, data.clone(), cancel).await?;

        Ok(Thumbnail::Fresh { data })
    }

    /// Look up `key` and open its file.
    ///
    /// An entry whose file cannot be opened is dropped and reported as a miss.
    async fn probe(&self, key: &str) -> Option<Thumbnail> {
        let path = self.cache.get(key).await?;
        match fs::File::open(&path).await {
            Ok(file) => Some(Thumbnail::Cached { path, file }),
            Err(e) => {
                warn!(key = %key, path = ?path, error = %e, "Cached file unreadable, refetching");
                self.cache.remove_stale(key, &path).await;
                None
            }
        }
    }

    /// Write `data` to the key's file and publish it in the index.
    ///
    /// The bytes go to a temp file that is renamed into place, so the final
    /// path only ever holds a complete image. Nothing is written when the
    /// cache is disabled.
    ///
    /// The write runs as its own task and outlives this future. Dropping the
    /// caller and cancelling `cancel` before the rename removes the temp file;
    /// once the rename has happened the entry is published.
    async fn persist(
        &self,
        key: &str,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        if !self.cache.is_enabled() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let path = cache_file_path(&self.cache_dir, key);
        let temp = cache_temp_path(
            &self.cache_dir,
            key,
            self.write_seq.fetch_add(1, Ordering::Relaxed),
        );

        let task = tokio::spawn(write_and_publish(
            self.cache.clone(),
            key.to_string(),
            data,
            TempFile::new(temp),
            path.clone(),
            cancel.clone(),
        ));
        let written = match task.await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::Internal(format!("Cache write task failed: {}", e))),
        };

        match written {
            Ok(()) => {
                debug!(key = %key, path = ?path, "Image saved to cache");
                Ok(())
            }
            Err(PipelineError::Cancelled) => Err(PipelineError::Cancelled),
            Err(e) => {
                warn!(key = %key, path = ?path, error = %e, "Failed to save image to cache");
                Err(e)
            }
        }
    }
}

/// Temp file written ahead of a rename, removed on drop unless kept
struct TempFile {
    path: PathBuf,
    keep: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// The file has been renamed away; nothing left to clean up
    fn renamed(mut self) {
        self.keep = true;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = ?self.path, error = %e, "Failed to remove temp file");
            }
        }
    }
}

/// Write `temp`, rename it onto `path` and publish it under `key`.
///
/// Cancellation is checked between the write and the rename; the temp file
/// is removed on every path that does not reach the rename.
async fn write_and_publish(
    cache: Arc<CacheIndex>,
    key: String,
    data: Bytes,
    temp: TempFile,
    path: PathBuf,
    cancel: CancellationToken,
) -> Result<(), PipelineError> {
    fs::write(temp.path(), &data).await?;
    if cancel.is_cancelled() {
        debug!(key = %key, "Request cancelled, discarding cache write");
        return Err(PipelineError::Cancelled);
    }

    fs::rename(temp.path(), &path).await?;
    temp.renamed();

    cache.put(key, path).await;
    Ok(())
}
