//! Source image fetching

use crate::error::FetchError;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, StatusCode};
use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Headers owned by the transport, never forwarded upstream
const TRANSPORT_HEADERS: [header::HeaderName; 9] = [
    header::HOST,
    header::CONNECTION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::CONTENT_LENGTH,
    header::ACCEPT_ENCODING,
    header::PROXY_AUTHORIZATION,
];

/// Connection-scoped headers without a constant in `http::header`
const HOP_BY_HOP_HEADERS: [&str; 2] = ["keep-alive", "proxy-connection"];

/// Default limit on a source body (20 MiB)
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 20 * 1024 * 1024;

/// A response from the source server, success or not
#[derive(Debug)]
pub struct FetchedImage {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// HTTP client for fetching source images
pub struct RemoteFetcher {
    client: Client,
    max_body_bytes: usize,
}

impl RemoteFetcher {
    /// Create a new fetcher with a shared connection pool
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("image-previewer/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client, using defaults");
                Client::new()
            });

        Self {
            client,
            max_body_bytes: DEFAULT_MAX_SOURCE_BYTES,
        }
    }

    /// Reject source bodies larger than `max_body_bytes`
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// GET `url`, forwarding the inbound `headers`.
    ///
    /// Any status is returned as-is; only transport failures and bodies over
    /// the size limit are errors. Cancelling `cancel` aborts the request while
    /// waiting on headers or body.
    pub async fn fetch(
        &self,
        url: &str,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<FetchedImage, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let request = self.client.get(url).headers(forwardable_headers(headers));
        debug!(url = %url, "Fetching source image");

        let mut response = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            response = request.send() => response.map_err(|e| {
                warn!(url = %url, error = %e, "Failed to fetch source image");
                FetchError::from(e)
            })?,
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(length) = response.content_length() {
            if length > self.max_body_bytes as u64 {
                warn!(url = %url, length, limit = self.max_body_bytes, "Source image too large");
                return Err(FetchError::TooLarge {
                    limit: self.max_body_bytes,
                });
            }
        }

        // Content-Length may be absent or wrong, so the limit is enforced per chunk
        let mut body = Vec::new();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                chunk = response.chunk() => chunk.map_err(|e| {
                    warn!(url = %url, error = %e, "Failed to read source image body");
                    FetchError::from(e)
                })?,
            };
            let Some(chunk) = chunk else { break };
            if body.len() + chunk.len() > self.max_body_bytes {
                warn!(url = %url, limit = self.max_body_bytes, "Source image too large");
                return Err(FetchError::TooLarge {
                    limit: self.max_body_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }
        let body = Bytes::from(body);

        debug!(
            url = %url,
            status = %status,
            size = body.len(),
            "Fetched source image"
        );

        Ok(FetchedImage {
            status,
            content_type,
            body,
        })
    }
}

impl Default for RemoteFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy of `headers` without the ones the outbound connection manages itself
fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in TRANSPORT_HEADERS.iter() {
        forwarded.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        forwarded.remove(name);
    }
    forwarded
}
