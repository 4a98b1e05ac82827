//! Image Previewer Library
//!
//! On-demand thumbnails: fetch a remote image, crop-resize it to an exact
//! size, cache the result on disk behind an LRU index, and serve it.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod transform;
pub mod types;

pub use config::Config;
pub use error::{FetchError, PipelineError, PreviewerError, Result, TransformError};
pub use fetcher::{FetchedImage, RemoteFetcher, DEFAULT_MAX_SOURCE_BYTES};
pub use logging::{log_filter, DEFAULT_LOG_DIRECTIVES};
pub use pipeline::{FillRequest, Pipeline, Thumbnail};
pub use server::{create_router, shutdown_signal, start_server, ServerState, SharedState};
pub use transform::ImageTransform;
pub use types::HealthResponse;
