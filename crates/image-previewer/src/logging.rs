//! Log filter setup

use crate::error::Result;
use tracing_subscriber::EnvFilter;

/// Directives used when `RUST_LOG` is unset
pub const DEFAULT_LOG_DIRECTIVES: &str = "image_previewer=info,lru_file_cache=info";

/// Build the log filter from the value of `RUST_LOG`.
///
/// An unset or blank value gets the service defaults. A set value is used
/// as-is, so it can raise or lower the service crates' own levels.
pub fn log_filter(rust_log: Option<&str>) -> Result<EnvFilter> {
    let directives = rust_log
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_LOG_DIRECTIVES);
    Ok(EnvFilter::try_new(directives)?)
}
