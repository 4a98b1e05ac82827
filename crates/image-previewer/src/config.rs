use crate::fetcher::DEFAULT_MAX_SOURCE_BYTES;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Service configuration parsed from environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    /// Cache capacity in items; zero disables caching
    pub cache_size: usize,
    pub cache_dir: PathBuf,
    /// Remove files left by a previous run before serving
    pub purge_on_start: bool,
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Largest accepted width or height
    pub max_dimension: u32,
    /// Largest accepted source body in bytes
    pub max_source_bytes: usize,
    /// Emit Stackdriver JSON logs instead of human-readable ones
    pub json_logs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            cache_size: 100,
            cache_dir: PathBuf::from("./cache"),
            purge_on_start: true,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
            max_dimension: 10_000,
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            json_logs: false,
        }
    }
}

impl Config {
    /// Parse configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Parse configuration from any variable source.
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let port = parse_var(&lookup, "PORT").unwrap_or(defaults.port);

        let cache_size = parse_var(&lookup, "CACHE_SIZE").unwrap_or(defaults.cache_size);

        let cache_dir = lookup("CACHE_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let purge_on_start =
            parse_var(&lookup, "CACHE_PURGE_ON_START").unwrap_or(defaults.purge_on_start);

        let request_timeout = parse_var(&lookup, "REQUEST_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        let shutdown_timeout = parse_var(&lookup, "SHUTDOWN_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.shutdown_timeout);

        let max_dimension = parse_var::<u32>(&lookup, "MAX_DIMENSION")
            .filter(|&d| d > 0)
            .unwrap_or(defaults.max_dimension);

        let max_source_bytes = parse_var::<usize>(&lookup, "MAX_SOURCE_BYTES")
            .filter(|&n| n > 0)
            .unwrap_or(defaults.max_source_bytes);

        let json_logs = lookup("LOG_FORMAT")
            .map(|v| v == "json")
            .unwrap_or(defaults.json_logs);

        Self {
            port,
            cache_size,
            cache_dir,
            purge_on_start,
            request_timeout,
            shutdown_timeout,
            max_dimension,
            max_source_bytes,
            json_logs,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    lookup(name).and_then(|s| s.trim().parse().ok())
}
