//! Wire types for the image previewer

use lru_file_cache::CacheStats;
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            uptime_secs: 3600,
            cache: CacheStats {
                entries: 2,
                capacity: 100,
                hits: 500,
                misses: 50,
            },
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("3600"));
        assert!(json.contains("500"));
        assert!(json.contains("\"capacity\":100"));
    }
}
