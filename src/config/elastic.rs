//! Document store (Elasticsearch) configuration

use serde::{Deserialize, Serialize};

/// Batch publisher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticConfig {
    /// Document store base URLs; flushes rotate across them on retry
    pub urls: Vec<String>,
    /// Maximum records per bulk write
    pub bulk_size: usize,
    /// Seconds after a batch's first record before it is flushed regardless
    /// of size
    pub bulk_refresh_interval_secs: u64,
    /// Maximum concurrent in-flight bulk writes
    pub concurrent_writes: usize,
    /// Request timeout for a single bulk write, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            urls: vec!["http://localhost:9200".to_string()],
            bulk_size: 1000,
            bulk_refresh_interval_secs: 2,
            concurrent_writes: 4,
            request_timeout_secs: default_request_timeout(),
        }
    }
}
