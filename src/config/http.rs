//! HTTP ingestion gateway configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// HTTP ingestion gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address (e.g. "0.0.0.0:8080")
    pub listen_addr: String,
    /// API keys mapped to the glob patterns of indices they may write to.
    /// Clients authenticate with `Authorization: ELK <apikey>`.
    #[serde(default)]
    pub api_keys: HashMap<String, Vec<String>>,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            api_keys: HashMap::new(),
            timeout_secs: default_timeout(),
        }
    }
}
