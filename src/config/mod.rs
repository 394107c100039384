//! Configuration for logriver
//!
//! One TOML file covers both daemons: the gate reads `[http]` + `[amqp]`,
//! the river reads `[[consumer.connections]]` + `[elastic]`. Unused sections
//! are simply ignored by the daemon that does not need them.

mod amqp;
mod elastic;
mod http;
mod logging;

pub use amqp::{AmqpPublisherConfig, ConnectionConfig, ConsumerConfig};
pub use elastic::ElasticConfig;
pub use http::HttpConfig;
pub use logging::{LogFormat, LogLevel, LoggingConfig};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// HTTP ingestion gateway configuration
    #[serde(default)]
    pub http: HttpConfig,
    /// Broker publish-side configuration (gate)
    #[serde(default)]
    pub amqp: AmqpPublisherConfig,
    /// Broker consume-side configuration (river)
    #[serde(default)]
    pub consumer: ConsumerConfig,
    /// Document store configuration (river)
    #[serde(default)]
    pub elastic: ElasticConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration fields.
    ///
    /// Collects every violation and reports them together so the user can
    /// fix the file in one pass.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.http.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!("http.listen_addr '{}' is not a valid socket address", self.http.listen_addr));
        }
        for (key, patterns) in &self.http.api_keys {
            if patterns.is_empty() {
                errors.push(format!("http.api_keys['{}'] has no index patterns", key));
            }
            for pattern in patterns {
                if glob::Pattern::new(pattern).is_err() {
                    errors.push(format!("http.api_keys['{}'] pattern '{}' is not a valid glob", key, pattern));
                }
            }
        }

        if self.amqp.reconnect_interval_secs == 0 {
            errors.push("amqp.reconnect_interval_secs must be positive".to_string());
        }

        for (i, conn) in self.consumer.connections.iter().enumerate() {
            if conn.prefetch_count < 1 {
                errors.push(format!("consumer.connections[{}].prefetch_count must be >= 1", i));
            }
            if conn.queue.is_empty() {
                errors.push(format!("consumer.connections[{}].queue must not be empty", i));
            }
            if conn.reconnect_interval_secs == 0 {
                errors.push(format!("consumer.connections[{}].reconnect_interval_secs must be positive", i));
            }
        }

        if self.elastic.urls.is_empty() {
            errors.push("elastic.urls must contain at least one URL".to_string());
        }
        if self.elastic.bulk_size == 0 {
            errors.push("elastic.bulk_size must be positive".to_string());
        }
        if self.elastic.concurrent_writes == 0 {
            errors.push("elastic.concurrent_writes must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("Invalid configuration:\n  - {}", errors.join("\n  - "))
        }
    }

    /// Render the default configuration as TOML (for `print-default-config`)
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}
