//! logriver: a log-shipping relay
//!
//! Clients POST newline-delimited JSON log lines to the gate; records are
//! relayed through an AMQP broker and batch-written to an
//! Elasticsearch-style document store by the river, with optional
//! at-least-once delivery:
//! - HTTP ingestion with API-key authorization and line-level validation
//! - Resilient broker sessions that re-dial through network failures
//! - Batched `_bulk` writes with bounded concurrency and indefinite retry
//! - Broker acks deferred until downstream completion (wait-ack mode)

pub mod amqp;
pub mod config;
pub mod elastic;
pub mod gateway;
pub mod metrics;
pub mod types;

pub use config::Config;
pub use types::{AckBarrier, LogRecord, Publisher, DEFAULT_TYPE};
