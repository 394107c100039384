//! Broker transport: wire codec, publish session, consume sessions

pub mod codec;
mod consumer;
mod publisher;

pub use codec::{decode_bulk_legacy, encode_bulk_headers, encode_bulk_legacy, DecodeError};
pub use consumer::AmqpConsumer;
pub use publisher::{AmqpPublisher, PublishError};
