//! Request body validation and decoding
//!
//! Bodies are newline-delimited JSON, streamed line by line rather than
//! buffered whole. A line must parse as a JSON object carrying an
//! `@timestamp` field; lines that don't are counted and dropped. The request
//! only fails when nothing valid remains.

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

use crate::types::LogRecord;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("bad request, {bad} of {total} lines is bad")]
    AllLinesBad { bad: usize, total: usize },
    #[error("can't read body: {0}")]
    Io(#[from] std::io::Error),
}

/// Decode a body stream into records bound for `index`/`doc_type`
pub async fn decode_messages<R>(
    index: &str,
    doc_type: &str,
    mut body: R,
) -> Result<Vec<LogRecord>, DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut bulk = Vec::new();
    let mut bad = 0usize;
    let mut total = 0usize;
    let mut line = Vec::new();

    loop {
        line.clear();
        if body.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
            line.pop();
        }
        total += 1;
        match check_message(&line) {
            Ok(()) => bulk.push(LogRecord::new(index, doc_type, Bytes::copy_from_slice(&line))),
            Err(reason) => {
                debug!(reason, body = %String::from_utf8_lossy(&line), "dropping line");
                bad += 1;
            }
        }
    }

    if bulk.is_empty() {
        return Err(DecodeError::AllLinesBad { bad, total });
    }
    if bad > 0 {
        warn!(index, r#type = doc_type, bad, total, "bulk contains bad lines");
    }
    Ok(bulk)
}

/// A valid message is a JSON object with an `@timestamp` field
fn check_message(line: &[u8]) -> Result<(), &'static str> {
    let value: serde_json::Value =
        serde_json::from_slice(line).map_err(|_| "cannot parse json")?;
    let object = value.as_object().ok_or("not a json object")?;
    if !object.contains_key("@timestamp") {
        return Err("@timestamp field doesn't exist");
    }
    Ok(())
}
