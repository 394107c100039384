//! Broker wire codec
//!
//! Two encodings of a bulk of log records into one broker message:
//!
//! - **Legacy**: alternating header/body lines, one pair per record. The
//!   header line names the destination index/type; the body line is the raw
//!   document. This is what the consume path speaks.
//! - **Headers-based**: for a homogeneous bulk, index/type are carried once
//!   in the message headers and the body is the newline-joined documents.
//!   Cheaper on the wire; produced but not yet consumed, so the decode side
//!   of this variant intentionally does not exist.

use bytes::Bytes;
use lapin::types::{AMQPValue, FieldTable};
use serde::Deserialize;
use thiserror::Error;

use crate::types::LogRecord;

/// Errors decoding a broker message into records
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A header line was not valid header JSON
    #[error("bad bulk header: {0}")]
    BadHeader(#[from] serde_json::Error),
    /// Decoding produced no records at all
    #[error("empty message")]
    EmptyMessage,
}

/// Header line of the legacy format: `{"index":{"_index":...,"_type":...}}`
#[derive(Debug, Default, Deserialize)]
struct BulkHeader {
    #[serde(default)]
    index: BulkHeaderIndex,
}

#[derive(Debug, Default, Deserialize)]
struct BulkHeaderIndex {
    #[serde(default, rename = "_index")]
    index: String,
    #[serde(default, rename = "_type")]
    doc_type: String,
}

/// Encode a bulk in the legacy alternating header/body format.
pub fn encode_bulk_legacy(bulk: &[LogRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in bulk {
        out.extend_from_slice(
            format!(
                "{{\"index\": {{\"_index\": \"{}\", \"_type\": \"{}\"}}}}\n",
                record.index, record.doc_type
            )
            .as_bytes(),
        );
        out.extend_from_slice(&record.body);
        out.push(b'\n');
    }
    out
}

/// Encode a homogeneous bulk in the headers-based format: index/type go into
/// the AMQP headers, the body is the newline-joined documents. The caller is
/// responsible for only passing bulks sharing one index/type.
pub fn encode_bulk_headers(bulk: &[LogRecord]) -> Option<(FieldTable, Vec<u8>)> {
    let first = bulk.first()?;
    let mut headers = FieldTable::default();
    headers.insert("index".into(), AMQPValue::LongString(first.index.as_str().into()));
    headers.insert("type".into(), AMQPValue::LongString(first.doc_type.as_str().into()));
    let mut body = Vec::new();
    for record in bulk {
        body.extend_from_slice(&record.body);
        body.push(b'\n');
    }
    Some((headers, body))
}

/// Decode a legacy-format message body into records.
///
/// Lines alternate header (even position) and body (odd position); empty
/// lines keep their position but produce nothing, which makes a trailing
/// newline harmless. A malformed header aborts the whole message; a body
/// whose header carried an empty index name is skipped without aborting the
/// rest of the bulk.
pub fn decode_bulk_legacy(body: &[u8]) -> Result<Vec<LogRecord>, DecodeError> {
    let mut records = Vec::new();
    let mut header = BulkHeader::default();

    for (i, line) in body.split(|&b| b == b'\n').enumerate() {
        if line.is_empty() {
            continue;
        }
        if i % 2 == 0 {
            header = serde_json::from_slice(line)?;
            continue;
        }
        if header.index.index.is_empty() {
            continue;
        }
        records.push(LogRecord::new(
            header.index.index.clone(),
            header.index.doc_type.clone(),
            Bytes::copy_from_slice(line),
        ));
    }

    if records.is_empty() {
        return Err(DecodeError::EmptyMessage);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: &str, doc_type: &str, body: &str) -> LogRecord {
        LogRecord::new(index, doc_type, body.as_bytes().to_vec())
    }

    #[test]
    fn test_legacy_roundtrip_is_lossless() {
        let bulk = vec![
            record("app-logs", "LogEvent", r#"{"@timestamp":"2020-01-01T00:00:00Z","msg":"a"}"#),
            record("web-logs", "AccessEvent", r#"{"@timestamp":"2020-01-01T00:00:01Z","msg":"b"}"#),
            record("app-logs", "LogEvent", r#"{"@timestamp":"2020-01-01T00:00:02Z","msg":"c"}"#),
        ];
        let encoded = encode_bulk_legacy(&bulk);
        let decoded = decode_bulk_legacy(&encoded).unwrap();
        assert_eq!(decoded.len(), bulk.len());
        for (got, want) in decoded.iter().zip(&bulk) {
            assert_eq!(got.index, want.index);
            assert_eq!(got.doc_type, want.doc_type);
            assert_eq!(got.body, want.body);
        }
    }

    #[test]
    fn test_decode_single_pair_without_trailing_newline() {
        let body = b"{\"index\":{\"_index\":\"app\",\"_type\":\"LogEvent\"}}\n{\"msg\":\"x\"}";
        let decoded = decode_bulk_legacy(body).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].index, "app");
        assert_eq!(decoded[0].body.as_ref(), b"{\"msg\":\"x\"}");
    }

    #[test]
    fn test_decode_bad_header_aborts() {
        let body = b"not json\n{\"msg\":\"x\"}\n";
        assert!(matches!(decode_bulk_legacy(body), Err(DecodeError::BadHeader(_))));
    }

    #[test]
    fn test_decode_empty_index_skips_body_without_aborting() {
        let body = b"{\"index\":{\"_index\":\"\",\"_type\":\"t\"}}\n{\"msg\":\"skipped\"}\n{\"index\":{\"_index\":\"app\",\"_type\":\"t\"}}\n{\"msg\":\"kept\"}\n";
        let decoded = decode_bulk_legacy(body).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].body.as_ref(), b"{\"msg\":\"kept\"}");
    }

    #[test]
    fn test_decode_only_skipped_pairs_is_empty_message() {
        let body = b"{\"index\":{\"_index\":\"\"}}\n{\"msg\":\"x\"}\n";
        assert!(matches!(decode_bulk_legacy(body), Err(DecodeError::EmptyMessage)));
    }

    #[test]
    fn test_decode_empty_body_is_empty_message() {
        assert!(matches!(decode_bulk_legacy(b""), Err(DecodeError::EmptyMessage)));
    }

    #[test]
    fn test_headers_encoding_carries_destination_once() {
        let bulk = vec![
            record("app", "LogEvent", r#"{"msg":"a"}"#),
            record("app", "LogEvent", r#"{"msg":"b"}"#),
        ];
        let (headers, body) = encode_bulk_headers(&bulk).unwrap();
        assert!(headers.inner().keys().any(|k| k.as_str() == "index"));
        assert!(headers.inner().keys().any(|k| k.as_str() == "type"));
        assert_eq!(body, b"{\"msg\":\"a\"}\n{\"msg\":\"b\"}\n");
    }

    #[test]
    fn test_headers_encoding_empty_bulk_is_none() {
        assert!(encode_bulk_headers(&[]).is_none());
    }
}
