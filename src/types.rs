//! Core types shared by the ingestion and relay sides.
//!
//! A [`LogRecord`] is one log line bound for one index/type in the document
//! store. Records travel in bulks (`Vec<LogRecord>`): one HTTP request or one
//! broker message on the way in, one `_bulk` write on the way out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

/// Index type used when the request path does not name one
pub const DEFAULT_TYPE: &str = "LogEvent";

/// A single log line destined for one index/type.
///
/// `body` is the raw JSON document exactly as received; it is never
/// re-serialized, only copied across stage boundaries.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Destination index, lower-cased
    pub index: String,
    /// Destination type (`DEFAULT_TYPE` when unspecified)
    pub doc_type: String,
    /// Raw JSON body, verbatim
    pub body: Bytes,
    /// Completion barrier, present only in wait-for-ack mode
    pub ack: Option<AckBarrier>,
}

impl LogRecord {
    pub fn new(
        index: impl Into<String>,
        doc_type: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            index: index.into(),
            doc_type: doc_type.into(),
            body: body.into(),
            ack: None,
        }
    }

    /// Release this record's completion barrier slot, if it has one
    pub fn release_ack(&self) {
        if let Some(barrier) = &self.ack {
            barrier.release();
        }
    }
}

/// Countdown barrier gating a broker acknowledgement on downstream completion.
///
/// Created with one slot per record in a bulk. Each slot is released once the
/// record's downstream write is accepted or permanently abandoned; `wait`
/// resolves once every slot has been released. Releasing past zero is a
/// no-op, so a stray double release can never re-arm the barrier or
/// double-fire the acknowledgement.
#[derive(Debug, Clone)]
pub struct AckBarrier {
    inner: Arc<BarrierInner>,
}

#[derive(Debug)]
struct BarrierInner {
    remaining: AtomicUsize,
    notify: Notify,
}

impl AckBarrier {
    pub fn new(count: usize) -> Self {
        Self {
            inner: Arc::new(BarrierInner {
                remaining: AtomicUsize::new(count),
                notify: Notify::new(),
            }),
        }
    }

    /// Release one slot. Saturates at zero.
    pub fn release(&self) {
        let prev = self
            .inner
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if prev == Ok(1) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Number of slots not yet released
    pub fn remaining(&self) -> usize {
        self.inner.remaining.load(Ordering::Acquire)
    }

    /// Wait until every slot has been released
    pub async fn wait(&self) {
        loop {
            if self.remaining() == 0 {
                return;
            }
            let notified = self.inner.notify.notified();
            // Re-check after registering so a release landing between the
            // first check and `notified()` is not lost
            if self.remaining() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Narrow capability interface for bulk destinations (broker, document
/// store). Implementations own all of their connection state; callers only
/// see lifecycle and publish.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Bring up connections and background workers
    async fn start(&self) -> Result<()>;
    /// Signal workers to stop and wait for a graceful drain
    async fn stop(&self) -> Result<()>;
    /// Hand a bulk of records to this destination
    async fn publish(&self, bulk: Vec<LogRecord>) -> Result<()>;
}
