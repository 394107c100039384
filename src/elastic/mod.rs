//! Document store batch publisher
//!
//! Accumulates records into batches keyed by arrival order; a batch flushes
//! when it reaches `bulk_size` or when `bulk_refresh_interval` has elapsed
//! since its first record, whichever comes first. Up to `concurrent_writes`
//! flushes run at once; past that, intake blocks and the backpressure
//! propagates through the consume sessions to the broker prefetch window.
//!
//! A flush retries the same batch indefinitely on transport errors. Once the
//! store responds, per-item failures are logged (first few only) but not
//! retried, and every record's completion barrier is released: partial
//! failures never block pipeline progress.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::amqp::codec::encode_bulk_legacy;
use crate::config::ElasticConfig;
use crate::metrics::RelayMetrics;
use crate::types::{LogRecord, Publisher};

/// Delay before retrying a failed bulk write
const RETRY_DELAY: Duration = Duration::from_secs(10);

/// Grace period for a clean publisher shutdown
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Number of failed items detailed in the log per bulk response
const FAILED_ITEMS_LOGGED: usize = 5;

/// `_bulk` response, reduced to the fields the relay inspects
#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    took: u64,
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<BulkItem>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(default)]
    index: Option<BulkItemResult>,
}

#[derive(Debug, Deserialize)]
struct BulkItemResult {
    #[serde(default, rename = "_index")]
    index: String,
    #[serde(default)]
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl BulkResponse {
    fn failed(&self) -> Vec<&BulkItemResult> {
        self.items
            .iter()
            .filter_map(|item| item.index.as_ref())
            .filter(|result| result.error.is_some() || result.status >= 300)
            .collect()
    }
}

/// Elasticsearch implementation of the [`Publisher`] capability
pub struct ElasticPublisher {
    config: ElasticConfig,
    metrics: Arc<RelayMetrics>,
    retry_delay: Duration,
    tx: Mutex<Option<mpsc::Sender<LogRecord>>>,
    rx: Mutex<Option<mpsc::Receiver<LogRecord>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ElasticPublisher {
    pub fn new(config: ElasticConfig, metrics: Arc<RelayMetrics>) -> Self {
        let (tx, rx) = mpsc::channel(config.bulk_size.max(1));
        Self {
            config,
            metrics,
            retry_delay: RETRY_DELAY,
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            task: Mutex::new(None),
        }
    }

    /// Shorten the retry delay (tests only; production keeps the default)
    #[doc(hidden)]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

#[async_trait]
impl Publisher for ElasticPublisher {
    async fn start(&self) -> Result<()> {
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow::anyhow!("publisher already started"))?;
        let dispatcher = Dispatcher {
            config: self.config.clone(),
            metrics: Arc::clone(&self.metrics),
            retry_delay: self.retry_delay,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(self.config.request_timeout_secs))
                .build()?,
            semaphore: Arc::new(Semaphore::new(self.config.concurrent_writes)),
            flights: TaskTracker::new(),
        };
        *self.task.lock().unwrap() = Some(tokio::spawn(dispatcher.run(rx)));
        debug!(urls = ?self.config.urls, "elastic publisher started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        // Closing intake lets the dispatcher drain and exit
        self.tx.lock().unwrap().take();
        let handle = self.task.lock().unwrap().take();
        if let Some(handle) = handle {
            tokio::time::timeout(STOP_GRACE, handle)
                .await
                .map_err(|_| anyhow::anyhow!("elastic publisher did not drain within {:?}", STOP_GRACE))??;
        }
        Ok(())
    }

    /// Feed records into the batcher. Blocks when the current batch is full
    /// and every flush slot is busy.
    async fn publish(&self, bulk: Vec<LogRecord>) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("elastic publisher is stopped"))?;
        for record in bulk {
            tx.send(record)
                .await
                .map_err(|_| anyhow::anyhow!("elastic publisher is stopped"))?;
        }
        Ok(())
    }
}

/// Background worker that forms batches and spawns bounded flush tasks
struct Dispatcher {
    config: ElasticConfig,
    metrics: Arc<RelayMetrics>,
    retry_delay: Duration,
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
    flights: TaskTracker,
}

impl Dispatcher {
    async fn run(self, mut rx: mpsc::Receiver<LogRecord>) {
        let window = Duration::from_secs(self.config.bulk_refresh_interval_secs);

        'intake: loop {
            // A batch opens with its first record; the flush deadline is
            // measured from that arrival
            let first = match rx.recv().await {
                Some(record) => record,
                None => break,
            };
            let mut batch = Vec::with_capacity(self.config.bulk_size);
            batch.push(first);
            let deadline = Instant::now() + window;

            let closed = loop {
                if batch.len() >= self.config.bulk_size {
                    break false;
                }
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break false,
                    record = rx.recv() => match record {
                        Some(record) => batch.push(record),
                        None => break true,
                    }
                }
            };

            self.dispatch(batch).await;
            if closed {
                break 'intake;
            }
        }

        // Intake closed: wait for in-flight flushes
        self.flights.close();
        self.flights.wait().await;
        debug!("elastic dispatcher stopped");
    }

    /// Acquire a flush slot (blocking intake at the concurrency cap) and
    /// fire the batch in its own task
    async fn dispatch(&self, batch: Vec<LogRecord>) {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("flush semaphore closed");
        let client = self.client.clone();
        let config = self.config.clone();
        let metrics = Arc::clone(&self.metrics);
        let retry_delay = self.retry_delay;
        self.flights.spawn(async move {
            flush_batch(client, config, metrics, retry_delay, batch).await;
            drop(permit);
        });
    }
}

/// Write one batch to the store, retrying the same batch until the store
/// responds, then release every record's barrier.
async fn flush_batch(
    client: reqwest::Client,
    config: ElasticConfig,
    metrics: Arc<RelayMetrics>,
    retry_delay: Duration,
    batch: Vec<LogRecord>,
) {
    // The `_bulk` NDJSON payload is the same header/body pairing as the
    // legacy broker format
    let body = encode_bulk_legacy(&batch);
    let mut attempt = 0usize;

    let response = loop {
        let base = config.urls[attempt % config.urls.len()].trim_end_matches('/');
        let url = format!("{}/_bulk", base);
        attempt += 1;

        let result = client
            .post(&url)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body.clone())
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => match resp.json::<BulkResponse>().await {
                Ok(parsed) => break parsed,
                Err(e) => {
                    error!(error = %e, count = batch.len(), "can't decode bulk response");
                }
            },
            Ok(resp) => {
                error!(status = %resp.status(), url = %url, count = batch.len(), "failed to write bulk");
            }
            Err(e) => {
                error!(error = %e, url = %url, count = batch.len(), "failed to write bulk");
            }
        }

        metrics.es_flush_retries.inc();
        tokio::time::sleep(retry_delay).await;
    };

    let failed = response.failed();
    for (i, item) in failed.iter().enumerate() {
        if i >= FAILED_ITEMS_LOGGED {
            debug!("remaining failed item details omitted");
            break;
        }
        warn!(
            index = %item.index,
            status = item.status,
            error = %item.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            "bulk item failed"
        );
    }

    metrics.es_bulks_written.inc();
    metrics.es_records_written.add(batch.len() as u64);
    metrics.es_items_failed.add(failed.len() as u64);

    // The batch is complete once the store has responded; failed items are
    // not retried individually, so barriers release unconditionally
    for record in &batch {
        record.release_ack();
    }

    debug!(
        size = batch.len(),
        took = response.took,
        errors = response.errors,
        failed = failed.len(),
        "bulk written"
    );
}
