//! Relay metrics
//!
//! In-process counters and latency histograms recorded by the gateway, the
//! broker publish session, and the batch publisher. Export to an external
//! time-series sink is out of scope; these exist for logging snapshots and
//! for tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Atomic counter for thread-safe incrementing
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Latency histogram with fixed microsecond buckets
#[derive(Debug)]
pub struct Histogram {
    /// Bucket boundaries in microseconds
    buckets: Vec<u64>,
    counts: Vec<AtomicU64>,
    overflow: AtomicU64,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 5s
    pub fn new_latency() -> Self {
        let buckets = vec![
            1_000, 5_000, 10_000, 25_000, 50_000, 100_000, 250_000, 500_000, 1_000_000, 5_000_000,
        ];
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            overflow: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        self.sum.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        for (i, &boundary) in self.buckets.iter().enumerate() {
            if micros <= boundary {
                self.counts[i].fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        self.overflow.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean_ms(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.sum.load(Ordering::Relaxed) as f64 / count as f64 / 1000.0
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new_latency()
    }
}

/// All relay metrics
#[derive(Debug, Default)]
pub struct RelayMetrics {
    // HTTP gateway
    pub http_requests_total: Counter,
    pub http_request_time: Histogram,
    pub http_200: Counter,
    pub http_400: Counter,
    pub http_401: Counter,
    pub http_403: Counter,
    pub http_405: Counter,
    pub http_500: Counter,

    // Broker publish session
    pub amqp_publish_time: Histogram,
    pub amqp_bulks_total: Counter,
    pub amqp_messages_total: Counter,
    pub amqp_publish_failures: Counter,

    // Batch publisher
    pub es_bulks_written: Counter,
    pub es_records_written: Counter,
    pub es_flush_retries: Counter,
    pub es_items_failed: Counter,
}

impl RelayMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Counter for an HTTP response status
    pub fn http_response(&self, status: u16) -> &Counter {
        match status {
            200 => &self.http_200,
            400 => &self.http_400,
            401 => &self.http_401,
            403 => &self.http_403,
            405 => &self.http_405,
            _ => &self.http_500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_add_and_get() {
        let c = Counter::default();
        c.inc();
        c.add(4);
        assert_eq!(c.get(), 5);
    }

    #[test]
    fn test_histogram_observe() {
        let h = Histogram::new_latency();
        h.observe(Duration::from_millis(3));
        h.observe(Duration::from_millis(7));
        assert_eq!(h.count(), 2);
        assert!(h.mean_ms() > 0.0);
    }

    #[test]
    fn test_status_counter_mapping() {
        let m = RelayMetrics::default();
        m.http_response(200).inc();
        m.http_response(403).inc();
        m.http_response(502).inc();
        assert_eq!(m.http_200.get(), 1);
        assert_eq!(m.http_403.get(), 1);
        assert_eq!(m.http_500.get(), 1);
    }
}
