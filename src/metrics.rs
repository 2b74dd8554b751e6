//! Request metrics for the prediction service.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Point-in-time metrics view, embedded in the health payload.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub predictions_total: u64,
    pub client_errors: u64,
    pub unavailable_errors: u64,
    pub internal_errors: u64,
    pub avg_latency_us: u64,
    pub p95_latency_us: u64,
    pub uptime_secs: u64,
}

/// Counters and latency samples for the prediction endpoint.
pub struct ServiceMetrics {
    requests_total: AtomicU64,
    predictions_total: AtomicU64,
    client_errors: AtomicU64,
    unavailable_errors: AtomicU64,
    internal_errors: AtomicU64,
    /// Prediction latencies in microseconds
    latencies_us: RwLock<Vec<u64>>,
    start_time: Instant,
}

impl ServiceMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            predictions_total: AtomicU64::new(0),
            client_errors: AtomicU64::new(0),
            unavailable_errors: AtomicU64::new(0),
            internal_errors: AtomicU64::new(0),
            latencies_us: RwLock::new(Vec::with_capacity(1000)),
            start_time: Instant::now(),
        }
    }

    /// Record an incoming prediction request
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed prediction with its end-to-end latency
    pub fn record_prediction(&self, latency: Duration) {
        self.predictions_total.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut latencies) = self.latencies_us.write() {
            latencies.push(latency.as_micros() as u64);
            // Keep only the most recent window for memory efficiency
            if latencies.len() > 10_000 {
                latencies.drain(0..5_000);
            }
        }
    }

    /// Record a request rejected as a client error (4xx)
    pub fn record_client_error(&self) {
        self.client_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request rejected because no models could serve it (503)
    pub fn record_unavailable(&self) {
        self.unavailable_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an unexpected internal failure (5xx)
    pub fn record_internal_error(&self) {
        self.internal_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Produce a point-in-time snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (avg, p95) = self
            .latencies_us
            .read()
            .map(|latencies| latency_stats(&latencies))
            .unwrap_or((0, 0));

        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            predictions_total: self.predictions_total.load(Ordering::Relaxed),
            client_errors: self.client_errors.load(Ordering::Relaxed),
            unavailable_errors: self.unavailable_errors.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
            avg_latency_us: avg,
            p95_latency_us: p95,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn latency_stats(latencies: &[u64]) -> (u64, u64) {
    if latencies.is_empty() {
        return (0, 0);
    }
    let avg = latencies.iter().sum::<u64>() / latencies.len() as u64;

    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();
    let p95_idx = ((sorted.len() as f64) * 0.95) as usize;
    let p95 = sorted[p95_idx.min(sorted.len() - 1)];

    (avg, p95)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = ServiceMetrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_prediction(Duration::from_millis(10));
        metrics.record_client_error();
        metrics.record_unavailable();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.predictions_total, 1);
        assert_eq!(snapshot.client_errors, 1);
        assert_eq!(snapshot.unavailable_errors, 1);
        assert_eq!(snapshot.internal_errors, 0);
        assert_eq!(snapshot.avg_latency_us, 10_000);
    }

    #[test]
    fn test_latency_stats() {
        let latencies: Vec<u64> = (1..=100).collect();
        let (avg, p95) = latency_stats(&latencies);
        assert_eq!(avg, 50);
        assert!(p95 >= 95);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = ServiceMetrics::new().snapshot();
        assert_eq!(snapshot.requests_total, 0);
        assert_eq!(snapshot.avg_latency_us, 0);
        assert_eq!(snapshot.p95_latency_us, 0);
    }
}
