use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Keeps the most recent latency samples and answers percentile queries
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    measurements: Arc<Mutex<VecDeque<u64>>>,
    window_size: usize,
}

impl PercentileTracker {
    /// Create a tracker retaining at most `window_size` samples
    pub fn new(window_size: usize) -> Self {
        Self {
            measurements: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size,
        }
    }

    /// Record a measurement (in nanoseconds)
    pub fn record(&self, nanos: u64) {
        let mut measurements = self.measurements.lock();
        if measurements.len() >= self.window_size {
            measurements.pop_front();
        }
        measurements.push_back(nanos);
    }

    pub fn p50_us(&self) -> f64 {
        self.percentile(0.50)
    }

    pub fn p95_us(&self) -> f64 {
        self.percentile(0.95)
    }

    pub fn p99_us(&self) -> f64 {
        self.percentile(0.99)
    }

    fn percentile(&self, p: f64) -> f64 {
        let mut sorted: Vec<u64> = {
            let measurements = self.measurements.lock();
            if measurements.is_empty() {
                return 0.0;
            }
            measurements.iter().copied().collect()
        };
        sorted.sort_unstable();

        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx] as f64 / 1000.0
    }

    pub fn count(&self) -> usize {
        self.measurements.lock().len()
    }
}

/// Counters shared between an operator's threads and whoever observes it.
///
/// Cloning is cheap; all clones update the same counters.
#[derive(Debug, Clone)]
pub struct StageMetrics {
    processed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    batches: Arc<AtomicU64>,
    latency_tracker: PercentileTracker,
    start_time: Instant,
}

impl StageMetrics {
    pub fn new() -> Self {
        Self {
            processed: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
            batches: Arc::new(AtomicU64::new(0)),
            latency_tracker: PercentileTracker::new(1000),
            start_time: Instant::now(),
        }
    }

    /// Record one element handled by the stage
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record `n` elements handled together, e.g. one flushed batch
    pub fn record_processed_n(&self, n: u64) {
        self.processed.fetch_add(n, Ordering::Relaxed);
    }

    /// Record one element whose transform failed or panicked
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one element evicted or refused by an overflow policy
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_n(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    /// Record one emitted batch or window snapshot
    pub fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long one transform invocation took
    pub fn record_latency(&self, elapsed: Duration) {
        self.latency_tracker
            .record(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));
    }

    pub fn total_processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn total_failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn total_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn total_batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Processed elements per second since the metrics were created
    pub fn throughput_eps(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.total_processed() as f64 / elapsed
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_processed: self.total_processed(),
            total_failed: self.total_failed(),
            total_dropped: self.total_dropped(),
            total_batches: self.total_batches(),
            throughput_eps: self.throughput_eps(),
            latency_p50_us: self.latency_tracker.p50_us(),
            latency_p95_us: self.latency_tracker.p95_us(),
            latency_p99_us: self.latency_tracker.p99_us(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for StageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of a [`StageMetrics`]
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_dropped: u64,
    pub total_batches: u64,
    pub throughput_eps: f64,
    pub latency_p50_us: f64,
    pub latency_p95_us: f64,
    pub latency_p99_us: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Format metrics as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "Processed: {}, Failed: {}, Dropped: {}, Batches: {}, Throughput: {:.2} el/s, \
             Latency P50: {:.2}µs, P95: {:.2}µs, P99: {:.2}µs, Elapsed: {:.2}s",
            self.total_processed,
            self.total_failed,
            self.total_dropped,
            self.total_batches,
            self.throughput_eps,
            self.latency_p50_us,
            self.latency_p95_us,
            self.latency_p99_us,
            self.elapsed.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_tracker() {
        let tracker = PercentileTracker::new(10);
        for i in 1..=10 {
            tracker.record(i * 1000);
        }
        assert_eq!(tracker.p50_us(), 5.0);
        assert_eq!(tracker.p99_us(), 10.0);
    }

    #[test]
    fn test_tracker_window_evicts_oldest() {
        let tracker = PercentileTracker::new(3);
        for i in 1..=5 {
            tracker.record(i * 1000);
        }
        assert_eq!(tracker.count(), 3);
        assert_eq!(tracker.p50_us(), 4.0);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = StageMetrics::new();
        let worker = metrics.clone();
        for _ in 0..10 {
            worker.record_processed();
        }
        worker.record_failed();
        worker.record_dropped();
        worker.record_batch();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_processed, 10);
        assert_eq!(snapshot.total_failed, 1);
        assert_eq!(snapshot.total_dropped, 1);
        assert_eq!(snapshot.total_batches, 1);
        assert!(snapshot.format().starts_with("Processed: 10, Failed: 1"));
    }

    #[test]
    fn test_bulk_counters() {
        let metrics = StageMetrics::new();
        metrics.record_processed_n(250);
        metrics.record_processed();
        metrics.record_dropped_n(0);
        metrics.record_dropped_n(3);
        assert_eq!(metrics.total_processed(), 251);
        assert_eq!(metrics.total_dropped(), 3);
    }
}
