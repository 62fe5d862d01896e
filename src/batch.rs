//! Weighted time/size/count batching.
//!
//! A single accumulation thread selects over the data channel, a ticker and
//! the optional cancellation signal, so the "buffer full" and "latency
//! elapsed" decisions are made by one serialized state machine.

use crate::cancel::CancelToken;
use crate::channel::{deliver, Delivery, Stream, DEFAULT_CAPACITY};
use crate::error::{Result, StreamError};
use crate::metrics::StageMetrics;
use crate::operator::Operator;
use crossbeam::channel;
use crossbeam::select;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::mem;
use std::ops::{Add, Sub};
use std::thread;
use std::time::{Duration, Instant};

/// Lower bound for the flush ticker period
pub const MIN_TICK: Duration = Duration::from_millis(5);

/// Numeric type usable as an element weight. Element weights must not be
/// negative.
pub trait Weight:
    Copy + PartialOrd + Add<Output = Self> + Sub<Output = Self> + Default + Debug + Send + 'static
{
}

impl<N> Weight for N where
    N: Copy + PartialOrd + Add<Output = N> + Sub<Output = N> + Default + Debug + Send + 'static
{
}

/// Flush thresholds of a batching operator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchLimits<N> {
    /// Maximum cumulative weight of one batch
    pub max_weight: N,
    /// Maximum number of elements in one batch
    pub max_count: usize,
    /// Maximum time a non-empty batch stays open, counted from its first element
    pub max_latency: Duration,
}

impl<N: Weight> BatchLimits<N> {
    pub fn new(max_weight: N, max_count: usize, max_latency: Duration) -> Self {
        Self {
            max_weight,
            max_count,
            max_latency,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_count == 0 {
            return Err(StreamError::Config("batch max_count must be at least 1".into()));
        }
        if !(self.max_weight > N::default()) {
            return Err(StreamError::Config(format!(
                "batch max_weight must be positive, got {:?}",
                self.max_weight
            )));
        }
        if self.max_latency.is_zero() {
            return Err(StreamError::Config("batch max_latency must be positive".into()));
        }
        Ok(())
    }

    /// Ticker period: 1% of the latency bound, never below [`MIN_TICK`]
    pub fn tick_interval(&self) -> Duration {
        (self.max_latency / 100).max(MIN_TICK)
    }
}

/// Batch under construction
struct Accumulator<T, N> {
    limits: BatchLimits<N>,
    buffer: Vec<T>,
    weight: N,
    opened_at: Option<Instant>,
}

impl<T, N: Weight> Accumulator<T, N> {
    fn new(limits: BatchLimits<N>) -> Self {
        Self {
            limits,
            buffer: Vec::new(),
            weight: N::default(),
            opened_at: None,
        }
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Add one element; returns the batches that became ready (at most two:
    /// the previous buffer if the element does not fit, then the buffer
    /// holding the element if it reached a threshold).
    fn admit(&mut self, item: T, weight: N, now: Instant) -> Vec<Vec<T>> {
        let mut ready = Vec::new();
        if !self.buffer.is_empty() && !self.fits(weight) {
            ready.push(self.take());
        }
        if self.buffer.is_empty() {
            self.opened_at = Some(now);
        }
        self.buffer.push(item);
        self.weight = self.weight + weight;
        if self.buffer.len() >= self.limits.max_count || self.weight >= self.limits.max_weight {
            ready.push(self.take());
        }
        ready
    }

    /// Whether `weight` can join the open batch without passing `max_weight`.
    /// Compared by headroom so the sum is never formed when it would not fit.
    fn fits(&self, weight: N) -> bool {
        // an open batch always weighs less than max_weight
        weight <= self.limits.max_weight - self.weight
    }

    /// Flush if the open batch has been waiting for at least `max_latency`
    fn on_tick(&mut self, now: Instant) -> Option<Vec<T>> {
        match self.opened_at {
            Some(opened) if now.saturating_duration_since(opened) >= self.limits.max_latency => {
                Some(self.take())
            }
            _ => None,
        }
    }

    /// Remainder on upstream exhaustion
    fn drain(mut self) -> Option<Vec<T>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    fn take(&mut self) -> Vec<T> {
        self.weight = N::default();
        self.opened_at = None;
        mem::take(&mut self.buffer)
    }
}

/// Batching operator bounded by cumulative weight, count and latency.
///
/// An element heavier than `max_weight` is emitted alone. No empty batch is
/// ever emitted.
pub struct WeightedBatch<F, N> {
    weigh: F,
    limits: BatchLimits<N>,
    cancel: Option<CancelToken>,
    metrics: Option<StageMetrics>,
}

/// Count/latency batching: every element weighs 1
pub type Batch<T> = WeightedBatch<fn(&T) -> usize, usize>;

fn unit_weight<T>(_: &T) -> usize {
    1
}

impl<F, N: Weight> WeightedBatch<F, N> {
    pub fn new(weigh: F, limits: BatchLimits<N>) -> Result<Self> {
        limits.validate()?;
        Ok(Self {
            weigh,
            limits,
            cancel: None,
            metrics: None,
        })
    }

    /// Stop silently, discarding the open batch, once `token` is cancelled
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_metrics(mut self, metrics: StageMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn limits(&self) -> &BatchLimits<N> {
        &self.limits
    }
}

impl<T> WeightedBatch<fn(&T) -> usize, usize> {
    /// Batches of at most `max_count` elements, flushed after `max_latency`
    pub fn unweighted(max_count: usize, max_latency: Duration) -> Result<Self> {
        Self::new(
            unit_weight::<T> as fn(&T) -> usize,
            BatchLimits::new(max_count, max_count, max_latency),
        )
    }
}

impl<T, F, N> Operator<T> for WeightedBatch<F, N>
where
    T: Send + 'static,
    F: FnMut(&T) -> N + Send + 'static,
    N: Weight,
{
    type Output = Vec<T>;

    fn apply(self, input: Stream<T>) -> Stream<Vec<T>> {
        let WeightedBatch {
            mut weigh,
            limits,
            cancel,
            metrics,
        } = self;
        let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
        let rx = input.into_receiver();

        thread::spawn(move || {
            let ticker = channel::tick(limits.tick_interval());
            let cancelled = cancel
                .as_ref()
                .map(|token| token.signal().clone())
                .unwrap_or_else(channel::never);
            let mut acc = Accumulator::new(limits);
            debug!(
                "batch: started, max_count={} max_weight={:?} max_latency={:?}",
                limits.max_count, limits.max_weight, limits.max_latency
            );

            let emit = |batch: Vec<T>| -> bool {
                let len = batch.len();
                match deliver(&tx, batch, &cancelled) {
                    Delivery::Sent => {
                        trace!("batch: flushed {} elements", len);
                        if let Some(m) = &metrics {
                            m.record_batch();
                            m.record_processed_n(len as u64);
                        }
                        true
                    }
                    Delivery::Stopped => {
                        debug!("batch: cancelled while flushing");
                        false
                    }
                    Delivery::Closed => false,
                }
            };

            loop {
                if cancel.as_ref().map_or(false, CancelToken::is_cancelled) {
                    debug!("batch: cancelled, discarding {} buffered", acc.len());
                    return;
                }
                select! {
                    recv(rx) -> msg => match msg {
                        Ok(item) => {
                            let weight = weigh(&item);
                            for batch in acc.admit(item, weight, Instant::now()) {
                                if !emit(batch) {
                                    return;
                                }
                            }
                        }
                        Err(_) => {
                            debug!("batch: upstream exhausted, {} buffered", acc.len());
                            if let Some(batch) = acc.drain() {
                                emit(batch);
                            }
                            return;
                        }
                    },
                    recv(ticker) -> _ => {
                        if let Some(batch) = acc.on_tick(Instant::now()) {
                            if !emit(batch) {
                                return;
                            }
                        }
                    }
                    recv(cancelled) -> _ => {
                        debug!("batch: cancelled, discarding {} buffered", acc.len());
                        return;
                    }
                }
            }
        });
        out
    }
}

impl<T: Send + 'static> Stream<T> {
    /// Group elements into batches of at most `max_count`, flushing any
    /// non-empty batch that has been open for `max_latency`
    pub fn batch(self, max_count: usize, max_latency: Duration) -> Result<Stream<Vec<T>>> {
        Ok(self.via(Batch::<T>::unweighted(max_count, max_latency)?))
    }

    /// Group elements into batches bounded by the cumulative `weigh` of
    /// their elements, their count and their age
    pub fn batch_weighted<F, N>(
        self,
        weigh: F,
        max_weight: N,
        max_count: usize,
        max_latency: Duration,
    ) -> Result<Stream<Vec<T>>>
    where
        F: FnMut(&T) -> N + Send + 'static,
        N: Weight,
    {
        let limits = BatchLimits::new(max_weight, max_count, max_latency);
        Ok(self.via(WeightedBatch::new(weigh, limits)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_weight: u32, max_count: usize) -> BatchLimits<u32> {
        BatchLimits::new(max_weight, max_count, Duration::from_secs(60))
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        assert!(BatchLimits::new(0u32, 3, Duration::from_millis(10)).validate().is_err());
        assert!(BatchLimits::new(3u32, 0, Duration::from_millis(10)).validate().is_err());
        assert!(BatchLimits::new(3u32, 3, Duration::ZERO).validate().is_err());
        assert!(BatchLimits::new(0.5f64, 3, Duration::from_millis(10)).validate().is_ok());
    }

    #[test]
    fn test_tick_interval() {
        let fine = BatchLimits::new(1u32, 1, Duration::from_secs(2));
        assert_eq!(fine.tick_interval(), Duration::from_millis(20));
        let floored = BatchLimits::new(1u32, 1, Duration::from_millis(50));
        assert_eq!(floored.tick_interval(), MIN_TICK);
    }

    #[test]
    fn test_accumulator_count_threshold() {
        let mut acc = Accumulator::new(limits(100, 2));
        let now = Instant::now();
        assert!(acc.admit(1, 1, now).is_empty());
        assert_eq!(acc.admit(2, 1, now), vec![vec![1, 2]]);
        assert_eq!(acc.len(), 0);
    }

    #[test]
    fn test_accumulator_never_exceeds_weight() {
        let mut acc = Accumulator::new(limits(5, 100));
        let now = Instant::now();
        assert!(acc.admit("a", 3, now).is_empty());
        // 3 + 3 > 5: "a" is flushed before "b" is admitted
        assert_eq!(acc.admit("b", 3, now), vec![vec!["a"]]);
        assert_eq!(acc.admit("c", 2, now), vec![vec!["b", "c"]]);
    }

    #[test]
    fn test_accumulator_near_max_weights_do_not_overflow() {
        let mut acc = Accumulator::new(BatchLimits::new(200u8, 10, Duration::from_secs(60)));
        let now = Instant::now();
        assert!(acc.admit(1, 100u8, now).is_empty());
        assert_eq!(acc.admit(2, 200u8, now), vec![vec![1], vec![2]]);
        assert!(acc.admit(3, 1u8, now).is_empty());
        assert_eq!(acc.admit(4, 199u8, now), vec![vec![3, 4]]);
        assert!(acc.drain().is_none());
    }

    #[test]
    fn test_batch_weighted_narrow_weight_type() {
        let batches = Stream::from_vec(vec![100u8, 200, 1, 150, 120])
            .batch_weighted(|w: &u8| *w, 200u8, 10, Duration::from_secs(60))
            .unwrap()
            .to_vec();
        assert_eq!(batches, vec![vec![100], vec![200], vec![1, 150], vec![120]]);
        for batch in &batches {
            let weight: u32 = batch.iter().map(|w| u32::from(*w)).sum();
            assert!(weight <= 200);
        }
    }

    #[test]
    fn test_accumulator_oversized_element_alone() {
        let mut acc = Accumulator::new(limits(5, 100));
        let now = Instant::now();
        acc.admit(1, 1, now);
        assert_eq!(acc.admit(2, 9, now), vec![vec![1], vec![2]]);
        assert!(acc.drain().is_none());
    }

    #[test]
    fn test_batch_metrics_count_elements_and_batches() {
        let metrics = StageMetrics::new();
        let op = Batch::unweighted(4, Duration::from_secs(60))
            .unwrap()
            .with_metrics(metrics.clone());
        let batches = Stream::from_iterator(0..10).via(op).to_vec();
        assert_eq!(batches.len(), 3);
        assert_eq!(metrics.total_processed(), 10);
        assert_eq!(metrics.total_batches(), 3);
    }

    #[test]
    fn test_accumulator_latency_from_first_element() {
        let mut acc = Accumulator::new(BatchLimits::new(100u32, 100, Duration::from_millis(50)));
        let t0 = Instant::now();
        assert!(acc.on_tick(t0 + Duration::from_secs(1)).is_none());
        acc.admit(1, 1, t0);
        acc.admit(2, 1, t0 + Duration::from_millis(30));
        assert!(acc.on_tick(t0 + Duration::from_millis(40)).is_none());
        assert_eq!(acc.on_tick(t0 + Duration::from_millis(50)), Some(vec![1, 2]));
        assert!(acc.on_tick(t0 + Duration::from_millis(200)).is_none());
    }

    #[test]
    fn test_batch_flushes_remainder_on_exhaustion() {
        let batches = Stream::from_iterator(1..=7)
            .batch(3, Duration::from_secs(60))
            .unwrap()
            .to_vec();
        assert_eq!(batches, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
    }

    #[test]
    fn test_batch_empty_source_emits_nothing() {
        let batches = Stream::<i32>::from_vec(vec![])
            .batch(3, Duration::from_millis(10))
            .unwrap()
            .to_vec();
        assert!(batches.is_empty());
    }

    #[test]
    fn test_batch_weighted_bytes() {
        let words = vec!["aa", "bbb", "c", "dddd", "eeeeeeeeee"];
        let batches = Stream::from_vec(words)
            .batch_weighted(|w: &&str| w.len(), 5, 10, Duration::from_secs(60))
            .unwrap()
            .to_vec();
        assert_eq!(
            batches,
            vec![vec!["aa", "bbb"], vec!["c", "dddd"], vec!["eeeeeeeeee"]]
        );
    }

    #[test]
    fn test_batch_latency_flush() {
        let (tx, source) = Stream::channel(1);
        let batches = source.batch(100, Duration::from_millis(30)).unwrap();
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        let first = batches.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first, vec![1, 2]);
        tx.send(3).unwrap();
        drop(tx);
        assert_eq!(batches.to_vec(), vec![vec![3]]);
    }

    #[test]
    fn test_batch_cancel_stops_silently() {
        let token = CancelToken::new();
        let (tx, source) = Stream::channel(1);
        let batches = source.via(
            Batch::unweighted(10, Duration::from_secs(60))
                .unwrap()
                .with_cancel(token.clone()),
        );
        tx.send(1).unwrap();
        token.cancel();
        assert!(batches.to_vec().is_empty());
    }

    #[test]
    fn test_limits_from_json() {
        let limits: BatchLimits<u64> = serde_json::from_str(
            r#"{"max_weight": 1024, "max_count": 10, "max_latency": {"secs": 0, "nanos": 50000000}}"#,
        )
        .unwrap();
        assert_eq!(limits.max_latency, Duration::from_millis(50));
        assert!(limits.validate().is_ok());
    }
}
