//! Element-wise transforms: sequential ones run on a single stage thread,
//! the bounded-parallel ones spread invocations over at most `workers`
//! concurrent executions.

use crate::channel::{Stream, DEFAULT_CAPACITY};
use crate::error::{Result, StreamError};
use crate::metrics::StageMetrics;
use crate::operator::Operator;
use crossbeam::channel::{self, Receiver};
use crossbeam::sync::WaitGroup;
use log::{debug, error, trace};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

pub(crate) fn validate_workers(workers: usize) -> Result<()> {
    if workers == 0 {
        return Err(StreamError::Config("worker count must be at least 1".into()));
    }
    Ok(())
}

fn timed<T, R, F>(f: &F, item: T, metrics: Option<&StageMetrics>) -> R
where
    F: Fn(T) -> R,
{
    let started = Instant::now();
    let result = f(item);
    if let Some(m) = metrics {
        m.record_latency(started.elapsed());
        m.record_processed();
    }
    result
}

/// Logs when a worker leaves its loop by unwinding
struct PanicWatch {
    stage: &'static str,
}

impl Drop for PanicWatch {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("{}: transform panicked, worker stopped", self.stage);
        }
    }
}

/// Parallel map that emits results in input order.
///
/// A dispatcher thread reserves an admission slot per element and hands the
/// element's one-shot result slot, in arrival order, to a collector thread
/// that waits on each slot in turn. At most `workers` invocations run at
/// once.
pub struct OrderedMap<F> {
    pub(crate) transform: F,
    pub(crate) workers: usize,
    pub(crate) metrics: Option<StageMetrics>,
}

impl<F> OrderedMap<F> {
    pub fn new(transform: F, workers: usize) -> Result<Self> {
        validate_workers(workers)?;
        Ok(Self {
            transform,
            workers,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: StageMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl<T, R, F> Operator<T> for OrderedMap<F>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    type Output = R;

    fn apply(self, input: Stream<T>) -> Stream<R> {
        let OrderedMap {
            transform,
            workers,
            metrics,
        } = self;
        let transform = Arc::new(transform);
        // the collector holds one slot, the queue the other `workers - 1`
        let (slot_tx, slot_rx) = channel::bounded::<Receiver<R>>(workers - 1);
        let rx = input.into_receiver();

        thread::spawn(move || {
            for item in rx {
                let (result_tx, result_rx) = channel::bounded(1);
                if slot_tx.send(result_rx).is_err() {
                    trace!("map_ordered: collector gone, dispatcher stopping");
                    return;
                }
                let transform = Arc::clone(&transform);
                let metrics = metrics.clone();
                thread::spawn(move || {
                    let result = timed(transform.as_ref(), item, metrics.as_ref());
                    let _ = result_tx.send(result);
                });
            }
            trace!("map_ordered: upstream exhausted");
        });

        let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
        thread::spawn(move || {
            for slot in slot_rx {
                match slot.recv() {
                    Ok(result) => {
                        if tx.send(result).is_err() {
                            return;
                        }
                    }
                    Err(_) => {
                        error!("map_ordered: transform panicked, stage stopped");
                        return;
                    }
                }
            }
        });
        out
    }
}

/// Parallel map that emits results in completion order.
///
/// `workers` long-lived threads share the input and the output; the output
/// closes once every worker has passed the join barrier.
pub struct UnorderedMap<F> {
    pub(crate) transform: F,
    pub(crate) workers: usize,
    pub(crate) metrics: Option<StageMetrics>,
}

impl<F> UnorderedMap<F> {
    pub fn new(transform: F, workers: usize) -> Result<Self> {
        validate_workers(workers)?;
        Ok(Self {
            transform,
            workers,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: StageMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl<T, R, F> Operator<T> for UnorderedMap<F>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    type Output = R;

    fn apply(self, input: Stream<T>) -> Stream<R> {
        let UnorderedMap {
            transform,
            workers,
            metrics,
        } = self;
        let transform = Arc::new(transform);
        let (tx, out) = Stream::channel(workers);
        let rx = input.into_receiver();
        let barrier = WaitGroup::new();

        for worker in 0..workers {
            let rx = rx.clone();
            let tx = tx.clone();
            let transform = Arc::clone(&transform);
            let metrics = metrics.clone();
            let done = barrier.clone();
            thread::spawn(move || {
                let _done = done;
                let _watch = PanicWatch {
                    stage: "map_unordered",
                };
                for item in rx {
                    let result = timed(transform.as_ref(), item, metrics.as_ref());
                    if tx.send(result).is_err() {
                        break;
                    }
                }
                trace!("map_unordered: worker {} done", worker);
            });
        }
        drop(rx);

        thread::spawn(move || {
            barrier.wait();
            debug!("map_unordered: all {} workers done, closing output", workers);
            drop(tx);
        });
        out
    }
}

impl<T: Send + 'static> Stream<T> {
    /// Sequential map on a single stage thread
    pub fn map<R, F>(self, mut f: F) -> Stream<R>
    where
        R: Send + 'static,
        F: FnMut(T) -> R + Send + 'static,
    {
        let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
        let rx = self.into_receiver();
        thread::spawn(move || {
            for item in rx {
                if tx.send(f(item)).is_err() {
                    return;
                }
            }
        });
        out
    }

    /// Run a side effect on each element and pass it through unchanged
    pub fn inspect<F>(self, mut f: F) -> Stream<T>
    where
        F: FnMut(&T) + Send + 'static,
    {
        self.map(move |item| {
            f(&item);
            item
        })
    }

    /// Keep only elements matching `predicate`
    pub fn filter<P>(self, mut predicate: P) -> Stream<T>
    where
        P: FnMut(&T) -> bool + Send + 'static,
    {
        let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
        let rx = self.into_receiver();
        thread::spawn(move || {
            for item in rx {
                if predicate(&item) && tx.send(item).is_err() {
                    return;
                }
            }
        });
        out
    }

    /// Replace each element with the whole stream `f` returns for it
    pub fn flat_map<R, F>(self, mut f: F) -> Stream<R>
    where
        R: Send + 'static,
        F: FnMut(T) -> Stream<R> + Send + 'static,
    {
        let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
        let rx = self.into_receiver();
        thread::spawn(move || {
            for item in rx {
                for inner in f(item) {
                    if tx.send(inner).is_err() {
                        return;
                    }
                }
            }
        });
        out
    }

    /// Replace each element with the items of the collection `f` returns
    pub fn flat_map_iter<R, I, F>(self, mut f: F) -> Stream<R>
    where
        R: Send + 'static,
        I: IntoIterator<Item = R>,
        F: FnMut(T) -> I + Send + 'static,
    {
        let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
        let rx = self.into_receiver();
        thread::spawn(move || {
            for item in rx {
                for inner in f(item) {
                    if tx.send(inner).is_err() {
                        return;
                    }
                }
            }
        });
        out
    }

    /// Apply `f` with up to `workers` concurrent invocations, keeping input order
    pub fn map_ordered<R, F>(self, f: F, workers: usize) -> Result<Stream<R>>
    where
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        Ok(self.via(OrderedMap::new(f, workers)?))
    }

    /// Apply `f` with up to `workers` concurrent invocations, in completion order
    pub fn map_unordered<R, F>(self, f: F, workers: usize) -> Result<Stream<R>>
    where
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        Ok(self.via(UnorderedMap::new(f, workers)?))
    }
}
