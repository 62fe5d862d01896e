//! Panic-safe parallel mapping: each invocation runs inside a fault
//! boundary, so one failing element becomes one `Err` element instead of
//! taking the stage down.

use crate::channel::Stream;
use crate::error::{BoxError, Result};
use crate::fault::guard_fallible;
use crate::mapping::{validate_workers, OrderedMap, UnorderedMap};
use crate::metrics::StageMetrics;
use crate::operator::Operator;
use std::convert::Infallible;

/// Parallel map whose transform may panic or return `Err`.
/// Emits one `Result` per input element.
pub struct SafeMap<F> {
    transform: F,
    workers: usize,
    ordered: bool,
    metrics: Option<StageMetrics>,
}

impl<F> SafeMap<F> {
    /// Results in input order
    pub fn ordered(transform: F, workers: usize) -> Result<Self> {
        validate_workers(workers)?;
        Ok(Self {
            transform,
            workers,
            ordered: true,
            metrics: None,
        })
    }

    /// Results in completion order
    pub fn unordered(transform: F, workers: usize) -> Result<Self> {
        validate_workers(workers)?;
        Ok(Self {
            transform,
            workers,
            ordered: false,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: StageMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl<T, R, E, F> Operator<T> for SafeMap<F>
where
    T: Send + 'static,
    R: Send + 'static,
    E: Into<BoxError>,
    F: Fn(T) -> std::result::Result<R, E> + Send + Sync + 'static,
{
    type Output = Result<R>;

    fn apply(self, input: Stream<T>) -> Stream<Result<R>> {
        let SafeMap {
            transform,
            workers,
            ordered,
            metrics,
        } = self;
        let failures = metrics.clone();
        let guarded = move |item: T| {
            let outcome = guard_fallible(|| transform(item));
            if let (Err(_), Some(m)) = (&outcome, &failures) {
                m.record_failed();
            }
            outcome
        };
        if ordered {
            input.via(OrderedMap {
                transform: guarded,
                workers,
                metrics,
            })
        } else {
            input.via(UnorderedMap {
                transform: guarded,
                workers,
                metrics,
            })
        }
    }
}

fn infallible<T, R, F>(f: F) -> impl Fn(T) -> std::result::Result<R, Infallible>
where
    F: Fn(T) -> R,
{
    move |item| Ok(f(item))
}

impl<T: Send + 'static> Stream<T> {
    /// Ordered parallel map; a panicking invocation yields `Err(Panicked)`
    pub fn map_safe<R, F>(self, f: F, workers: usize) -> Result<Stream<Result<R>>>
    where
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        Ok(self.via(SafeMap::ordered(infallible(f), workers)?))
    }

    /// Unordered parallel map; a panicking invocation yields `Err(Panicked)`
    pub fn map_unordered_safe<R, F>(self, f: F, workers: usize) -> Result<Stream<Result<R>>>
    where
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        Ok(self.via(SafeMap::unordered(infallible(f), workers)?))
    }

    /// Ordered parallel map over a fallible transform. A returned `Err`
    /// becomes `Err(Failed)` carrying the original error; a panic becomes
    /// `Err(Panicked)`.
    pub fn try_map_safe<R, E, F>(self, f: F, workers: usize) -> Result<Stream<Result<R>>>
    where
        R: Send + 'static,
        E: Into<BoxError>,
        F: Fn(T) -> std::result::Result<R, E> + Send + Sync + 'static,
    {
        Ok(self.via(SafeMap::ordered(f, workers)?))
    }

    /// Unordered variant of [`Stream::try_map_safe`]
    pub fn try_map_unordered_safe<R, E, F>(
        self,
        f: F,
        workers: usize,
    ) -> Result<Stream<Result<R>>>
    where
        R: Send + 'static,
        E: Into<BoxError>,
        F: Fn(T) -> std::result::Result<R, E> + Send + Sync + 'static,
    {
        Ok(self.via(SafeMap::unordered(f, workers)?))
    }
}
