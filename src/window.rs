//! Sliding window over the most recent elements of a stream.

use crate::channel::Stream;
use crate::error::{Result, StreamError};
use crate::metrics::StageMetrics;
use crate::operator::Operator;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// What to do when admitting an element would exceed the size bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Admit anyway; the window may grow past its size bound
    Ignore,
    /// Fail the operator with [`StreamError::WindowOverflow`]
    Error,
    /// Refuse the new element, leaving the window unchanged
    DropTail,
    /// Evict the oldest element to make room for the new one
    DropHead,
}

impl FromStr for OverflowPolicy {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ignore" => Ok(OverflowPolicy::Ignore),
            "error" => Ok(OverflowPolicy::Error),
            "drop_tail" => Ok(OverflowPolicy::DropTail),
            "drop_head" => Ok(OverflowPolicy::DropHead),
            other => Err(StreamError::Config(format!(
                "unknown overflow policy '{}', expected one of ignore, error, drop_tail, drop_head",
                other
            ))),
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OverflowPolicy::Ignore => "ignore",
            OverflowPolicy::Error => "error",
            OverflowPolicy::DropTail => "drop_tail",
            OverflowPolicy::DropHead => "drop_head",
        };
        f.write_str(name)
    }
}

/// Bounds of a sliding window. At least one bound must be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub max_size: Option<usize>,
    pub max_duration: Option<Duration>,
    pub overflow: OverflowPolicy,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_size: None,
            max_duration: None,
            overflow: OverflowPolicy::DropHead,
        }
    }
}

impl WindowConfig {
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Reject configurations that bound nothing or use zero bounds
    pub fn validate(&self) -> Result<()> {
        match (self.max_size, self.max_duration) {
            (None, None) => Err(StreamError::Config(
                "sliding window needs a size bound, a duration bound, or both".into(),
            )),
            (Some(0), _) => Err(StreamError::Config(
                "sliding window max_size must be at least 1".into(),
            )),
            (_, Some(d)) if d.is_zero() => Err(StreamError::Config(
                "sliding window max_duration must be positive".into(),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
struct Timed<T> {
    value: T,
    arrived: Instant,
}

/// Expire by age, then admit `item` under the overflow policy.
/// Returns how many elements were dropped by the size bound.
fn evolve<T>(
    config: &WindowConfig,
    window: &mut VecDeque<Timed<T>>,
    item: T,
    now: Instant,
) -> Result<usize> {
    if let Some(max_duration) = config.max_duration {
        while let Some(oldest) = window.front() {
            if now.saturating_duration_since(oldest.arrived) > max_duration {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    let entry = Timed {
        value: item,
        arrived: now,
    };
    let max_size = match config.max_size {
        Some(max_size) if config.overflow != OverflowPolicy::Ignore => max_size,
        _ => {
            window.push_back(entry);
            return Ok(0);
        }
    };
    if window.len() < max_size {
        window.push_back(entry);
        return Ok(0);
    }

    match config.overflow {
        OverflowPolicy::DropHead => {
            window.pop_front();
            window.push_back(entry);
            Ok(1)
        }
        OverflowPolicy::DropTail => Ok(1),
        OverflowPolicy::Error => Err(StreamError::WindowOverflow),
        OverflowPolicy::Ignore => {
            window.push_back(entry);
            Ok(0)
        }
    }
}

/// Sliding window operator; every input element yields one snapshot.
///
/// With [`OverflowPolicy::Error`] an overflow ends the output with a single
/// `Err(StreamError::WindowOverflow)`.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    config: WindowConfig,
    metrics: Option<StageMetrics>,
}

impl SlidingWindow {
    pub fn new(config: WindowConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: StageMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl<T: Clone + Send + 'static> Operator<T> for SlidingWindow {
    type Output = Result<Vec<T>>;

    fn apply(self, input: Stream<T>) -> Stream<Result<Vec<T>>> {
        let SlidingWindow { config, metrics } = self;
        debug!(
            "sliding window: max_size={:?} max_duration={:?} overflow={}",
            config.max_size, config.max_duration, config.overflow
        );
        let states = input.try_scan(
            move |mut window: VecDeque<Timed<T>>, item| {
                let dropped = evolve(&config, &mut window, item, Instant::now()).map_err(|e| {
                    error!("sliding window: {} at size {}", e, window.len());
                    e
                })?;
                if let Some(m) = &metrics {
                    m.record_processed();
                    m.record_batch();
                    m.record_dropped_n(dropped as u64);
                }
                Ok(window)
            },
            VecDeque::new(),
        );
        states.map(|state| state.map(|window| window.into_iter().map(|e| e.value).collect()))
    }
}

impl<T: Clone + Send + 'static> Stream<T> {
    /// Sliding window with explicit bounds and overflow policy
    pub fn sliding_window(self, config: WindowConfig) -> Result<Stream<Result<Vec<T>>>> {
        Ok(self.via(SlidingWindow::new(config)?))
    }

    /// Window of the `size` most recent elements
    pub fn sliding_window_count(self, size: usize) -> Result<Stream<Vec<T>>> {
        let config = WindowConfig::default()
            .with_max_size(size)
            .with_overflow(OverflowPolicy::DropHead);
        Ok(self.sliding_window(config)?.muted())
    }

    /// Window of the elements that arrived within `duration`
    pub fn sliding_window_timed(self, duration: Duration) -> Result<Stream<Vec<T>>> {
        let config = WindowConfig::default().with_max_duration(duration);
        Ok(self.sliding_window(config)?.muted())
    }
}
