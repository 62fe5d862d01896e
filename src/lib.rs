//! Composable, bounded-concurrency stream operators over crossbeam channels.
//!
//! Every operator consumes a [`Stream`] (the read side of a bounded channel),
//! runs on one or more dedicated threads, and returns the read side of its
//! own bounded output channel. A full output blocks the stage, so
//! backpressure travels upstream without any extra machinery.
//!
//! # Features
//!
//! - Weighted batching bounded by cumulative weight, element count and latency
//! - Sliding windows bounded by size and/or age, with an explicit overflow policy
//! - Parallel mapping with a hard concurrency bound, in input or completion order
//! - Fault boundaries that turn panicking transforms into `Err` elements
//! - Cancellation tokens with deadlines, kill switches and completion callbacks
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use stream_operators::Stream;
//!
//! # fn main() -> stream_operators::Result<()> {
//! let batches = Stream::from_iterator(1..=10)
//!     .map_ordered(|x: u32| x * 2, 4)?
//!     .batch(3, Duration::from_secs(10))?
//!     .to_vec();
//!
//! assert_eq!(
//!     batches,
//!     vec![vec![2, 4, 6], vec![8, 10, 12], vec![14, 16, 18], vec![20]]
//! );
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod cancel;
pub mod channel;
pub mod error;
pub mod fault;
pub mod mapping;
pub mod metrics;
pub mod operator;
pub mod partition;
pub mod result;
pub mod safe;
pub mod scan;
pub mod timing;
pub mod unfold;
pub mod window;

pub use batch::{Batch, BatchLimits, Weight, WeightedBatch};
pub use cancel::{to_cancel_token, CancelToken};
pub use channel::{Sender, Stream, DEFAULT_CAPACITY};
pub use error::{BoxError, CancelCause, Result, StreamError};
pub use fault::{guard, guard_fallible, spawn_guarded};
pub use mapping::{OrderedMap, UnorderedMap};
pub use metrics::{MetricsSnapshot, StageMetrics};
pub use operator::Operator;
pub use partition::merge;
pub use result::Escalation;
pub use safe::SafeMap;
pub use unfold::unfold_safe;
pub use window::{OverflowPolicy, SlidingWindow, WindowConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
