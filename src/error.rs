use std::fmt;
use thiserror::Error;

/// Boxed error carried by [`StreamError::Failed`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result envelope flowing between operators that may fail
pub type Result<T> = std::result::Result<T, StreamError>;

/// Why a stage observed cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelCause {
    /// The token was cancelled explicitly
    Cancelled,
    /// The token's deadline elapsed
    DeadlineExceeded,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Cancelled => f.write_str("cancelled"),
            CancelCause::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Errors produced by stream operators
#[derive(Error, Debug)]
pub enum StreamError {
    /// Invalid operator configuration, reported at construction time
    #[error("Configuration error: {0}")]
    Config(String),

    /// A sliding window with the `Error` overflow policy exceeded its size bound
    #[error("Window overflow")]
    WindowOverflow,

    /// The stage was cancelled before its source was exhausted
    #[error("Stream cancelled: {0}")]
    Cancelled(CancelCause),

    /// A transform panicked inside a fault boundary
    #[error("Transform panicked: {0}")]
    Panicked(String),

    /// A transform returned an explicit failure
    #[error("Transform failed: {0}")]
    Failed(#[source] BoxError),
}

impl StreamError {
    /// Wrap any error value as an element-level failure
    pub fn failed<E: Into<BoxError>>(error: E) -> Self {
        StreamError::Failed(error.into())
    }

    /// Returns true when this is a cancellation rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, StreamError::Cancelled(_))
    }
}
