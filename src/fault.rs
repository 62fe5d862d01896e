//! Fault boundary: run a transform so that a panic becomes a
//! [`StreamError`] value instead of unwinding through the stage thread.

use crate::channel::Stream;
use crate::error::{BoxError, Result, StreamError};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

/// Run `f`, converting a panic into `Err`
pub fn guard<R, F>(f: F) -> Result<R>
where
    F: FnOnce() -> R,
{
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(fault_from_panic)
}

/// Run a fallible `f`; both a panic and a returned `Err` become `Err`.
/// The returned error value is kept as the source of [`StreamError::Failed`].
pub fn guard_fallible<R, E, F>(f: F) -> Result<R>
where
    F: FnOnce() -> std::result::Result<R, E>,
    E: Into<BoxError>,
{
    guard(f)?.map_err(StreamError::failed)
}

/// Run `f` on its own thread; the returned stream yields exactly one outcome
pub fn spawn_guarded<R, F>(f: F) -> Stream<Result<R>>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, out) = Stream::channel(1);
    thread::spawn(move || {
        let _ = tx.send(guard(f));
    });
    out
}

/// Translate a panic payload into a failure.
///
/// A payload that already is a [`StreamError`] or a boxed error is passed
/// through; string payloads become [`StreamError::Panicked`].
pub(crate) fn fault_from_panic(payload: Box<dyn Any + Send>) -> StreamError {
    let payload = match payload.downcast::<StreamError>() {
        Ok(err) => return *err,
        Err(other) => other,
    };
    let payload = match payload.downcast::<BoxError>() {
        Ok(err) => return StreamError::Failed(*err),
        Err(other) => other,
    };
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return StreamError::Panicked((*msg).to_string());
    }
    match payload.downcast::<String>() {
        Ok(msg) => StreamError::Panicked(*msg),
        Err(_) => StreamError::Panicked("non-string panic payload".to_string()),
    }
}
