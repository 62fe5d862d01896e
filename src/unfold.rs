use crate::channel::{Stream, DEFAULT_CAPACITY};
use crate::error::Result;
use crate::fault::guard;
use log::warn;
use std::thread;

/// Generate a stream by repeatedly applying `step` to a state.
///
/// `step` returns the next state together with the element to emit, or
/// `None` to finish. A panic inside `step` is emitted as a single final
/// `Err` element.
pub fn unfold_safe<S, D, F>(seed: S, mut step: F) -> Stream<Result<D>>
where
    S: Send + 'static,
    D: Send + 'static,
    F: FnMut(S) -> Option<(S, D)> + Send + 'static,
{
    let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
    thread::spawn(move || {
        let mut state = seed;
        loop {
            match guard(|| step(state)) {
                Ok(Some((next, data))) => {
                    if tx.send(Ok(data)).is_err() {
                        return;
                    }
                    state = next;
                }
                Ok(None) => return,
                Err(e) => {
                    warn!("unfold: generator failed: {}", e);
                    let _ = tx.send(Err(e));
                    return;
                }
            }
        }
    });
    out
}
