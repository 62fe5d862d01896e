use crate::channel::{Stream, DEFAULT_CAPACITY};
use crate::error::Result;
use std::thread;

impl<T: Send + 'static> Stream<T> {
    /// Evolve `initial` with every element and emit each new state
    pub fn scan<S, F>(self, mut f: F, initial: S) -> Stream<S>
    where
        S: Clone + Send + 'static,
        F: FnMut(S, T) -> S + Send + 'static,
    {
        let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
        let rx = self.into_receiver();
        thread::spawn(move || {
            let mut state = initial;
            for item in rx {
                state = f(state, item);
                if tx.send(state.clone()).is_err() {
                    return;
                }
            }
        });
        out
    }

    /// Like [`Stream::scan`], but `f` may fail. The first `Err` is emitted
    /// as the final element and the stage stops.
    pub fn try_scan<S, F>(self, mut f: F, initial: S) -> Stream<Result<S>>
    where
        S: Clone + Send + 'static,
        F: FnMut(S, T) -> Result<S> + Send + 'static,
    {
        let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
        let rx = self.into_receiver();
        thread::spawn(move || {
            let mut state = initial;
            for item in rx {
                match f(state, item) {
                    Ok(next) => {
                        state = next;
                        if tx.send(Ok(state.clone())).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                }
            }
        });
        out
    }

    /// Fold the whole stream and emit only the final state.
    /// An empty stream emits `initial`.
    pub fn fold<S, F>(self, mut f: F, initial: S) -> Stream<S>
    where
        S: Send + 'static,
        F: FnMut(S, T) -> S + Send + 'static,
    {
        let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
        let rx = self.into_receiver();
        thread::spawn(move || {
            let mut state = initial;
            for item in rx {
                state = f(state, item);
            }
            let _ = tx.send(state);
        });
        out
    }
}
