//! Cooperative cancellation and termination of stages.
//!
//! A [`CancelToken`] is observed through a channel that never carries a
//! value and becomes ready once the token is cancelled, so stages can put it
//! in the same `select!` as their data and timer channels.

use crate::channel::{deliver, Delivery, Stream, DEFAULT_CAPACITY};
use crate::error::{CancelCause, Result, StreamError};
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use log::{debug, trace};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Uninhabited message type of the cancellation signal channel
#[derive(Debug)]
pub enum Never {}

#[derive(Debug)]
struct TokenState {
    trigger: Mutex<Option<Sender<Never>>>,
    cause: Mutex<Option<CancelCause>>,
    signal: Receiver<Never>,
}

/// Shared cancellation flag carrying the cause of cancellation
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (trigger, signal) = channel::bounded(0);
        Self {
            state: Arc::new(TokenState {
                trigger: Mutex::new(Some(trigger)),
                cause: Mutex::new(None),
                signal,
            }),
        }
    }

    /// A token that cancels itself with [`CancelCause::DeadlineExceeded`]
    /// once `timeout` has elapsed. A timeout too large to represent as an
    /// instant never fires.
    pub fn with_timeout(timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => Self::with_deadline(deadline),
            None => Self::new(),
        }
    }

    /// A token that cancels itself with [`CancelCause::DeadlineExceeded`]
    /// at `deadline`.
    ///
    /// The deadline is watched by a helper thread that holds no strong
    /// reference to the token: it exits as soon as the token is cancelled or
    /// every handle to it is dropped.
    pub fn with_deadline(deadline: Instant) -> Self {
        let token = Self::new();
        let state: Weak<TokenState> = Arc::downgrade(&token.state);
        // disconnects once the token is cancelled or its state is dropped
        let signal = token.state.signal.clone();
        thread::spawn(move || {
            let timer = channel::at(deadline);
            select! {
                recv(timer) -> _ => {
                    if let Some(state) = state.upgrade() {
                        debug!("cancel token: deadline reached");
                        CancelToken { state }.cancel_with(CancelCause::DeadlineExceeded);
                    }
                }
                recv(signal) -> _ => trace!("cancel token: watcher released"),
            }
        });
        token
    }

    /// Cancel with [`CancelCause::Cancelled`]
    pub fn cancel(&self) {
        self.cancel_with(CancelCause::Cancelled);
    }

    /// Cancel with an explicit cause. Only the first cancellation counts.
    pub fn cancel_with(&self, cause: CancelCause) {
        let mut current = self.state.cause.lock();
        if current.is_none() {
            *current = Some(cause);
            // dropping the only sender disconnects `signal`, waking every select on it
            self.state.trigger.lock().take();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cause.lock().is_some()
    }

    /// Cause of cancellation, `None` while still live
    pub fn cause(&self) -> Option<CancelCause> {
        *self.state.cause.lock()
    }

    /// Channel that becomes ready (disconnected) once cancelled
    pub fn signal(&self) -> &Receiver<Never> {
        &self.state.signal
    }

    /// Block until the token is cancelled and return the cause
    pub fn wait(&self) -> CancelCause {
        let _ = self.state.signal.recv();
        self.cause().unwrap_or(CancelCause::Cancelled)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Token that is cancelled as soon as `stream` emits or closes
pub fn to_cancel_token<T: Send + 'static>(stream: Stream<T>) -> CancelToken {
    let token = CancelToken::new();
    let trigger = token.clone();
    thread::spawn(move || {
        let _ = stream.recv();
        trigger.cancel();
    });
    token
}

/// Closes the wrapped output and then runs the callback, on every exit path
struct CompletionGuard<T, F: FnOnce()> {
    tx: Option<Sender<T>>,
    callback: Option<F>,
}

impl<T, F: FnOnce()> Drop for CompletionGuard<T, F> {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(callback) = self.callback.take() {
            callback();
        }
    }
}

impl<T: Send + 'static> Stream<T> {
    /// Race every receive against `token`. On cancellation emit exactly one
    /// `Err(StreamError::Cancelled)` carrying the cause, then close.
    pub fn with_cancel(self, token: &CancelToken) -> Stream<Result<T>> {
        let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
        let token = token.clone();
        let rx = self.into_receiver();
        thread::spawn(move || {
            let terminal = || {
                let cause = token.cause().unwrap_or(CancelCause::Cancelled);
                debug!("with_cancel: stopping, {}", cause);
                let _ = tx.send(Err(StreamError::Cancelled(cause)));
            };
            loop {
                if token.is_cancelled() {
                    terminal();
                    return;
                }
                select! {
                    recv(token.signal()) -> _ => {
                        terminal();
                        return;
                    }
                    recv(rx) -> msg => match msg {
                        Ok(item) => match deliver(&tx, Ok(item), token.signal()) {
                            Delivery::Sent => {}
                            Delivery::Stopped => {
                                terminal();
                                return;
                            }
                            Delivery::Closed => return,
                        },
                        Err(_) => {
                            trace!("with_cancel: upstream exhausted");
                            return;
                        }
                    },
                }
            }
        });
        out
    }

    /// Stop silently once `kill_switch` emits anything or closes
    pub fn via_kill_switch<K: Send + 'static>(self, kill_switch: Stream<K>) -> Stream<T> {
        let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
        let rx = self.into_receiver();
        let kill = kill_switch.into_receiver();
        thread::spawn(move || loop {
            select! {
                recv(kill) -> _ => {
                    debug!("kill switch: triggered");
                    return;
                }
                recv(rx) -> msg => match msg {
                    Ok(item) => {
                        if deliver(&tx, item, &kill) != Delivery::Sent {
                            return;
                        }
                    }
                    Err(_) => return,
                },
            }
        });
        out
    }

    /// Pass elements through and call `callback` exactly once after the
    /// output has been closed, whatever the reason the stage ended
    pub fn when_done<F>(self, callback: F) -> Stream<T>
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
        let rx = self.into_receiver();
        thread::spawn(move || {
            let guard = CompletionGuard {
                tx: Some(tx),
                callback: Some(callback),
            };
            if let Some(tx) = guard.tx.as_ref() {
                for item in rx {
                    if tx.send(item).is_err() {
                        break;
                    }
                }
            }
        });
        out
    }
}
