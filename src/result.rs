//! Collapsing a stream of [`Result`]s back into plain values: discard the
//! failures, hand them to a callback, or escalate the first one.

use crate::channel::{Stream, DEFAULT_CAPACITY};
use crate::error::{Result, StreamError};
use crate::fault::fault_from_panic;
use log::{error, trace};
use std::thread::{self, JoinHandle};

/// Handle to an escalating stage; see [`Stream::escalate`]
#[derive(Debug)]
pub struct Escalation {
    handle: JoinHandle<Result<()>>,
}

impl Escalation {
    /// Wait for the stage to end. Returns the failure that stopped it, if any.
    pub fn join(self) -> Result<()> {
        self.handle
            .join()
            .unwrap_or_else(|payload| Err(fault_from_panic(payload)))
    }

    /// Whether the stage has ended, without blocking
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T: Send + 'static> Stream<Result<T>> {
    /// Pass values through and call `handler` for every failure
    pub fn catch<H>(self, mut handler: H) -> Stream<T>
    where
        H: FnMut(StreamError) + Send + 'static,
    {
        let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
        let rx = self.into_receiver();
        thread::spawn(move || {
            for item in rx {
                match item {
                    Ok(value) => {
                        if tx.send(value).is_err() {
                            return;
                        }
                    }
                    Err(e) => handler(e),
                }
            }
        });
        out
    }

    /// Drop failures silently
    pub fn muted(self) -> Stream<T> {
        self.catch(|e| trace!("muted: discarding {}", e))
    }

    /// Pass values through until the first failure, then stop.
    ///
    /// Stopping closes the output and drops this stage's input, so upstream
    /// stages wind down as their sends start failing. The failure is
    /// returned by [`Escalation::join`].
    pub fn escalate(self) -> (Stream<T>, Escalation) {
        let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
        let rx = self.into_receiver();
        let handle = thread::spawn(move || {
            for item in rx {
                match item {
                    Ok(value) => {
                        if tx.send(value).is_err() {
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        error!("escalate: aborting pipeline: {}", e);
                        return Err(e);
                    }
                }
            }
            Ok(())
        });
        (out, Escalation { handle })
    }
}
