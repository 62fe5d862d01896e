use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use crossbeam::select;
use log::trace;
use std::collections::HashSet;
use std::hash::Hash;
use std::thread;
use std::time::Duration;

pub use crossbeam::channel::Sender;

/// Capacity of the output channel each operator creates unless told otherwise
pub const DEFAULT_CAPACITY: usize = 1;

/// Read side of a bounded FIFO channel between two stages.
///
/// The producing stage owns the matching [`Sender`]; dropping it closes the
/// stream. Items already buffered stay drainable after close, and a closed,
/// drained stream ends iteration.
#[derive(Debug)]
pub struct Stream<T> {
    rx: Receiver<T>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T> Stream<T> {
    /// Create a bounded channel and return its write and read sides.
    /// A capacity of zero creates a rendezvous channel.
    pub fn channel(capacity: usize) -> (Sender<T>, Stream<T>) {
        let (tx, rx) = channel::bounded(capacity);
        (tx, Stream { rx })
    }

    /// Wrap an existing crossbeam receiver
    pub fn from_receiver(rx: Receiver<T>) -> Self {
        Self { rx }
    }

    /// Borrow the underlying receiver, e.g. to use it in a `select!`
    pub fn receiver(&self) -> &Receiver<T> {
        &self.rx
    }

    /// Unwrap into the underlying receiver
    pub fn into_receiver(self) -> Receiver<T> {
        self.rx
    }

    /// Block until the next element arrives; `None` once closed and drained
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Like [`Stream::recv`] but gives up after `timeout`.
    /// Returns `Err(true)` when the stream is finished, `Err(false)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<T, bool> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Disconnected => true,
            RecvTimeoutError::Timeout => false,
        })
    }

    /// Number of elements currently buffered
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Check if nothing is currently buffered
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Capacity of the channel, `None` if unbounded
    pub fn capacity(&self) -> Option<usize> {
        self.rx.capacity()
    }

    /// Blocking iterator over the remaining elements
    pub fn iter(&self) -> channel::Iter<'_, T> {
        self.rx.iter()
    }

    /// Drain the stream into a vector, blocking until it closes
    pub fn to_vec(self) -> Vec<T> {
        self.rx.into_iter().collect()
    }

    /// Drain the stream into a set, blocking until it closes
    pub fn to_set(self) -> HashSet<T>
    where
        T: Eq + Hash,
    {
        self.rx.into_iter().collect()
    }
}

impl<T: Send + 'static> Stream<T> {
    /// Feed a vector into a new stream from a producer thread
    pub fn from_vec(data: Vec<T>) -> Self {
        Self::from_iterator(data)
    }

    /// Feed any iterator into a new stream from a producer thread
    pub fn from_iterator<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T> + Send + 'static,
    {
        let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
        thread::spawn(move || {
            for item in items {
                if tx.send(item).is_err() {
                    trace!("source: downstream dropped, stopping");
                    return;
                }
            }
        });
        out
    }

    /// Re-buffer this stream behind a channel of `size` slots
    pub fn buffered(self, size: usize) -> Stream<T> {
        let (tx, out) = Stream::channel(size);
        let rx = self.rx;
        thread::spawn(move || forward(rx, tx));
        out
    }

    /// Collect elements while `predicate` holds. Returns them together with
    /// the rest of the stream, which starts at the first rejected element.
    ///
    /// Collection happens on the calling thread.
    pub fn collect_while<P>(self, mut predicate: P) -> (Vec<T>, Stream<T>)
    where
        P: FnMut(&T) -> bool,
    {
        let mut collected = Vec::new();
        let mut first_rejected = None;
        for item in self.rx.iter() {
            if predicate(&item) {
                collected.push(item);
            } else {
                first_rejected = Some(item);
                break;
            }
        }

        let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
        let rx = self.rx;
        thread::spawn(move || {
            if let Some(item) = first_rejected {
                if tx.send(item).is_err() {
                    return;
                }
            }
            forward(rx, tx);
        });
        (collected, out)
    }
}

impl<T> IntoIterator for Stream<T> {
    type Item = T;
    type IntoIter = channel::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rx.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Stream<T> {
    type Item = T;
    type IntoIter = channel::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rx.iter()
    }
}

/// Outcome of a send that races a stop signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Sent,
    /// The stop signal fired first
    Stopped,
    /// Every receiver of the output is gone
    Closed,
}

/// Send `item`, unless `stop` becomes ready first
pub(crate) fn deliver<T, K>(out: &Sender<T>, item: T, stop: &Receiver<K>) -> Delivery {
    select! {
        send(out, item) -> res => match res {
            Ok(()) => Delivery::Sent,
            Err(_) => Delivery::Closed,
        },
        recv(stop) -> _ => Delivery::Stopped,
    }
}

/// Copy everything from `rx` to `tx` until either side goes away
pub(crate) fn forward<T>(rx: Receiver<T>, tx: Sender<T>) {
    for item in rx {
        if tx.send(item).is_err() {
            return;
        }
    }
}
