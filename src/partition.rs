use crate::channel::{Stream, DEFAULT_CAPACITY};
use crate::error::{Result, StreamError};
use crossbeam::sync::WaitGroup;
use log::debug;
use std::thread;

/// Fan-in: interleave all `sources` into one stream.
///
/// Order across sources is unspecified; order within each source is kept.
/// The output closes once every source is exhausted.
pub fn merge<T: Send + 'static>(sources: Vec<Stream<T>>) -> Stream<T> {
    let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
    let barrier = WaitGroup::new();
    let count = sources.len();

    for source in sources {
        let tx = tx.clone();
        let done = barrier.clone();
        thread::spawn(move || {
            let _done = done;
            for item in source {
                if tx.send(item).is_err() {
                    return;
                }
            }
        });
    }

    thread::spawn(move || {
        barrier.wait();
        debug!("merge: all {} sources exhausted", count);
        drop(tx);
    });
    out
}

impl<T: Send + 'static> Stream<T> {
    /// Fan-out: route each element to output `partitioner(&x) % partitions`.
    ///
    /// A slow partition blocks routing to all the others.
    pub fn partition<P>(self, partitions: usize, mut partitioner: P) -> Result<Vec<Stream<T>>>
    where
        P: FnMut(&T) -> usize + Send + 'static,
    {
        if partitions == 0 {
            return Err(StreamError::Config("partition count must be at least 1".into()));
        }
        let (senders, outs): (Vec<_>, Vec<_>) = (0..partitions)
            .map(|_| Stream::channel(DEFAULT_CAPACITY))
            .unzip();
        let rx = self.into_receiver();

        thread::spawn(move || {
            for item in rx {
                let idx = partitioner(&item) % partitions;
                if senders[idx].send(item).is_err() {
                    debug!("partition: output {} dropped, stopping", idx);
                    return;
                }
            }
        });
        Ok(outs)
    }
}
