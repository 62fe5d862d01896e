use crate::channel::{Stream, DEFAULT_CAPACITY};
use crossbeam::channel;
use rand::Rng;
use std::thread;
use std::time::Duration;

impl<T: Send + 'static> Stream<T> {
    /// Emit at most one element per `interval`, aligned with a ticker
    pub fn throttle(self, interval: Duration) -> Stream<T> {
        let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
        let rx = self.into_receiver();
        thread::spawn(move || {
            let ticker = channel::tick(interval);
            for item in rx {
                if ticker.recv().is_err() || tx.send(item).is_err() {
                    return;
                }
            }
        });
        out
    }

    /// Delay each element by a random duration in `[0, max_delay]`
    pub fn jitter(self, max_delay: Duration) -> Stream<T> {
        let (tx, out) = Stream::channel(DEFAULT_CAPACITY);
        let rx = self.into_receiver();
        thread::spawn(move || {
            let mut rng = rand::thread_rng();
            for item in rx {
                thread::sleep(max_delay.mul_f64(rng.gen_range(0.0..=1.0)));
                if tx.send(item).is_err() {
                    return;
                }
            }
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_throttle_spaces_elements() {
        let started = Instant::now();
        let out = Stream::from_vec(vec![1, 2, 3, 4])
            .throttle(Duration::from_millis(20))
            .to_vec();
        assert_eq!(out, vec![1, 2, 3, 4]);
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn test_jitter_keeps_order_and_content() {
        let out = Stream::from_iterator(0..20)
            .jitter(Duration::from_millis(2))
            .to_vec();
        assert_eq!(out, (0..20).collect::<Vec<_>>());
    }
}
