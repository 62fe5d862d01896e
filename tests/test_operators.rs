use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use stream_operators::{
    merge, to_cancel_token, CancelCause, CancelToken, OverflowPolicy, Stream, StreamError,
    WindowConfig,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Emit `items` from a producer thread, sleeping `gap` after each one
fn paced<T: Send + 'static>(items: Vec<T>, gap: Duration) -> Stream<T> {
    let (tx, out) = Stream::channel(10);
    thread::spawn(move || {
        for item in items {
            if tx.send(item).is_err() {
                return;
            }
            thread::sleep(gap);
        }
    });
    out
}

#[test]
fn test_batch_count_dominates_latency() {
    init_logger();
    let batches = paced((1..=10).collect(), Duration::from_millis(10))
        .batch(3, Duration::from_millis(50))
        .expect("Batch config failed")
        .to_vec();
    assert_eq!(
        batches,
        vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9], vec![10]]
    );
}

#[test]
fn test_batch_latency_bound() {
    init_logger();
    let max_latency = Duration::from_millis(60);
    let stamps: Vec<u32> = (0..12).collect();
    let (tx, source) = Stream::channel(10);
    thread::spawn(move || {
        for i in stamps {
            if tx.send((i, Instant::now())).is_err() {
                return;
            }
            thread::sleep(Duration::from_millis(25));
        }
    });

    let batches = source.batch(1000, max_latency).expect("Batch config failed");
    let mut seen = 0;
    for batch in batches {
        let (_, first_arrival) = batch[0];
        // latency bound plus tick resolution plus scheduling slack
        assert!(first_arrival.elapsed() <= max_latency + Duration::from_millis(5 + 100));
        assert!(batch.len() < 12, "latency flush never fired");
        seen += batch.len();
    }
    assert_eq!(seen, 12);
}

#[test]
fn test_weighted_batch_never_exceeds_weight() {
    init_logger();
    let sizes = vec![4usize, 4, 1, 9, 2, 2, 2, 30, 1];
    let batches = Stream::from_vec(sizes.clone())
        .batch_weighted(|w: &usize| *w, 8, 100, Duration::from_secs(60))
        .expect("Batch config failed")
        .to_vec();
    for batch in &batches {
        let weight: usize = batch.iter().sum();
        assert!(weight <= 8 || batch.len() == 1, "batch {:?} too heavy", batch);
    }
    assert_eq!(batches.concat(), sizes);
}

#[test]
fn test_window_size_invariant() {
    init_logger();
    let k = 3;
    let snapshots = Stream::from_iterator(0..10)
        .sliding_window_count(k)
        .expect("Window config failed")
        .to_vec();
    assert_eq!(snapshots.len(), 10);
    for (n, snapshot) in snapshots.iter().enumerate() {
        let expected: Vec<i32> = ((n + 1).saturating_sub(k) as i32..=n as i32).collect();
        assert_eq!(snapshot, &expected);
    }
}

#[test]
fn test_window_duration_invariant() {
    init_logger();
    let (tx, source) = Stream::channel(1);
    let windows = source
        .sliding_window_timed(Duration::from_millis(80))
        .expect("Window config failed");
    tx.send(1).unwrap();
    assert_eq!(windows.recv(), Some(vec![1]));
    tx.send(2).unwrap();
    assert_eq!(windows.recv(), Some(vec![1, 2]));
    thread::sleep(Duration::from_millis(200));
    tx.send(3).unwrap();
    assert_eq!(windows.recv(), Some(vec![3]));
    drop(tx);
    assert_eq!(windows.recv(), None);
}

#[test]
fn test_window_without_bounds_is_config_error() {
    let err = Stream::from_vec(vec![1])
        .sliding_window(WindowConfig::default().with_overflow(OverflowPolicy::DropTail))
        .unwrap_err();
    assert!(matches!(err, StreamError::Config(_)));
}

#[test]
fn test_ordered_map_with_random_latency() {
    init_logger();
    let out = Stream::from_iterator(0..300u32)
        .map_ordered(
            |x| {
                let delay = rand::thread_rng().gen_range(0..3);
                thread::sleep(Duration::from_millis(delay));
                x * 3
            },
            16,
        )
        .expect("Map config failed")
        .to_vec();
    assert_eq!(out, (0..300u32).map(|x| x * 3).collect::<Vec<_>>());
}

fn fail_on_even(x: i32) -> i32 {
    if x % 2 == 0 {
        panic!("even input {}", x);
    }
    x
}

#[test]
fn test_panic_isolation_ordered() {
    init_logger();
    let out = Stream::from_vec(vec![1, 2, 3, 4, 5])
        .map_safe(fail_on_even, 3)
        .expect("Map config failed")
        .muted()
        .to_vec();
    assert_eq!(out, vec![1, 3, 5]);
}

#[test]
fn test_panic_isolation_unordered() {
    init_logger();
    let out = Stream::from_vec(vec![1, 2, 3, 4, 5])
        .map_unordered_safe(fail_on_even, 3)
        .expect("Map config failed")
        .muted()
        .to_set();
    assert_eq!(out, HashSet::from([1, 3, 5]));
}

#[test]
fn test_scan_and_fold() {
    let sums = Stream::from_iterator(1..=10).scan(|acc, x| acc + x, 0).to_vec();
    assert_eq!(sums, vec![1, 3, 6, 10, 15, 21, 28, 36, 45, 55]);
    let total = Stream::from_iterator(1..=10).fold(|acc, x| acc + x, 0).to_vec();
    assert_eq!(total, vec![55]);
}

#[test]
fn test_deadline_cancels_throttled_stream() {
    init_logger();
    let done = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&done);
    let token = CancelToken::with_timeout(Duration::from_millis(250));
    let results = Stream::from_vec(vec![1, 2, 3, 4, 5])
        .throttle(Duration::from_millis(100))
        .with_cancel(&token)
        .when_done(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .to_vec();

    let values: Vec<i32> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    assert_eq!(values, vec![1, 2]);
    assert!(matches!(
        results.last(),
        Some(Err(StreamError::Cancelled(CancelCause::DeadlineExceeded)))
    ));
    let deadline = Instant::now() + Duration::from_secs(2);
    while done.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(done.load(Ordering::SeqCst), 1);
}

#[test]
fn test_live_token_passes_everything() {
    let token = CancelToken::new();
    let values = Stream::from_vec(vec![1, 2, 3])
        .with_cancel(&token)
        .muted()
        .to_vec();
    assert_eq!(values, vec![1, 2, 3]);
}

#[test]
fn test_kill_switch_emission_stops_stream() {
    init_logger();
    let (kill_tx, kill) = Stream::channel(1);
    let out = Stream::from_iterator(0..)
        .throttle(Duration::from_millis(5))
        .via_kill_switch(kill);
    let mut seen = Vec::new();
    for x in &out {
        seen.push(x);
        if x == 3 {
            kill_tx.send(()).unwrap();
        }
    }
    assert!(seen.len() >= 4 && seen.len() <= 6, "saw {:?}", seen);
    assert_eq!(&seen[..4], &[0, 1, 2, 3]);
}

#[test]
fn test_stream_as_cancel_token() {
    let token = to_cancel_token(
        Stream::from_vec(vec![1, 2, 3]).throttle(Duration::from_millis(20)),
    );
    assert_eq!(token.wait(), CancelCause::Cancelled);
}

#[test]
fn test_escalation_aborts_infinite_pipeline() {
    init_logger();
    let (values, escalation) = Stream::from_iterator(0u64..)
        .try_map_safe(
            |x| {
                if x == 5 {
                    Err(format!("bad record {}", x))
                } else {
                    Ok(x)
                }
            },
            4,
        )
        .expect("Map config failed")
        .escalate();
    assert_eq!(values.to_vec(), vec![0, 1, 2, 3, 4]);
    let err = escalation.join().unwrap_err();
    assert_eq!(err.to_string(), "Transform failed: bad record 5");
}

#[test]
fn test_merge_partition_roundtrip() {
    let parts = Stream::from_iterator(0..100usize)
        .partition(4, |x| *x)
        .expect("Partition config failed");
    let merged = merge(parts.into_iter().map(|p| p.map(|x| x * 2)).collect());
    let mut out = merged.to_vec();
    out.sort_unstable();
    assert_eq!(out, (0..100).map(|x| x * 2).collect::<Vec<_>>());
}

#[test]
fn test_backpressure_bounds_in_flight_elements() {
    init_logger();
    let produced = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&produced);
    let source = Stream::from_iterator((0..1000).inspect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    let out = source
        .map(|x| x + 1)
        .map_ordered(|x| x, 2)
        .expect("Map config failed");
    thread::sleep(Duration::from_millis(100));
    // nobody is reading: only the channel buffers and in-flight slots may hold elements
    assert!(produced.load(Ordering::SeqCst) < 20);
    assert_eq!(out.to_vec().len(), 1000);
}
