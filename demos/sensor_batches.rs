//! Sensor ingestion demo
//!
//! A simulated sensor emits readings with jittered timing. Readings are
//! batched by payload size, enriched in parallel (a few enrichments fail),
//! and a sliding window tracks the latest batch sizes. The whole pipeline
//! runs under a two second deadline.
//!
//! Usage: cargo run --example sensor_batches --release

use std::time::Duration;
use stream_operators::{
    BatchLimits, CancelToken, OverflowPolicy, SafeMap, StageMetrics, Stream, WeightedBatch,
    WindowConfig,
};

#[derive(Debug, Clone)]
struct Reading {
    sensor: u32,
    payload: Vec<u8>,
}

fn enrich(batch: Vec<Reading>) -> Result<(usize, usize), String> {
    let bytes: usize = batch.iter().map(|r| r.payload.len()).sum();
    if batch.iter().any(|r| r.sensor == 13) {
        return Err(format!("sensor 13 is quarantined ({} readings lost)", batch.len()));
    }
    Ok((batch.len(), bytes))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let deadline = CancelToken::with_timeout(Duration::from_secs(2));
    let batch_metrics = StageMetrics::new();
    let map_metrics = StageMetrics::new();

    let readings = Stream::from_iterator((0..u32::MAX).map(|i| Reading {
        sensor: i % 17,
        payload: vec![0u8; (i as usize * 31) % 200],
    }))
    .jitter(Duration::from_millis(2));

    let batches = readings.via(
        WeightedBatch::new(
            |r: &Reading| r.payload.len(),
            BatchLimits::new(1024, 32, Duration::from_millis(100)),
        )?
        .with_cancel(deadline.clone())
        .with_metrics(batch_metrics.clone()),
    );

    let summaries = batches
        .via(SafeMap::ordered(enrich, 4)?.with_metrics(map_metrics.clone()))
        .catch(|e| eprintln!("enrichment failed: {}", e));

    let window = WindowConfig::default()
        .with_max_size(5)
        .with_overflow(OverflowPolicy::DropHead);
    for snapshot in summaries.sliding_window(window)?.muted() {
        let total: usize = snapshot.iter().map(|(_, bytes)| bytes).sum();
        println!(
            "last {} batches: {} bytes, newest has {} readings",
            snapshot.len(),
            total,
            snapshot.last().map(|(n, _)| *n).unwrap_or(0)
        );
    }

    println!("\nstopped: {:?}", deadline.cause());
    println!("batch stage: {}", batch_metrics.snapshot().format());
    println!("enrich stage: {}", map_metrics.snapshot().format());
    Ok(())
}
