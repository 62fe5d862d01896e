//! Word frequency counter
//!
//! Reads lines from stdin, splits them into words, normalizes the words in
//! parallel, prints a running top-10 every 100 words and a final tally.
//!
//! Usage: cargo run --example word_count --release
//!        (Then type lines of text and press Ctrl-D to finish)

use std::collections::HashMap;
use std::io::{self, BufRead};
use std::time::Duration;
use stream_operators::Stream;

fn top_n(counts: &HashMap<String, usize>, n: usize) -> Vec<(String, usize)> {
    let mut items: Vec<_> = counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    items.into_iter().take(n).collect()
}

fn clean(word: String) -> Option<String> {
    let cleaned: String = word
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    if cleaned.len() > 2 {
        Some(cleaned)
    } else {
        None
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Word Frequency Counter");
    println!("======================");
    println!("Enter lines of text (Ctrl-D to finish):");
    println!();

    let (tx, lines) = Stream::channel(16);
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut seen = 0usize;
    let mut running: HashMap<String, usize> = HashMap::new();
    let counts = lines
        .flat_map_iter(|line| line.split_whitespace().map(String::from).collect::<Vec<_>>())
        .map_unordered(clean, 4)?
        .flat_map_iter(|word| word)
        .batch(100, Duration::from_millis(500))?
        .inspect(move |words| {
            for word in words {
                *running.entry(word.clone()).or_insert(0) += 1;
            }
            seen += words.len();
            println!("\n=== Top 10 Words (after {} words) ===", seen);
            for (i, (word, count)) in top_n(&running, 10).iter().enumerate() {
                println!("{:2}. {} ({})", i + 1, word, count);
            }
        })
        .fold(
            |mut acc: HashMap<String, usize>, words| {
                for word in words {
                    *acc.entry(word).or_insert(0) += 1;
                }
                acc
            },
            HashMap::new(),
        )
        .recv()
        .unwrap_or_default();

    println!("\n\nProcessing complete: {} distinct words", counts.len());
    Ok(())
}
