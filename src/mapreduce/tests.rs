use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;

/// Counts words; `combine` is the default (reduce).
struct WordCount;

impl MapReduceJob for WordCount {
    type Input = String;
    type Key = String;
    type Value = u64;

    fn map(&self, input: String) -> Vec<(String, u64)> {
        input
            .split_whitespace()
            .map(|w| (w.to_string(), 1))
            .collect()
    }

    fn reduce(&self, _key: &String, values: Vec<u64>) -> u64 {
        values.into_iter().sum()
    }
}

fn corpus(seed: u64, lines: usize) -> Vec<String> {
    let words = ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"];
    let mut rng = StdRng::seed_from_u64(seed);
    (0..lines)
        .map(|_| {
            let n = rng.random_range(0..8);
            (0..n)
                .map(|_| words[rng.random_range(0..words.len())])
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

#[tokio::test]
async fn test_word_count() {
    let runner = LocalRunner::new(2, 2).unwrap();
    let inputs = vec!["a b a".to_string(), "b c".to_string(), String::new()];

    let output = runner.run(Arc::new(WordCount), inputs).await.unwrap();
    assert_eq!(output.stats.inputs, 3);
    assert_eq!(output.stats.map_outputs, 5);
    assert_eq!(output.stats.output_rows, 3);
    assert_eq!(
        output.into_sorted(),
        vec![
            ("a".to_string(), 2),
            ("b".to_string(), 2),
            ("c".to_string(), 1)
        ]
    );
}

#[tokio::test]
async fn test_result_independent_of_parallelism() {
    let inputs = corpus(7, 500);
    let baseline = LocalRunner::new(1, 1)
        .unwrap()
        .run(Arc::new(WordCount), inputs.clone())
        .await
        .unwrap()
        .into_sorted();

    for (workers, reducers) in [(2, 1), (3, 3), (8, 5), (64, 2)] {
        let runner = LocalRunner::new(workers, reducers).unwrap();
        let rows = runner
            .run(Arc::new(WordCount), inputs.clone())
            .await
            .unwrap()
            .into_sorted();
        assert_eq!(rows, baseline, "workers={workers} reducers={reducers}");
    }
}

#[tokio::test]
async fn test_keys_spread_across_reducers() {
    let runner = LocalRunner::new(2, 3).unwrap();
    let inputs: Vec<_> = (0..100).map(|i| format!("key{i}")).collect();

    let output = runner.run(Arc::new(WordCount), inputs).await.unwrap();

    assert_eq!(output.partitions.len(), 3);
    assert!(output.partitions.iter().all(|p| !p.is_empty()));
    for (reducer, rows) in output.partitions.iter().enumerate() {
        assert!(rows.windows(2).all(|w| w[0].0 < w[1].0));
        assert!(rows.iter().all(|(k, _)| runner.partition_of(k) == reducer));
    }
}

#[tokio::test]
async fn test_combine_reduces_shuffle() {
    let runner = LocalRunner::new(1, 1).unwrap();
    let inputs = vec!["x x x x".to_string(), "x x".to_string()];

    let output = runner.run(Arc::new(WordCount), inputs).await.unwrap();
    assert_eq!(output.stats.map_outputs, 6);
    assert_eq!(output.stats.combined_outputs, 1);
}

#[tokio::test]
async fn test_empty_input() {
    let runner = LocalRunner::new(4, 3).unwrap();
    let output = runner.run(Arc::new(WordCount), Vec::new()).await.unwrap();
    assert_eq!(output.partitions.len(), 3);
    assert!(output.into_sorted().is_empty());
}

#[test]
fn test_zero_reducers_rejected() {
    assert!(matches!(
        LocalRunner::new(1, 0),
        Err(RunnerError::InvalidConfig(_))
    ));
}
