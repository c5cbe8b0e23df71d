//! In-process job execution on the tokio blocking pool.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::debug;

use super::MapReduceJob;

/// Errors that can occur while running a job.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Invalid runner configuration: {0}")]
    InvalidConfig(String),
}

/// Counters from one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub inputs: u64,
    pub map_outputs: u64,
    /// Pairs shuffled to reducers after map-side combining.
    pub combined_outputs: u64,
    /// Distinct keys reduced.
    pub output_rows: u64,
}

/// Reduced rows, one sorted vector per reducer.
#[derive(Debug)]
pub struct JobOutput<K, V> {
    pub partitions: Vec<Vec<(K, V)>>,
    pub stats: RunStats,
}

impl<K: Ord, V> JobOutput<K, V> {
    /// All rows across reducers, sorted by key.
    pub fn into_sorted(self) -> Vec<(K, V)> {
        let mut rows: Vec<_> = self.partitions.into_iter().flatten().collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}

/// Runs jobs with a fixed number of map tasks and reduce partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalRunner {
    map_workers: usize,
    reducers: usize,
}

impl LocalRunner {
    pub fn new(map_workers: usize, reducers: usize) -> Result<Self, RunnerError> {
        if map_workers == 0 || reducers == 0 {
            return Err(RunnerError::InvalidConfig(format!(
                "map_workers ({map_workers}) and reducers ({reducers}) must be at least 1"
            )));
        }
        Ok(Self {
            map_workers,
            reducers,
        })
    }

    pub fn map_workers(&self) -> usize {
        self.map_workers
    }

    pub fn reducers(&self) -> usize {
        self.reducers
    }

    /// Reducer a key is routed to.
    pub fn partition_of<K: Hash>(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.reducers as u64) as usize
    }

    pub async fn run<J: MapReduceJob>(
        &self,
        job: Arc<J>,
        inputs: Vec<J::Input>,
    ) -> Result<JobOutput<J::Key, J::Value>, RunnerError> {
        let mut stats = RunStats {
            inputs: inputs.len() as u64,
            ..RunStats::default()
        };

        // Map + combine, one task per split.
        let mut map_tasks = Vec::with_capacity(self.map_workers);
        for split in split_evenly(inputs, self.map_workers) {
            let job = Arc::clone(&job);
            let runner = *self;
            map_tasks.push(tokio::task::spawn_blocking(move || {
                runner.map_split(job.as_ref(), split)
            }));
        }
        let mapped = futures::future::try_join_all(map_tasks).await?;

        // Shuffle.
        let mut shuffled: Vec<HashMap<J::Key, Vec<J::Value>>> =
            (0..self.reducers).map(|_| HashMap::new()).collect();
        for (partitions, map_outputs) in mapped {
            stats.map_outputs += map_outputs;
            for (reducer, pairs) in partitions.into_iter().enumerate() {
                stats.combined_outputs += pairs.len() as u64;
                for (key, value) in pairs {
                    shuffled[reducer].entry(key).or_default().push(value);
                }
            }
        }

        // Reduce, one task per partition.
        let reduce_tasks: Vec<_> = shuffled
            .into_iter()
            .map(|groups| {
                let job = Arc::clone(&job);
                tokio::task::spawn_blocking(move || {
                    let mut rows: Vec<_> = groups
                        .into_iter()
                        .map(|(key, values)| {
                            let value = job.reduce(&key, values);
                            (key, value)
                        })
                        .collect();
                    rows.sort_by(|a, b| a.0.cmp(&b.0));
                    rows
                })
            })
            .collect();
        let partitions = futures::future::try_join_all(reduce_tasks).await?;

        stats.output_rows = partitions.iter().map(|p| p.len() as u64).sum();
        debug!(
            inputs = stats.inputs,
            map_outputs = stats.map_outputs,
            combined = stats.combined_outputs,
            rows = stats.output_rows,
            "Job finished"
        );
        Ok(JobOutput { partitions, stats })
    }

    /// Map one split, combine per key, and route to reducers.
    fn map_split<J: MapReduceJob>(
        &self,
        job: &J,
        split: Vec<J::Input>,
    ) -> (Vec<Vec<(J::Key, J::Value)>>, u64) {
        let mut groups: HashMap<J::Key, Vec<J::Value>> = HashMap::new();
        let mut map_outputs = 0;
        for input in split {
            for (key, value) in job.map(input) {
                map_outputs += 1;
                groups.entry(key).or_default().push(value);
            }
        }

        let mut partitions: Vec<Vec<_>> = (0..self.reducers).map(|_| Vec::new()).collect();
        for (key, values) in groups {
            let value = job.combine(&key, values);
            partitions[self.partition_of(&key)].push((key, value));
        }
        (partitions, map_outputs)
    }
}

/// Split into at most `parts` contiguous chunks of near-equal size.
fn split_evenly<T>(mut items: Vec<T>, parts: usize) -> Vec<Vec<T>> {
    let parts = parts.clamp(1, items.len().max(1));
    let base = items.len() / parts;
    let extra = items.len() % parts;

    let mut splits = Vec::with_capacity(parts);
    for i in (0..parts).rev() {
        let len = base + usize::from(i < extra);
        let tail = items.split_off(items.len() - len);
        splits.push(tail);
    }
    splits.reverse();
    splits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_evenly_sizes() {
        let sizes: Vec<_> = split_evenly((0..10).collect(), 3)
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(sizes, vec![4, 3, 3]);
    }

    #[test]
    fn test_split_evenly_keeps_order() {
        let splits = split_evenly((0..5).collect::<Vec<_>>(), 2);
        assert_eq!(splits, vec![vec![0, 1, 2], vec![3, 4]]);
    }

    #[test]
    fn test_split_evenly_more_parts_than_items() {
        let splits = split_evenly(vec![1, 2], 8);
        assert_eq!(splits, vec![vec![1], vec![2]]);
        assert_eq!(split_evenly(Vec::<u8>::new(), 4), vec![Vec::<u8>::new()]);
    }
}
