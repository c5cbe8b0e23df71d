//! Map/combine/reduce over in-memory inputs.
//!
//! A [`MapReduceJob`] describes the per-record and per-key logic; a
//! [`LocalRunner`] executes it with parallel map tasks, a per-task combine,
//! a hash shuffle across reducers and parallel reduce tasks.
//!
//! Results are independent of how many map workers and reducers run as long
//! as `reduce` (and `combine`) are commutative and associative.

mod runner;

pub use runner::{JobOutput, LocalRunner, RunStats, RunnerError};

use std::hash::Hash;

/// Logic of a map/reduce job.
pub trait MapReduceJob: Send + Sync + 'static {
    type Input: Send + 'static;
    type Key: Hash + Eq + Ord + Clone + Send + 'static;
    type Value: Send + 'static;

    /// Zero or more key/value pairs for one input.
    fn map(&self, input: Self::Input) -> Vec<(Self::Key, Self::Value)>;

    /// Fold all values seen for `key` into one.
    fn reduce(&self, key: &Self::Key, values: Vec<Self::Value>) -> Self::Value;

    /// Map-side pre-aggregation. Must agree with `reduce`.
    fn combine(&self, key: &Self::Key, values: Vec<Self::Value>) -> Self::Value {
        self.reduce(key, values)
    }
}

#[cfg(test)]
mod tests;
