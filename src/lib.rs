//! Batchlayer - batch layer of a lambda-architecture pageview pipeline
//!
//! Immutable facts are appended to a new-data store, merged into a master
//! store by snapshot/copy/absorb cycles, counted per hour by a map/reduce
//! job, and rolled up to hour, day, week and month buckets per URL.

pub mod config;
pub mod driver;
pub mod fact;
pub mod ingest;
pub mod loader;
pub mod mapreduce;
pub mod pageview_index;
pub mod rollup;
pub mod store;
pub mod utils;
