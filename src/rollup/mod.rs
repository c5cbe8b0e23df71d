//! URL normalization and multi-granularity pageview rollups.
//!
//! ```text
//! master --Extract--Normalize--Replace--> normalized-by-url
//! normalized-by-url --Extract--HourBucket--count--> (url, hour, n)
//!     --FanOut--> (url, h|d|w|m, bucket, n) --sum--> sink
//! ```
//!
//! Records are never dropped silently: undecodable records, non-pageview
//! facts and malformed URLs each increment a [`DropCounters`] field.

mod extract;
mod granularity;
mod normalize;
mod pipeline;
mod sink;

pub use extract::{extract, PageView};
pub use granularity::{
    fan_out, hour_bucket, Granularity, DAYS_PER_MONTH, DAYS_PER_WEEK, HOURS_PER_DAY,
    SECONDS_PER_HOUR,
};
pub use normalize::{normalize_url, replace_url, MalformedUrl};
pub use pipeline::{
    compute, granularity_rollup, hourly_rollup, normalize_facts, normalize_urls, publish, run,
    views_per_hour, HourCount, RollupOutput, RollupRow, NORMALIZED_BY_URL,
};
pub use sink::{MemorySink, RollupSink, StdoutSink};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::mapreduce::RunnerError;
use crate::store::StoreError;

/// Errors that can occur while running the rollup pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RollupError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("Sink error: {0}")]
    Sink(#[from] std::io::Error),
}

/// Per-run drop accounting, shared by concurrent stages.
#[derive(Debug, Default)]
pub struct DropCounters {
    malformed_urls: AtomicU64,
    skipped_records: AtomicU64,
    non_pageview: AtomicU64,
}

impl DropCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_malformed_url(&self) {
        self.malformed_urls.fetch_add(1, Ordering::Relaxed);
        crate::utils::metrics::record_urls_dropped(1);
    }

    pub fn add_skipped(&self, count: u64) {
        self.skipped_records.fetch_add(count, Ordering::Relaxed);
        crate::utils::metrics::record_records_skipped(count);
    }

    pub fn add_non_pageview(&self) {
        self.non_pageview.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> DropSummary {
        DropSummary {
            malformed_urls: self.malformed_urls.load(Ordering::Relaxed),
            skipped_records: self.skipped_records.load(Ordering::Relaxed),
            non_pageview: self.non_pageview.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`DropCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropSummary {
    pub malformed_urls: u64,
    pub skipped_records: u64,
    pub non_pageview: u64,
}

impl DropSummary {
    pub fn total(&self) -> u64 {
        self.malformed_urls + self.skipped_records + self.non_pageview
    }
}

impl fmt::Display for DropSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dropped: {} malformed url, {} undecodable, {} non-pageview",
            self.malformed_urls, self.skipped_records, self.non_pageview
        )
    }
}

/// Outcome of a full rollup run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollupReport {
    /// Facts decoded from master.
    pub facts_read: u64,
    /// Facts written to the normalized store.
    pub normalized: u64,
    pub hourly_rows: u64,
    pub rows_out: u64,
    pub drops: DropSummary,
}
