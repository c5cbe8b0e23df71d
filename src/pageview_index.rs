//! Hourly pageview counts per URL.
//!
//! Every pageview fact maps to the key `"<YYYY-MM-DD> <hour> <url>"` (UTC,
//! hour not zero-padded) with a count of one; the reduce sums. The text
//! output has one `key\tcount` line per key, one `part-NNNNN` file per
//! reducer.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Timelike};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::fact::{Fact, FactKind};
use crate::mapreduce::{LocalRunner, MapReduceJob, RunnerError};
use crate::store::{Store, StoreError};
use crate::utils::metrics;

/// Errors that can occur while running the index job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("Failed to write output {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One hour of one URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HourKey {
    pub date: NaiveDate,
    pub hour: u32,
    pub url: String,
}

impl HourKey {
    /// Key for a pageview fact; `None` for any other fact, or a pageview
    /// missing its URL or timestamp.
    pub fn from_fact(fact: &Fact) -> Option<Self> {
        let url = fact.page_url()?;
        let at = DateTime::from_timestamp(fact.true_as_of()?, 0)?;
        Some(Self {
            date: at.date_naive(),
            hour: at.hour(),
            url: url.to_string(),
        })
    }
}

impl fmt::Display for HourKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.date.format("%Y-%m-%d"), self.hour, self.url)
    }
}

/// The map/reduce job.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageViewIndex;

impl MapReduceJob for PageViewIndex {
    type Input = Fact;
    type Key = HourKey;
    type Value = u64;

    fn map(&self, fact: Fact) -> Vec<(HourKey, u64)> {
        HourKey::from_fact(&fact)
            .map(|key| vec![(key, 1)])
            .unwrap_or_default()
    }

    fn reduce(&self, _key: &HourKey, counts: Vec<u64>) -> u64 {
        counts.into_iter().sum()
    }
}

/// Output row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HourlyCount {
    pub date: NaiveDate,
    pub hour: u32,
    pub url: String,
    pub count: u64,
}

impl HourlyCount {
    fn from_pair((key, count): (HourKey, u64)) -> Self {
        Self {
            date: key.date,
            hour: key.hour,
            url: key.url,
            count,
        }
    }

    pub fn key(&self) -> HourKey {
        HourKey {
            date: self.date,
            hour: self.hour,
            url: self.url.clone(),
        }
    }
}

impl fmt::Display for HourlyCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.key(), self.count)
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReport {
    pub facts_read: u64,
    pub skipped_records: u64,
    /// Decoded facts with no page URL.
    pub non_pageview: u64,
    /// Pageviews without a timestamp, or one outside the calendar range.
    pub bad_timestamp: u64,
    pub rows_out: u64,
}

/// Output of one run, grouped by reducer.
#[derive(Debug)]
pub struct IndexOutput {
    pub partitions: Vec<Vec<HourlyCount>>,
    pub report: JobReport,
}

impl IndexOutput {
    /// All rows sorted by key.
    pub fn rows(&self) -> Vec<HourlyCount> {
        let mut rows: Vec<_> = self.partitions.iter().flatten().cloned().collect();
        rows.sort_by_key(HourlyCount::key);
        rows
    }
}

/// Count pageviews in `master`'s pageview partition.
#[tracing::instrument(skip_all, fields(master = %master.path().display()))]
pub async fn run(master: &Store, runner: &LocalRunner) -> Result<IndexOutput, JobError> {
    let batch = master.read_facts(Some(FactKind::PageView)).await?;
    let facts_read = batch.facts.len() as u64;
    metrics::record_records_skipped(batch.skipped);

    let (mut non_pageview, mut bad_timestamp) = (0u64, 0u64);
    for fact in &batch.facts {
        if fact.page_url().is_none() {
            non_pageview += 1;
        } else if HourKey::from_fact(fact).is_none() {
            bad_timestamp += 1;
        }
    }
    if bad_timestamp > 0 {
        warn!(bad_timestamp, "Pageviews with unusable timestamps left out of the index");
    }

    let output = runner.run(Arc::new(PageViewIndex), batch.facts).await?;
    let report = JobReport {
        facts_read,
        skipped_records: batch.skipped,
        non_pageview,
        bad_timestamp,
        rows_out: output.stats.output_rows,
    };

    let partitions = output
        .partitions
        .into_iter()
        .map(|rows| rows.into_iter().map(HourlyCount::from_pair).collect())
        .collect();

    info!(
        facts_read = report.facts_read,
        skipped = report.skipped_records,
        non_pageview = report.non_pageview,
        bad_timestamp = report.bad_timestamp,
        rows = report.rows_out,
        "Pageview index complete"
    );
    Ok(IndexOutput { partitions, report })
}

/// One `key\tcount` line per row.
pub fn render_text(rows: &[HourlyCount]) -> String {
    rows.iter().map(|row| format!("{row}\n")).collect()
}

/// Write one `part-NNNNN` file per reducer under `dir`.
pub async fn write_text_output(dir: &Path, output: &IndexOutput) -> Result<Vec<PathBuf>, JobError> {
    tokio::fs::create_dir_all(dir).await.map_err(output_err(dir))?;

    let mut written = Vec::with_capacity(output.partitions.len());
    for (reducer, rows) in output.partitions.iter().enumerate() {
        let path = dir.join(format!("part-{reducer:05}"));
        let mut file = tokio::fs::File::create(&path).await.map_err(output_err(&path))?;
        file.write_all(render_text(rows).as_bytes())
            .await
            .map_err(output_err(&path))?;
        file.sync_all().await.map_err(output_err(&path))?;
        debug!(path = %path.display(), rows = rows.len(), "Wrote output part");
        written.push(path);
    }
    Ok(written)
}

fn output_err(path: &Path) -> impl FnOnce(std::io::Error) -> JobError {
    let path = path.to_path_buf();
    move |source| JobError::Output { path, source }
}
