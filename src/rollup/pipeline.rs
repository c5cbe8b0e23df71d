//! Store-to-sink rollup stages.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use super::{
    extract, fan_out, hour_bucket, normalize_url, replace_url, DropCounters, Granularity,
    RollupError, RollupReport, RollupSink,
};
use crate::fact::Fact;
use crate::mapreduce::{LocalRunner, MapReduceJob};
use crate::store::Store;
use crate::utils::metrics;

/// Name of the normalized result store under the results root.
pub const NORMALIZED_BY_URL: &str = "normalized-by-url";

/// Views of one URL in one hour bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HourCount {
    pub url: String,
    pub hour_bucket: i64,
    pub count: u64,
}

/// Views of one URL in one bucket of one granularity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupRow {
    pub url: String,
    pub granularity: Granularity,
    pub bucket: i64,
    pub count: u64,
}

impl fmt::Display for RollupRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}",
            self.url, self.granularity, self.bucket, self.count
        )
    }
}

// ============================================================================
// Normalize
// ============================================================================

/// Extract, Normalize and Replace over in-memory facts.
///
/// Non-pageview facts and pageviews with malformed URLs are counted and
/// left out of the result.
pub fn normalize_facts(facts: Vec<Fact>, counters: &DropCounters) -> Vec<Fact> {
    facts
        .into_iter()
        .filter_map(|fact| {
            let Some(view) = extract(&fact) else {
                counters.add_non_pageview();
                return None;
            };
            match normalize_url(&view.url) {
                Ok(normalized) => Some(replace_url(fact, normalized)),
                Err(e) => {
                    debug!(error = %e, "Dropping pageview with malformed URL");
                    counters.add_malformed_url();
                    None
                }
            }
        })
        .collect()
}

/// Write the normalized form of every pageview in `master` to `out`.
///
/// Returns `(facts read, facts written)`.
#[tracing::instrument(skip_all, fields(master = %master.path().display(), out = %out.path().display()))]
pub async fn normalize_urls(
    master: &Store,
    out: &Store,
    counters: &DropCounters,
) -> Result<(u64, u64), RollupError> {
    let batch = master.read_facts(None).await?;
    counters.add_skipped(batch.skipped);
    let read = batch.facts.len() as u64;

    let normalized = normalize_facts(batch.facts, counters);
    let mut writer = out.open_writer();
    if let Err(e) = writer.append_all(&normalized).await {
        writer.abort().await?;
        return Err(e.into());
    }
    let written = writer.close().await?.records;

    info!(read, written, "Normalized URLs");
    Ok((read, written))
}

// ============================================================================
// Rollups
// ============================================================================

/// Count views per `(url, hour bucket)`.
struct HourlyRollup {
    counters: Arc<DropCounters>,
}

impl MapReduceJob for HourlyRollup {
    type Input = Fact;
    type Key = (String, i64);
    type Value = u64;

    fn map(&self, fact: Fact) -> Vec<((String, i64), u64)> {
        match extract(&fact) {
            Some(view) => vec![((view.url, hour_bucket(view.time)), 1)],
            None => {
                self.counters.add_non_pageview();
                Vec::new()
            }
        }
    }

    fn reduce(&self, _key: &(String, i64), counts: Vec<u64>) -> u64 {
        counts.into_iter().sum()
    }
}

/// Fan hour counts out to every granularity and sum per bucket.
struct GranularityRollup;

impl MapReduceJob for GranularityRollup {
    type Input = HourCount;
    type Key = (String, Granularity, i64);
    type Value = u64;

    fn map(&self, row: HourCount) -> Vec<((String, Granularity, i64), u64)> {
        fan_out(row.hour_bucket)
            .into_iter()
            .map(|(granularity, bucket)| ((row.url.clone(), granularity, bucket), row.count))
            .collect()
    }

    fn reduce(&self, _key: &(String, Granularity, i64), counts: Vec<u64>) -> u64 {
        counts.into_iter().sum()
    }
}

/// Hourly rollup over in-memory facts, sorted by `(url, hour bucket)`.
pub async fn hourly_rollup(
    facts: Vec<Fact>,
    runner: &LocalRunner,
    counters: Arc<DropCounters>,
) -> Result<Vec<HourCount>, RollupError> {
    let output = runner.run(Arc::new(HourlyRollup { counters }), facts).await?;
    Ok(output
        .into_sorted()
        .into_iter()
        .map(|((url, hour_bucket), count)| HourCount {
            url,
            hour_bucket,
            count,
        })
        .collect())
}

/// Granularity rollup, sorted by `(url, granularity, bucket)`.
pub async fn granularity_rollup(
    hourly: Vec<HourCount>,
    runner: &LocalRunner,
) -> Result<Vec<RollupRow>, RollupError> {
    let output = runner.run(Arc::new(GranularityRollup), hourly).await?;
    let rows: Vec<_> = output
        .into_sorted()
        .into_iter()
        .map(|((url, granularity, bucket), count)| RollupRow {
            url,
            granularity,
            bucket,
            count,
        })
        .collect();

    for granularity in Granularity::ALL {
        let n = rows.iter().filter(|r| r.granularity == granularity).count();
        metrics::record_rollup_rows(granularity.tag(), n as u64);
    }
    Ok(rows)
}

/// Hourly then granularity rollup over a normalized store.
#[tracing::instrument(skip_all, fields(store = %normalized.path().display()))]
pub async fn views_per_hour(
    normalized: &Store,
    runner: &LocalRunner,
    counters: Arc<DropCounters>,
) -> Result<(Vec<HourCount>, Vec<RollupRow>), RollupError> {
    let batch = normalized.read_facts(None).await?;
    counters.add_skipped(batch.skipped);

    let hourly = hourly_rollup(batch.facts, runner, counters).await?;
    let rows = granularity_rollup(hourly.clone(), runner).await?;

    info!(hourly = hourly.len(), rows = rows.len(), "Rolled up views");
    Ok((hourly, rows))
}

/// Rows of a finished rollup that have not been written anywhere yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupOutput {
    pub rows: Vec<RollupRow>,
    pub report: RollupReport,
}

/// Normalize `master` into `out` and roll it up, without sinking the rows.
///
/// `out` is cleared first so a rerun never mixes results.
pub async fn compute(
    master: &Store,
    out: &Store,
    runner: &LocalRunner,
) -> Result<RollupOutput, RollupError> {
    let counters = Arc::new(DropCounters::new());

    out.clear().await?;
    let out = master.create_empty_mimic(out.path()).await?;

    let (facts_read, normalized) = normalize_urls(master, &out, &counters).await?;
    let (hourly, rows) = views_per_hour(&out, runner, Arc::clone(&counters)).await?;

    let report = RollupReport {
        facts_read,
        normalized,
        hourly_rows: hourly.len() as u64,
        rows_out: rows.len() as u64,
        drops: counters.summary(),
    };
    Ok(RollupOutput { rows, report })
}

/// Write computed rows to `sink`.
pub async fn publish(output: &RollupOutput, sink: &dyn RollupSink) -> Result<(), RollupError> {
    sink.write(&output.rows).await?;
    info!(
        sink = sink.name(),
        rows = output.report.rows_out,
        drops = %output.report.drops,
        "Rollup complete"
    );
    Ok(())
}

/// [`compute`] then [`publish`].
pub async fn run(
    master: &Store,
    out: &Store,
    runner: &LocalRunner,
    sink: &dyn RollupSink,
) -> Result<RollupReport, RollupError> {
    let output = compute(master, out, runner).await?;
    publish(&output, sink).await?;
    Ok(output.report)
}
