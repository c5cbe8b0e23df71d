//! Batch job driver: ingest, normalize, roll up.
//!
//! The driver owns the configuration, opens the long-lived stores, and
//! enforces the undecodable-record threshold that the core jobs only count.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use crate::config::{Config, ConfigError, StoragePaths};
use crate::ingest::{ingest_with_retry, IngestError, IngestReport, IngestionWorkflow};
use crate::mapreduce::{LocalRunner, RunnerError};
use crate::pageview_index::{self, IndexOutput, JobError};
use crate::rollup::{self, RollupError, RollupReport, RollupSink, NORMALIZED_BY_URL};
use crate::store::{FactStructure, RecordStructure, Store, StoreError};
use crate::utils::retry::ingest_backoff;

/// Errors that end a driver run.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ingestion failed: {0}")]
    Ingest(#[from] IngestError),

    #[error("Rollup failed: {0}")]
    Rollup(#[from] RollupError),

    #[error("Pageview index failed: {0}")]
    Job(#[from] JobError),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("{skipped} of {total} records undecodable, above threshold {threshold}")]
    SkipThresholdExceeded {
        skipped: u64,
        total: u64,
        threshold: f64,
    },
}

/// Outcome of a full workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowReport {
    pub ingest: IngestReport,
    pub rollup: RollupReport,
}

/// Runs batch-layer jobs against the stores named by a [`Config`].
#[derive(Clone)]
pub struct BatchDriver {
    config: Config,
    paths: StoragePaths,
    structure: Arc<dyn RecordStructure>,
}

impl std::fmt::Debug for BatchDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDriver")
            .field("paths", &self.paths)
            .field("job", &self.config.job)
            .field("structure", &self.structure.name())
            .finish()
    }
}

impl BatchDriver {
    pub fn new(config: Config) -> Result<Self, DriverError> {
        config.validate()?;
        Ok(Self {
            paths: config.storage.paths(),
            config,
            structure: Arc::new(FactStructure),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn runner(&self) -> Result<LocalRunner, DriverError> {
        Ok(LocalRunner::new(
            self.config.job.map_workers,
            self.config.job.reducers,
        )?)
    }

    pub async fn master(&self) -> Result<Store, DriverError> {
        Ok(Store::create(&self.paths.master, Arc::clone(&self.structure)).await?)
    }

    pub async fn new_data(&self) -> Result<Store, DriverError> {
        Ok(Store::create(&self.paths.new_data, Arc::clone(&self.structure)).await?)
    }

    /// One ingestion cycle with retries.
    pub async fn ingest(&self) -> Result<IngestReport, DriverError> {
        let master = self.master().await?;
        // Absorbs outside an ingestion cycle, like an interrupted
        // initial_import, leave a marker but no journal.
        master.recover_absorbs().await?;
        let workflow =
            IngestionWorkflow::new(master, self.new_data().await?, self.paths.temp_paths());
        Ok(ingest_with_retry(&workflow, ingest_backoff(&self.config.ingest)).await?)
    }

    /// Ingest, normalize URLs, roll up views, and write the rows to `sink`.
    #[tracing::instrument(skip_all, fields(root = %self.config.storage.root.display()))]
    pub async fn run(&self, sink: &dyn RollupSink) -> Result<WorkflowReport, DriverError> {
        let ingest = self.ingest().await?;

        let master = self.master().await?;
        let out = Store::create(
            self.paths.results.join(NORMALIZED_BY_URL),
            Arc::clone(&self.structure),
        )
        .await?;
        let output = rollup::compute(&master, &out, &self.runner()?).await?;

        let drops = output.report.drops;
        self.check_skip_ratio(
            drops.skipped_records,
            output.report.facts_read + drops.skipped_records,
        )?;
        rollup::publish(&output, sink).await?;
        let rollup = output.report;

        info!(
            absorbed = ingest.absorbed.absorbed(),
            rows = rollup.rows_out,
            drops = %drops,
            "Batch workflow complete"
        );
        Ok(WorkflowReport { ingest, rollup })
    }

    /// Run the hourly pageview index over master and write its text output
    /// to a fresh directory under the temp root.
    pub async fn run_pageview_index(&self) -> Result<(IndexOutput, PathBuf), DriverError> {
        let master = self.master().await?;
        let output = pageview_index::run(&master, &self.runner()?).await?;

        let report = output.report;
        self.check_skip_ratio(
            report.skipped_records,
            report.facts_read + report.skipped_records,
        )?;

        let dir = self.paths.temp_paths().fresh("pageview-count");
        pageview_index::write_text_output(&dir, &output).await?;
        info!(output = %dir.display(), rows = report.rows_out, "Wrote pageview index");
        Ok((output, dir))
    }

    fn check_skip_ratio(&self, skipped: u64, total: u64) -> Result<(), DriverError> {
        check_skip_ratio(skipped, total, self.config.job.skip_ratio_threshold)
    }
}

/// Fail when more than `threshold` of `total` records were undecodable.
pub fn check_skip_ratio(skipped: u64, total: u64, threshold: f64) -> Result<(), DriverError> {
    if total == 0 {
        return Ok(());
    }
    let ratio = skipped as f64 / total as f64;
    if ratio > threshold {
        error!(skipped, total, threshold, "Too many undecodable records");
        return Err(DriverError::SkipThresholdExceeded {
            skipped,
            total,
            threshold,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_ratio_at_threshold_passes() {
        check_skip_ratio(1, 100, 0.01).unwrap();
        check_skip_ratio(0, 0, 0.0).unwrap();
    }

    #[test]
    fn test_skip_ratio_above_threshold_fails() {
        let err = check_skip_ratio(2, 100, 0.01).unwrap_err();
        assert!(matches!(
            err,
            DriverError::SkipThresholdExceeded {
                skipped: 2,
                total: 100,
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.job.reducers = 0;
        assert!(matches!(
            BatchDriver::new(config),
            Err(DriverError::Config(_))
        ));
    }
}
