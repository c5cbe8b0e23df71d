//! Retry utilities: backoff builders for ingestion cycles.
//!
//! Uses `backon` for exponential backoff with jitter.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::config::IngestConfig;

/// Backoff for whole ingestion cycles, from configuration.
///
/// `max_attempts` counts the first try, so the builder allows
/// `max_attempts - 1` retries.
pub fn ingest_backoff(config: &IngestConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(config.min_delay_ms))
        .with_max_delay(Duration::from_millis(config.max_delay_ms))
        .with_max_times(config.max_attempts.saturating_sub(1))
        .with_jitter()
}
