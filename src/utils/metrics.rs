//! OTel-native metrics instruments.
//!
//! Instruments are lazily initialized and only exist with the `otel` feature.
//! The `record_*` helpers are always callable and compile to nothing without
//! it, so call sites stay free of `cfg` attributes.
//!
//! Naming follows OTel semantic conventions (dot-separated).

#[cfg(feature = "otel")]
mod instruments {
    use std::sync::LazyLock;

    use opentelemetry::global;
    use opentelemetry::metrics::{Counter, Meter};

    static METER: LazyLock<Meter> = LazyLock::new(|| global::meter("batchlayer"));

    // ========================================================================
    // Store / Ingestion
    // ========================================================================

    /// Facts appended to a new-data store.
    pub static FACTS_INGESTED_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
        METER
            .u64_counter("batchlayer.ingest.facts.total")
            .with_description("Facts appended to the new-data store")
            .build()
    });

    /// Segments renamed into a destination store by absorb.
    pub static SEGMENTS_ABSORBED_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
        METER
            .u64_counter("batchlayer.store.absorbed.segments.total")
            .with_description("Segments moved by absorb")
            .build()
    });

    // ========================================================================
    // Jobs
    // ========================================================================

    /// Records skipped because they failed to decode.
    pub static RECORDS_SKIPPED_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
        METER
            .u64_counter("batchlayer.job.skipped.total")
            .with_description("Undecodable records skipped by batch jobs")
            .build()
    });

    /// URLs dropped by normalization.
    pub static URLS_DROPPED_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
        METER
            .u64_counter("batchlayer.rollup.malformed_url.total")
            .with_description("Pageviews dropped for malformed URLs")
            .build()
    });

    /// Rollup rows emitted, labelled by granularity.
    pub static ROLLUP_ROWS_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
        METER
            .u64_counter("batchlayer.rollup.rows.total")
            .with_description("Rows emitted by the granularity rollup")
            .build()
    });
}

#[cfg(feature = "otel")]
pub use instruments::*;

#[cfg(feature = "otel")]
use opentelemetry::KeyValue;

/// Create a granularity label.
#[cfg(feature = "otel")]
pub fn granularity_attr(granularity: &str) -> KeyValue {
    KeyValue::new("granularity", granularity.to_string())
}

pub fn record_facts_ingested(count: u64) {
    #[cfg(feature = "otel")]
    FACTS_INGESTED_TOTAL.add(count, &[]);
    #[cfg(not(feature = "otel"))]
    let _ = count;
}

pub fn record_segments_absorbed(count: usize) {
    #[cfg(feature = "otel")]
    SEGMENTS_ABSORBED_TOTAL.add(count as u64, &[]);
    #[cfg(not(feature = "otel"))]
    let _ = count;
}

pub fn record_records_skipped(count: u64) {
    #[cfg(feature = "otel")]
    RECORDS_SKIPPED_TOTAL.add(count, &[]);
    #[cfg(not(feature = "otel"))]
    let _ = count;
}

pub fn record_urls_dropped(count: u64) {
    #[cfg(feature = "otel")]
    URLS_DROPPED_TOTAL.add(count, &[]);
    #[cfg(not(feature = "otel"))]
    let _ = count;
}

pub fn record_rollup_rows(granularity: &str, count: u64) {
    #[cfg(feature = "otel")]
    ROLLUP_ROWS_TOTAL.add(count, &[granularity_attr(granularity)]);
    #[cfg(not(feature = "otel"))]
    let _ = (granularity, count);
}
