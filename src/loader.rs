//! Writing facts into the batch layer.
//!
//! Producers append to the new-data store; [`initial_import`] seeds an empty
//! master directly from a freshly written new-data store.

use tracing::info;

use crate::fact::Fact;
use crate::store::{AbsorbReport, AppendReport, Result, Store};
use crate::utils::metrics;

/// Append `facts` to `new_data` through one appender and commit them.
pub async fn load_facts<'a>(
    new_data: &Store,
    facts: impl IntoIterator<Item = &'a Fact>,
) -> Result<AppendReport> {
    let mut writer = new_data.open_writer();
    if let Err(e) = writer.append_all(facts).await {
        writer.abort().await?;
        return Err(e);
    }
    let report = writer.close().await?;

    metrics::record_facts_ingested(report.records);
    info!(
        store = %new_data.path().display(),
        records = report.records,
        segments = report.segments,
        "Loaded facts"
    );
    Ok(report)
}

/// Absorb the whole of `new_data` into `master`, consuming it.
///
/// Unlike an ingestion cycle this takes no snapshot, so producers must not
/// be writing to `new_data` at the same time.
pub async fn initial_import(master: &Store, new_data: &Store) -> Result<AbsorbReport> {
    let report = master.absorb(new_data).await?;
    info!(
        master = %master.path().display(),
        segments = report.absorbed(),
        "Initial import complete"
    );
    Ok(report)
}
