//! batchlayer-workflow: one batch-layer run
//!
//! Ingests the new-data store into master, normalizes URLs into the results
//! store, rolls views up per hour, day, week and month, and prints the rows
//! to stdout as `url\tgranularity\tbucket\tcount`.
//!
//! ## Configuration
//! - First argument: path to a YAML config file (optional)
//! - BATCHLAYER_CONFIG: path to a YAML config file (optional)
//! - BATCHLAYER__STORAGE__ROOT etc.: field overrides
//! - BATCHLAYER_LOG: tracing filter (default: info)

use tracing::info;

use batchlayer::config::Config;
use batchlayer::driver::BatchDriver;
use batchlayer::rollup::StdoutSink;
use batchlayer::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;
    info!(root = %config.storage.root.display(), backend = ?config.storage.backend, "batchlayer-workflow starting");

    let driver = BatchDriver::new(config)?;
    let report = driver.run(&StdoutSink).await?;

    eprintln!(
        "ingested {} segments, {} rows, {}",
        report.ingest.absorbed.absorbed(),
        report.rollup.rows_out,
        report.rollup.drops
    );
    Ok(())
}
