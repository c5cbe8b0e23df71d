//! batchlayer-pageview-index: hourly pageview counts
//!
//! Counts master's pageviews per `(date, hour, url)` and writes
//! `part-NNNNN` text files under a fresh `pageview-count-<uuid>` directory
//! in the temp root.
//!
//! ## Configuration
//! Same sources as batchlayer-workflow.

use tracing::info;

use batchlayer::config::Config;
use batchlayer::driver::BatchDriver;
use batchlayer::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;
    let driver = BatchDriver::new(config)?;

    let (output, dir) = driver.run_pageview_index().await?;
    info!(
        reducers = output.partitions.len(),
        facts = output.report.facts_read,
        skipped = output.report.skipped_records,
        "batchlayer-pageview-index finished"
    );
    println!("{}", dir.display());
    Ok(())
}
