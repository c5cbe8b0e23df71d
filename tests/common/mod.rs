//! Shared utilities for integration tests.
//!
//! Builds a throwaway batch-layer root under a temp directory.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use batchlayer::config::Config;
use batchlayer::driver::BatchDriver;
use batchlayer::fact::Fact;
use batchlayer::loader::load_facts;
use batchlayer::store::{FactStructure, RecordStructure, Store};

/// A driver over stores rooted in a temp directory.
pub struct TestEnv {
    pub dir: TempDir,
    pub driver: BatchDriver,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = Config::for_root(dir.path());
        config.job.map_workers = 2;
        config.ingest.min_delay_ms = 1;
        config.ingest.max_delay_ms = 10;
        let driver = BatchDriver::new(config).expect("Invalid test config");
        Self { dir, driver }
    }

    /// Append facts to the new-data store, as a producer would.
    pub async fn produce(&self, facts: &[Fact]) {
        let new_data = self.driver.new_data().await.expect("Failed to open new data");
        load_facts(&new_data, facts)
            .await
            .expect("Failed to load facts");
    }

    pub async fn master(&self) -> Store {
        self.driver.master().await.expect("Failed to open master")
    }
}

pub fn structure() -> Arc<dyn RecordStructure> {
    Arc::new(FactStructure)
}

/// Pageview from a fixed user.
pub fn view(url: &str, at: i64, nonce: i64) -> Fact {
    Fact::page_view("1.2.3.4", url, at, nonce)
}
