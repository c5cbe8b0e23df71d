//! Destinations for rollup rows.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{RollupError, RollupRow};

/// Receives the final rollup rows.
#[async_trait]
pub trait RollupSink: Send + Sync {
    /// Write a batch of rows.
    async fn write(&self, rows: &[RollupRow]) -> Result<(), RollupError>;

    /// Return the sink name for logging.
    fn name(&self) -> &str;
}

/// Tab-separated rows on standard output.
#[derive(Debug, Default)]
pub struct StdoutSink;

#[async_trait]
impl RollupSink for StdoutSink {
    async fn write(&self, rows: &[RollupRow]) -> Result<(), RollupError> {
        let text: String = rows.iter().map(|row| format!("{row}\n")).collect();
        let mut stdout = tokio::io::stdout();
        stdout.write_all(text.as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Collects rows in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Mutex<Vec<RollupRow>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn rows(&self) -> Vec<RollupRow> {
        self.rows.lock().await.clone()
    }
}

#[async_trait]
impl RollupSink for MemorySink {
    async fn write(&self, rows: &[RollupRow]) -> Result<(), RollupError> {
        self.rows.lock().await.extend_from_slice(rows);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
