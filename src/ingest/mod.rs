//! Ingestion: moving buffered facts into the master store exactly once.
//!
//! A cycle walks a fixed state machine:
//!
//! ```text
//! START -> SNAPSHOTTED -> CLONED -> ABSORBED -> SNAPSHOT_RELEASED
//! ```
//!
//! 1. snapshot the new-data store, fixing the set of segments this cycle owns
//! 2. copy the snapshot into an independent temporary store
//! 3. absorb the copy into master
//! 4. tell the new-data store to forget the snapshot's segments
//! 5. release the snapshot
//!
//! Producers keep appending to the new-data store throughout; anything they
//! commit after step 1 is left for the next cycle. The state is journaled
//! after each step so [`IngestionWorkflow::recover`] can finish or discard an
//! interrupted cycle without ingesting a segment twice.

mod journal;

pub use journal::{IngestJournal, JOURNAL_FILE};

use std::path::PathBuf;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::TempPaths;
use crate::store::{AbsorbReport, Snapshot, Store, StoreError};

/// Errors that can occur during ingestion.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ingestion journal error: {0}")]
    Journal(#[source] StoreError),
}

impl IngestError {
    /// Whether a fresh cycle may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::Store(e) | IngestError::Journal(e) => e.is_retryable(),
        }
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Last completed step of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    Start,
    Snapshotted,
    Cloned,
    Absorbed,
    SnapshotReleased,
}

/// Outcome of one ingestion cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Segments captured by the snapshot.
    pub snapshot_segments: usize,
    /// Segments copied into the temporary store.
    pub copied: usize,
    pub absorbed: AbsorbReport,
    /// Segments the new-data store forgot.
    pub released: usize,
}

/// Moves facts from a new-data store into a master store.
#[derive(Debug, Clone)]
pub struct IngestionWorkflow {
    master: Store,
    new_data: Store,
    temp: TempPaths,
}

impl IngestionWorkflow {
    pub fn new(master: Store, new_data: Store, temp: TempPaths) -> Self {
        Self {
            master,
            new_data,
            temp,
        }
    }

    pub fn master(&self) -> &Store {
        &self.master
    }

    pub fn new_data(&self) -> &Store {
        &self.new_data
    }

    pub fn journal_path(&self) -> PathBuf {
        self.temp.root().join(JOURNAL_FILE)
    }

    /// Run one full cycle, first finishing any cycle a crash interrupted.
    #[tracing::instrument(skip_all, fields(master = %self.master.path().display()))]
    pub async fn run_cycle(&self) -> Result<IngestReport> {
        self.recover().await?;

        let journal_path = self.journal_path();
        let mut journal = IngestJournal::new(self.temp.fresh("snapshot"), self.temp.fresh("copy"));
        journal::save(&journal_path, &journal).await?;

        let snapshot = self.new_data.snapshot(&journal.snapshot).await?;
        let snapshot_segments = snapshot.segments().await?.len();
        journal
            .advance(&journal_path, IngestState::Snapshotted)
            .await?;

        let copy = snapshot.store().create_empty_mimic(&journal.copy).await?;
        let copied = copy.copy_append(snapshot.store()).await?;
        journal.advance(&journal_path, IngestState::Cloned).await?;

        let absorbed = self.master.absorb(&copy).await?;
        journal.advance(&journal_path, IngestState::Absorbed).await?;

        let released = self.release(&snapshot, &mut journal).await?;

        let report = IngestReport {
            snapshot_segments,
            copied,
            absorbed,
            released,
        };
        info!(
            snapshot_segments,
            copied,
            absorbed = absorbed.absorbed(),
            released,
            "Ingestion cycle complete"
        );
        Ok(report)
    }

    /// Finish or discard a cycle left behind by a crash.
    ///
    /// Returns the journaled state that was recovered from, or `None` if no
    /// cycle was in flight. Cycles that had not yet produced a full copy are
    /// discarded: the new-data store still holds every segment. Later cycles
    /// are rolled forward.
    pub async fn recover(&self) -> Result<Option<IngestState>> {
        let journal_path = self.journal_path();
        let Some(mut journal) = journal::load(&journal_path).await? else {
            return Ok(None);
        };
        let found = journal.state;
        warn!(state = ?found, "Recovering interrupted ingestion cycle");

        match found {
            IngestState::Start | IngestState::Snapshotted => {
                self.discard(&journal).await?;
                journal::remove(&journal_path).await?;
            }
            IngestState::Cloned | IngestState::Absorbed => {
                self.master.recover_absorbs().await?;
                if found == IngestState::Cloned && Store::exists(&journal.copy).await? {
                    let copy =
                        Store::open(&journal.copy, self.master.structure().clone()).await?;
                    self.master.absorb(&copy).await?;
                }
                journal
                    .advance(&journal_path, IngestState::Absorbed)
                    .await?;

                let snapshot =
                    Snapshot::open(&journal.snapshot, self.new_data.structure().clone()).await?;
                self.release(&snapshot, &mut journal).await?;
            }
            IngestState::SnapshotReleased => {
                self.discard(&journal).await?;
                journal::remove(&journal_path).await?;
            }
        }

        Ok(Some(found))
    }

    /// Run cycles until one succeeds or the backoff gives up.
    ///
    /// Each attempt recovers the previous one first and uses fresh temp paths.
    pub async fn run_with_retry(&self, backoff: ExponentialBuilder) -> Result<IngestReport> {
        (|| async { self.run_cycle().await })
            .retry(backoff)
            .when(|e: &IngestError| e.is_retryable())
            .notify(|e: &IngestError, delay: Duration| {
                warn!(error = %e, delay = ?delay, "Ingestion cycle failed, retrying");
            })
            .await
    }

    /// Steps 4 and 5: forget the snapshot's segments, then drop the snapshot.
    async fn release(&self, snapshot: &Snapshot, journal: &mut IngestJournal) -> Result<usize> {
        let journal_path = self.journal_path();

        let released = self.new_data.delete_snapshot(snapshot).await?;
        journal
            .advance(&journal_path, IngestState::SnapshotReleased)
            .await?;

        snapshot.store().clear().await?;
        journal::remove(&journal_path).await?;
        Ok(released)
    }

    async fn discard(&self, journal: &IngestJournal) -> Result<()> {
        for path in [&journal.snapshot, &journal.copy] {
            match tokio::fs::remove_dir_all(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(StoreError::Io {
                        path: path.clone(),
                        source,
                    }
                    .into())
                }
            }
        }
        Ok(())
    }
}

/// Run one cycle with retries configured by `backoff`.
pub async fn ingest_with_retry(
    workflow: &IngestionWorkflow,
    backoff: ExponentialBuilder,
) -> Result<IngestReport> {
    workflow.run_with_retry(backoff).await
}

#[cfg(test)]
mod tests;
