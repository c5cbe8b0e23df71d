//! Write-ahead journal for ingestion cycles.
//!
//! The journal is rewritten atomically after every state transition, so on
//! restart it names the last step that completed and the working paths the
//! cycle was using.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{IngestError, IngestState, Result};
use crate::store::{read_json, remove_if_exists, write_json_atomic};

/// File name of the journal under the temp root.
pub const JOURNAL_FILE: &str = "ingest.journal.json";

/// Persisted position of an ingestion cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestJournal {
    pub state: IngestState,
    pub snapshot: PathBuf,
    pub copy: PathBuf,
    pub updated_at: String,
}

impl IngestJournal {
    pub fn new(snapshot: PathBuf, copy: PathBuf) -> Self {
        Self {
            state: IngestState::Start,
            snapshot,
            copy,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Move to `state` and persist.
    pub async fn advance(&mut self, path: &Path, state: IngestState) -> Result<()> {
        self.state = state;
        self.updated_at = chrono::Utc::now().to_rfc3339();
        save(path, self).await
    }
}

pub async fn load(path: &Path) -> Result<Option<IngestJournal>> {
    read_json(path).await.map_err(IngestError::Journal)
}

pub async fn save(path: &Path, journal: &IngestJournal) -> Result<()> {
    write_json_atomic(path, journal)
        .await
        .map_err(IngestError::Journal)
}

pub async fn remove(path: &Path) -> Result<()> {
    remove_if_exists(path)
        .await
        .map(|_| ())
        .map_err(IngestError::Journal)
}
