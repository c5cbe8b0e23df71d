//! Point-in-time snapshots.
//!
//! A snapshot is a separate store whose segments are hard links to the
//! parent's committed segments at the moment of the call. Segments that are
//! still being written live under the parent's `_tmp/` and are not linked, so
//! writes that complete later are never part of the snapshot.

use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::fs;
use tracing::{info, warn};

use super::{remove_if_exists, IoContext, RecordStructure, Result, SegmentRef, Store, StoreError};

/// Immutable view of a store's segment set.
#[derive(Debug, Clone)]
pub struct Snapshot {
    store: Store,
}

impl Snapshot {
    /// Reattach to a snapshot taken earlier, e.g. during recovery.
    pub async fn open(path: impl AsRef<Path>, structure: Arc<dyn RecordStructure>) -> Result<Self> {
        Ok(Self {
            store: Store::open(path, structure).await?,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub async fn segments(&self) -> Result<Vec<SegmentRef>> {
        self.store.segments().await
    }

    /// Release the snapshot's own links. The parent's data is untouched.
    pub async fn release(self) -> Result<()> {
        self.store.clear().await
    }
}

impl Store {
    /// Take a snapshot of this store's committed segments at `path`.
    #[tracing::instrument(skip_all, fields(store = %self.root.display(), snapshot = %path.as_ref().display()))]
    pub async fn snapshot(&self, path: impl AsRef<Path>) -> Result<Snapshot> {
        let snapshot = self.create_empty_mimic(path).await?;

        let segments = self.segments().await?;
        for segment in &segments {
            let from = self.segment_path(segment);
            let to = snapshot.segment_path(segment);
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).await.at(parent)?;
            }
            link_or_copy(&from, &to).await?;
        }

        info!(segments = segments.len(), "Took snapshot");
        Ok(Snapshot { store: snapshot })
    }

    /// Forget the segments covered by `snapshot`; they have been consumed
    /// elsewhere. Returns the number of segments removed from this store.
    #[tracing::instrument(skip_all, fields(store = %self.root.display(), snapshot = %snapshot.path().display()))]
    pub async fn delete_snapshot(&self, snapshot: &Snapshot) -> Result<usize> {
        if snapshot.store.structure.name() != self.structure.name() {
            return Err(StoreError::StructureMismatch {
                ours: self.structure.name().to_string(),
                theirs: snapshot.store.structure.name().to_string(),
            });
        }

        let mut removed = 0;
        for segment in snapshot.segments().await? {
            if remove_if_exists(&self.segment_path(&segment)).await? {
                removed += 1;
            }
        }

        info!(removed, "Deleted snapshot segments from store");
        Ok(removed)
    }
}

async fn link_or_copy(from: &Path, to: &Path) -> Result<()> {
    match fs::hard_link(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e).at(from),
        Err(e) => {
            warn!(
                segment = %from.display(),
                error = %e,
                "Hard link failed, copying segment"
            );
            fs::copy(from, to).await.at(from).map(|_| ())
        }
    }
}
