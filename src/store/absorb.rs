//! Segment-level merge of one store into another.
//!
//! An absorb renames every segment of the source into the destination. Before
//! the first rename, the full move plan is written to
//! `{dest}/_absorb/{id}.json`, where `id` is derived from the source path.
//! The marker makes the merge restartable:
//!
//! - a move whose source file is gone and whose target exists already happened
//! - a move whose source file exists and whose target does not is still pending
//! - both present is a collision and is never overwritten
//!
//! Re-running `absorb` with the same source, or calling `recover_absorbs` on
//! the destination, rolls an interrupted merge forward.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    read_json, remove_if_exists, write_json_atomic, IoContext, Result, Store, StoreError,
    ABSORB_DIR,
};

/// One planned segment rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsorbMove {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// Write-ahead record of an absorb in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsorbMarker {
    /// Root of the store being absorbed.
    pub source: PathBuf,
    pub moves: Vec<AbsorbMove>,
    pub started_at: String,
}

/// Outcome of an absorb.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbsorbReport {
    /// Segments renamed by this call.
    pub moved: usize,
    /// Segments a previous, interrupted call had already renamed.
    pub already_moved: usize,
    /// Planned segments found at neither end.
    pub missing: usize,
}

impl AbsorbReport {
    /// Segments now present in the destination because of this absorb.
    pub fn absorbed(&self) -> usize {
        self.moved + self.already_moved
    }
}

impl Store {
    /// Move all segments of `source` into this store and remove `source`.
    ///
    /// Safe to re-run after a crash: a second call against an already
    /// absorbed (and therefore removed) source does nothing.
    #[tracing::instrument(skip_all, fields(dest = %self.root.display(), source = %source.root.display()))]
    pub async fn absorb(&self, source: &Store) -> Result<AbsorbReport> {
        let marker_path = self.absorb_marker_path(source.path());

        let marker = match read_json::<AbsorbMarker>(&marker_path).await? {
            Some(marker) => {
                info!(moves = marker.moves.len(), "Resuming interrupted absorb");
                marker
            }
            None => {
                if !Store::exists(source.path()).await? {
                    debug!("Source already absorbed");
                    return Ok(AbsorbReport::default());
                }
                self.check_compatible(source)?;

                let marker = self.plan_absorb(source).await?;
                if marker.moves.is_empty() {
                    source.clear().await?;
                    return Ok(AbsorbReport::default());
                }
                write_json_atomic(&marker_path, &marker).await?;
                marker
            }
        };

        let report = self.apply_absorb(&marker).await?;
        finish_absorb(&marker, &marker_path).await?;

        info!(
            moved = report.moved,
            already_moved = report.already_moved,
            missing = report.missing,
            "Absorbed store"
        );
        crate::utils::metrics::record_segments_absorbed(report.moved);
        Ok(report)
    }

    /// Roll forward every absorb into this store that a crash interrupted.
    ///
    /// Returns the number of markers completed.
    pub async fn recover_absorbs(&self) -> Result<usize> {
        let dir = self.root.join(ABSORB_DIR);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).at(&dir),
        };

        let mut recovered = 0;
        while let Some(entry) = entries.next_entry().await.at(&dir)? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                // Marker never committed, so no segment was moved under it.
                remove_if_exists(&path).await?;
                continue;
            }
            let Some(marker) = read_json::<AbsorbMarker>(&path).await? else {
                continue;
            };

            warn!(
                source = %marker.source.display(),
                moves = marker.moves.len(),
                "Recovering interrupted absorb"
            );
            self.apply_absorb(&marker).await?;
            finish_absorb(&marker, &path).await?;
            recovered += 1;
        }

        Ok(recovered)
    }

    /// Plan the renames for absorbing `source`, refusing any name collision.
    pub(crate) async fn plan_absorb(&self, source: &Store) -> Result<AbsorbMarker> {
        let mut moves = Vec::new();
        for segment in source.segments().await? {
            let to = self.segment_path(&segment);
            if fs::try_exists(&to).await.at(&to)? {
                return Err(StoreError::MergeConflict {
                    dest: self.root.clone(),
                    segment: segment.relative_path().display().to_string(),
                });
            }
            moves.push(AbsorbMove {
                from: source.segment_path(&segment),
                to,
            });
        }

        Ok(AbsorbMarker {
            source: source.root.clone(),
            moves,
            started_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    pub(crate) fn absorb_marker_path(&self, source: &Path) -> PathBuf {
        let id = Uuid::new_v5(
            &Uuid::NAMESPACE_URL,
            source.to_string_lossy().as_bytes(),
        );
        self.root.join(ABSORB_DIR).join(format!("{id}.json"))
    }

    async fn apply_absorb(&self, marker: &AbsorbMarker) -> Result<AbsorbReport> {
        let mut report = AbsorbReport::default();

        for mv in &marker.moves {
            let from_exists = fs::try_exists(&mv.from).await.at(&mv.from)?;
            let to_exists = fs::try_exists(&mv.to).await.at(&mv.to)?;

            match (from_exists, to_exists) {
                (true, false) => {
                    if let Some(parent) = mv.to.parent() {
                        fs::create_dir_all(parent).await.at(parent)?;
                    }
                    fs::rename(&mv.from, &mv.to).await.at(&mv.to)?;
                    report.moved += 1;
                }
                (false, true) => report.already_moved += 1,
                (true, true) => {
                    return Err(StoreError::MergeConflict {
                        dest: self.root.clone(),
                        segment: mv.to.display().to_string(),
                    });
                }
                (false, false) => {
                    warn!(segment = %mv.from.display(), "Planned segment vanished before absorb");
                    report.missing += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Remove the emptied source, then the marker. The marker goes last so a
/// crash in between is still recoverable.
async fn finish_absorb(marker: &AbsorbMarker, marker_path: &Path) -> Result<()> {
    match fs::remove_dir_all(&marker.source).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).at(&marker.source),
    }
    remove_if_exists(marker_path).await?;
    Ok(())
}
