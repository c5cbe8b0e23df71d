//! Partitioned, append-only fact store.
//!
//! A store is a directory of immutable segment files, grouped into one
//! subdirectory per partition of its [`RecordStructure`]:
//!
//! ```text
//! {root}/
//!   pail.meta                     structure name + format version (JSON)
//!   page_view/
//!     {uuid}.pailfile             committed segments (framed facts)
//!   _tmp/
//!     {uuid}.tmp                  segments still being written
//!   _absorb/
//!     {uuid}.json                 write-ahead markers for in-flight absorbs
//! ```
//!
//! Segments are the unit of atomicity. Writers build segments under `_tmp/`
//! and publish them with a rename, so readers and snapshots never observe a
//! partial segment. Snapshots hard-link segments; absorb renames them. Both
//! cost O(segments), never O(records).

mod absorb;
mod appender;
mod snapshot;
mod structure;

pub use absorb::{AbsorbMarker, AbsorbMove, AbsorbReport};
pub use appender::{AppendReport, Appender};
pub use snapshot::Snapshot;
pub use structure::{FactStructure, RecordStructure, UNKNOWN_PARTITION};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::fact::{EncodeError, Fact, FactKind, RecordIter};

/// Metadata file at the root of every store.
pub const META_FILE: &str = "pail.meta";
/// Extension of committed segment files.
pub const SEGMENT_EXTENSION: &str = "pailfile";

pub(crate) const TMP_DIR: &str = "_tmp";
pub(crate) const ABSORB_DIR: &str = "_absorb";

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store exists at {path} with structure {existing}, requested {requested}")]
    StoreExistsConflict {
        path: PathBuf,
        existing: String,
        requested: String,
    },

    #[error("Not a store: {0}")]
    NotAStore(PathBuf),

    #[error("Incompatible structures: {ours} cannot take records from {theirs}")]
    StructureMismatch { ours: String, theirs: String },

    #[error("Merge conflict: segment {segment} already exists in {dest}")]
    MergeConflict { dest: PathBuf, segment: String },

    #[error("Fact rejected: {0}")]
    RecordTooLarge(#[from] EncodeError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unreadable metadata {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Whether a fresh attempt may succeed. Conflicts need an operator.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Io { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Attach the offending path to an I/O error.
pub(crate) trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Persisted description of a store's structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub structure: String,
    pub format_version: u32,
}

impl StoreMeta {
    fn for_structure(structure: &dyn RecordStructure) -> Self {
        Self {
            structure: structure.name().to_string(),
            format_version: structure.format_version(),
        }
    }

    fn describe(&self) -> String {
        format!("{}/v{}", self.structure, self.format_version)
    }
}

/// A committed segment, addressed relative to its store root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentRef {
    pub partition: String,
    pub file_name: String,
}

impl SegmentRef {
    pub fn relative_path(&self) -> PathBuf {
        Path::new(&self.partition).join(&self.file_name)
    }
}

/// Facts decoded from a store, with decode accounting.
#[derive(Debug, Default)]
pub struct FactBatch {
    pub facts: Vec<Fact>,
    /// Framed records encountered, decodable or not.
    pub records: u64,
    /// Records that failed to decode and were skipped.
    pub skipped: u64,
}

/// Handle to a store on disk.
#[derive(Clone)]
pub struct Store {
    root: PathBuf,
    structure: Arc<dyn RecordStructure>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.root)
            .field("structure", &self.structure.name())
            .finish()
    }
}

impl Store {
    /// Create a store, or open it if one with the same structure exists.
    ///
    /// Fails with `StoreExistsConflict` when the path holds a store of a
    /// different structure, or a non-empty directory that is not a store.
    #[tracing::instrument(skip_all, fields(path = %root.as_ref().display()))]
    pub async fn create(
        root: impl AsRef<Path>,
        structure: Arc<dyn RecordStructure>,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let requested = StoreMeta::for_structure(structure.as_ref());

        match read_json::<StoreMeta>(&root.join(META_FILE)).await? {
            Some(existing) if existing == requested => {
                debug!("Store already exists");
            }
            Some(existing) => {
                return Err(StoreError::StoreExistsConflict {
                    path: root,
                    existing: existing.describe(),
                    requested: requested.describe(),
                });
            }
            None => {
                if dir_has_entries(&root).await? {
                    return Err(StoreError::StoreExistsConflict {
                        path: root,
                        existing: "<not a store>".to_string(),
                        requested: requested.describe(),
                    });
                }
                fs::create_dir_all(&root).await.at(&root)?;
                write_json_atomic(&root.join(META_FILE), &requested).await?;
                info!(structure = %requested.describe(), "Created store");
            }
        }

        Ok(Self { root, structure })
    }

    /// Open an existing store, verifying its structure.
    pub async fn open(root: impl AsRef<Path>, structure: Arc<dyn RecordStructure>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let requested = StoreMeta::for_structure(structure.as_ref());

        let existing = read_json::<StoreMeta>(&root.join(META_FILE))
            .await?
            .ok_or_else(|| StoreError::NotAStore(root.clone()))?;
        if existing != requested {
            return Err(StoreError::StoreExistsConflict {
                path: root,
                existing: existing.describe(),
                requested: requested.describe(),
            });
        }

        Ok(Self { root, structure })
    }

    /// Whether a store exists at `root`.
    pub async fn exists(root: impl AsRef<Path>) -> Result<bool> {
        let meta = root.as_ref().join(META_FILE);
        fs::try_exists(&meta).await.at(&meta)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn structure(&self) -> &Arc<dyn RecordStructure> {
        &self.structure
    }

    /// Absolute path of a segment in this store.
    pub fn segment_path(&self, segment: &SegmentRef) -> PathBuf {
        self.root.join(segment.relative_path())
    }

    /// Open a handle that appends facts in new segments.
    pub fn open_writer(&self) -> Appender {
        Appender::new(self.clone())
    }

    /// Committed segments, sorted by partition then file name.
    pub async fn segments(&self) -> Result<Vec<SegmentRef>> {
        let mut segments = Vec::new();

        let mut partitions = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(segments),
            Err(e) => return Err(e).at(&self.root),
        };

        while let Some(entry) = partitions.next_entry().await.at(&self.root)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('_') || !self.structure.is_partition(&name) {
                continue;
            }
            let dir = entry.path();
            if !entry.file_type().await.at(&dir)?.is_dir() {
                continue;
            }

            let mut files = fs::read_dir(&dir).await.at(&dir)?;
            while let Some(file) = files.next_entry().await.at(&dir)? {
                if file
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == SEGMENT_EXTENSION)
                {
                    segments.push(SegmentRef {
                        partition: name.clone(),
                        file_name: file.file_name().to_string_lossy().into_owned(),
                    });
                }
            }
        }

        segments.sort();
        Ok(segments)
    }

    /// Decode every committed record, optionally restricted to one kind's
    /// partition. Undecodable records are skipped and counted.
    pub async fn read_facts(&self, kind: Option<FactKind>) -> Result<FactBatch> {
        let mut batch = FactBatch::default();

        for segment in self.segments().await? {
            if kind.is_some_and(|k| k.partition_name() != segment.partition) {
                continue;
            }

            let path = self.segment_path(&segment);
            let bytes = fs::read(&path).await.at(&path)?;
            for record in RecordIter::new(&bytes) {
                batch.records += 1;
                match record {
                    Ok(fact) => batch.facts.push(fact),
                    Err(e) => {
                        batch.skipped += 1;
                        debug!(
                            segment = %path.display(),
                            error = %e,
                            "Skipping undecodable record"
                        );
                    }
                }
            }
        }

        Ok(batch)
    }

    /// Number of framed records across all committed segments.
    pub async fn record_count(&self) -> Result<u64> {
        Ok(self.read_facts(None).await?.records)
    }

    /// New empty store with this store's structure.
    pub async fn create_empty_mimic(&self, path: impl AsRef<Path>) -> Result<Store> {
        let mimic = Store::create(path, Arc::clone(&self.structure)).await?;
        if !mimic.segments().await?.is_empty() {
            return Err(StoreError::StoreExistsConflict {
                path: mimic.root,
                existing: "<non-empty store>".to_string(),
                requested: "<empty mimic>".to_string(),
            });
        }
        Ok(mimic)
    }

    /// Copy every segment of `source` into this store under fresh names,
    /// keeping each in its partition. Returns the number of segments copied.
    #[tracing::instrument(skip_all, fields(dest = %self.root.display(), source = %source.root.display()))]
    pub async fn copy_append(&self, source: &Store) -> Result<usize> {
        self.check_compatible(source)?;

        let tmp_dir = self.root.join(TMP_DIR);
        fs::create_dir_all(&tmp_dir).await.at(&tmp_dir)?;

        let segments = source.segments().await?;
        for segment in &segments {
            let id = uuid::Uuid::new_v4();
            let tmp = tmp_dir.join(format!("{id}.tmp"));
            let from = source.segment_path(segment);
            fs::copy(&from, &tmp).await.at(&from)?;
            fs::File::open(&tmp)
                .await
                .at(&tmp)?
                .sync_all()
                .await
                .at(&tmp)?;

            let partition_dir = self.root.join(&segment.partition);
            fs::create_dir_all(&partition_dir)
                .await
                .at(&partition_dir)?;
            let dest = partition_dir.join(format!("{id}.{SEGMENT_EXTENSION}"));
            fs::rename(&tmp, &dest).await.at(&dest)?;
        }

        info!(segments = segments.len(), "Copied segments");
        Ok(segments.len())
    }

    /// Release all storage held by this store.
    pub async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                debug!(path = %self.root.display(), "Cleared store");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).at(&self.root),
        }
    }

    fn check_compatible(&self, other: &Store) -> Result<()> {
        if self.structure.name() != other.structure.name() {
            return Err(StoreError::StructureMismatch {
                ours: self.structure.name().to_string(),
                theirs: other.structure.name().to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn dir_has_entries(path: &Path) -> Result<bool> {
    match fs::read_dir(path).await {
        Ok(mut entries) => Ok(entries.next_entry().await.at(path)?.is_some()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).at(path),
    }
}

/// Read a JSON document, `None` if the file does not exist.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).at(path),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Metadata {
            path: path.to_path_buf(),
            source,
        })
}

/// Write a JSON document via temp file + rename so readers see all or nothing.
pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Metadata {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.at(parent)?;
    }

    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp).await.at(&tmp)?;
    tokio::io::AsyncWriteExt::write_all(&mut file, &bytes)
        .await
        .at(&tmp)?;
    file.sync_all().await.at(&tmp)?;
    drop(file);
    fs::rename(&tmp, path).await.at(path)
}

/// Remove a file, treating "already gone" as success. Returns whether it existed.
pub(crate) async fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).at(path),
    }
}
