//! Appending facts to a store.
//!
//! Each appender writes its own segment per partition under `_tmp/`, so
//! concurrent appenders on one store never share a file. `close()` flushes,
//! syncs and renames the segments into their partitions; until then none of
//! the appended facts are visible.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;

use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;
use uuid::Uuid;

use super::{remove_if_exists, IoContext, Result, Store, SEGMENT_EXTENSION, TMP_DIR};
use crate::fact::{encode_record, Fact};

/// Summary of a closed appender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendReport {
    pub segments: usize,
    pub records: u64,
}

struct OpenSegment {
    tmp_path: PathBuf,
    file_name: String,
    writer: BufWriter<File>,
    records: u64,
}

impl OpenSegment {
    async fn create(store: &Store) -> Result<Self> {
        let tmp_dir = store.path().join(TMP_DIR);
        fs::create_dir_all(&tmp_dir).await.at(&tmp_dir)?;

        let id = Uuid::new_v4();
        let tmp_path = tmp_dir.join(format!("{id}.tmp"));
        let file = File::create(&tmp_path).await.at(&tmp_path)?;

        Ok(Self {
            tmp_path,
            file_name: format!("{id}.{SEGMENT_EXTENSION}"),
            writer: BufWriter::new(file),
            records: 0,
        })
    }
}

/// Write handle onto a store.
pub struct Appender {
    store: Store,
    open: HashMap<String, OpenSegment>,
}

impl Appender {
    pub(crate) fn new(store: Store) -> Self {
        Self {
            store,
            open: HashMap::new(),
        }
    }

    /// Serialize and buffer one fact into its partition's segment.
    ///
    /// A fact too large to frame is rejected before anything is written;
    /// the appender stays usable.
    pub async fn append(&mut self, fact: &Fact) -> Result<()> {
        let frame = encode_record(fact)?;
        let partition = self.store.structure().partition(fact);
        let segment = match self.open.entry(partition) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(OpenSegment::create(&self.store).await?),
        };

        segment
            .writer
            .write_all(&frame)
            .await
            .at(&segment.tmp_path)?;
        segment.records += 1;
        Ok(())
    }

    /// Append every fact in order. Returns how many were appended.
    pub async fn append_all<'a>(&mut self, facts: impl IntoIterator<Item = &'a Fact>) -> Result<u64> {
        let mut count = 0;
        for fact in facts {
            self.append(fact).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Make everything appended so far durable and visible.
    pub async fn close(self) -> Result<AppendReport> {
        let Appender { store, open } = self;
        let mut report = AppendReport::default();

        for (partition, mut segment) in open {
            segment
                .writer
                .flush()
                .await
                .at(&segment.tmp_path)?;
            segment
                .writer
                .get_ref()
                .sync_all()
                .await
                .at(&segment.tmp_path)?;
            drop(segment.writer);

            let dir = store.path().join(&partition);
            fs::create_dir_all(&dir).await.at(&dir)?;
            let dest = dir.join(&segment.file_name);
            fs::rename(&segment.tmp_path, &dest).await.at(&dest)?;

            report.segments += 1;
            report.records += segment.records;
        }

        debug!(
            store = %store.path().display(),
            segments = report.segments,
            records = report.records,
            "Closed appender"
        );
        Ok(report)
    }

    /// Discard everything appended through this handle.
    pub async fn abort(self) -> Result<()> {
        for (_, segment) in self.open {
            drop(segment.writer);
            remove_if_exists(&segment.tmp_path).await?;
        }
        Ok(())
    }
}
