use std::sync::Arc;

use super::*;
use crate::fact::Fact;
use crate::store::{write_json_atomic, FactStructure, RecordStructure};
use tempfile::TempDir;

/// Quick retries: 1ms to 10ms, three of them.
fn fast_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(10))
        .with_max_times(3)
}

struct Fixture {
    _dir: TempDir,
    workflow: IngestionWorkflow,
}

impl Fixture {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let structure: Arc<dyn RecordStructure> = Arc::new(FactStructure);
        let master = Store::create(dir.path().join("master"), structure.clone())
            .await
            .unwrap();
        let new_data = Store::create(dir.path().join("newData"), structure)
            .await
            .unwrap();
        let temp = TempPaths::new(dir.path().join("tmp"));
        Self {
            workflow: IngestionWorkflow::new(master, new_data, temp),
            _dir: dir,
        }
    }

    fn master(&self) -> &Store {
        self.workflow.master()
    }

    fn new_data(&self) -> &Store {
        self.workflow.new_data()
    }

    async fn produce(&self, prefix: &str, count: i64) {
        let mut writer = self.new_data().open_writer();
        for i in 0..count {
            writer
                .append(&Fact::page_view("u", format!("http://{prefix}.com/{i}"), i, i))
                .await
                .unwrap();
        }
        writer.close().await.unwrap();
    }

    /// Run the first steps of a cycle by hand and journal `state`.
    async fn interrupted_at(&self, state: IngestState) -> IngestJournal {
        let temp = &self.workflow.temp;
        let mut journal = IngestJournal::new(temp.fresh("snapshot"), temp.fresh("copy"));
        let path = self.workflow.journal_path();

        let snapshot = self.new_data().snapshot(&journal.snapshot).await.unwrap();
        if state >= IngestState::Cloned {
            let copy = snapshot
                .store()
                .create_empty_mimic(&journal.copy)
                .await
                .unwrap();
            copy.copy_append(snapshot.store()).await.unwrap();
            if state >= IngestState::Absorbed {
                self.master().absorb(&copy).await.unwrap();
            }
        }
        journal.advance(&path, state).await.unwrap();
        journal
    }
}

#[tokio::test]
async fn test_cycle_moves_new_data_into_master() {
    let fx = Fixture::new().await;
    fx.produce("a", 3).await;
    fx.produce("b", 2).await;

    let report = fx.workflow.run_cycle().await.unwrap();

    assert_eq!(report.snapshot_segments, 2);
    assert_eq!(report.copied, 2);
    assert_eq!(report.absorbed.absorbed(), 2);
    assert_eq!(report.released, 2);
    assert_eq!(fx.master().record_count().await.unwrap(), 5);
    assert_eq!(fx.new_data().record_count().await.unwrap(), 0);
    assert!(!fx.workflow.journal_path().exists());

    let leftovers: Vec<_> = std::fs::read_dir(fx.workflow.temp.root())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert!(leftovers.is_empty(), "temp root not cleaned: {leftovers:?}");
}

#[tokio::test]
async fn test_empty_cycle_is_noop() {
    let fx = Fixture::new().await;
    let report = fx.workflow.run_cycle().await.unwrap();
    assert_eq!(report, IngestReport::default());
    assert_eq!(fx.master().record_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_writes_during_cycle_wait_for_next_cycle() {
    let fx = Fixture::new().await;
    fx.produce("a", 3).await;

    let mut late = fx.new_data().open_writer();
    late.append(&Fact::page_view("u", "http://late.com/", 9, 9))
        .await
        .unwrap();

    fx.workflow.run_cycle().await.unwrap();
    late.close().await.unwrap();

    assert_eq!(fx.master().record_count().await.unwrap(), 3);
    assert_eq!(fx.new_data().record_count().await.unwrap(), 1);

    fx.workflow.run_cycle().await.unwrap();
    assert_eq!(fx.master().record_count().await.unwrap(), 4);
    assert_eq!(fx.new_data().record_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_recover_without_journal() {
    let fx = Fixture::new().await;
    assert_eq!(fx.workflow.recover().await.unwrap(), None);
}

#[tokio::test]
async fn test_recover_discards_cycle_before_clone() {
    let fx = Fixture::new().await;
    fx.produce("a", 3).await;
    let journal = fx.interrupted_at(IngestState::Snapshotted).await;

    let found = fx.workflow.recover().await.unwrap();

    assert_eq!(found, Some(IngestState::Snapshotted));
    assert!(!journal.snapshot.exists());
    assert_eq!(fx.master().record_count().await.unwrap(), 0);
    assert_eq!(fx.new_data().record_count().await.unwrap(), 3);

    fx.workflow.run_cycle().await.unwrap();
    assert_eq!(fx.master().record_count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_recover_after_absorb_does_not_reingest() {
    let fx = Fixture::new().await;
    fx.produce("a", 3).await;
    let journal = fx.interrupted_at(IngestState::Absorbed).await;
    assert_eq!(fx.master().record_count().await.unwrap(), 3);
    assert_eq!(fx.new_data().record_count().await.unwrap(), 3);

    let found = fx.workflow.recover().await.unwrap();

    assert_eq!(found, Some(IngestState::Absorbed));
    assert_eq!(fx.new_data().record_count().await.unwrap(), 0);
    assert!(!journal.snapshot.exists());
    assert!(!fx.workflow.journal_path().exists());

    fx.workflow.run_cycle().await.unwrap();
    assert_eq!(fx.master().record_count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_recover_finishes_half_done_absorb() {
    let fx = Fixture::new().await;
    fx.produce("a", 3).await;
    fx.produce("b", 4).await;
    let journal = fx.interrupted_at(IngestState::Cloned).await;

    // Crash inside absorb: marker written, one of two segments moved.
    let copy = Store::open(&journal.copy, Arc::new(FactStructure)).await.unwrap();
    let marker = fx.master().plan_absorb(&copy).await.unwrap();
    write_json_atomic(&fx.master().absorb_marker_path(copy.path()), &marker)
        .await
        .unwrap();
    let first = &marker.moves[0];
    std::fs::create_dir_all(first.to.parent().unwrap()).unwrap();
    std::fs::rename(&first.from, &first.to).unwrap();

    let found = fx.workflow.recover().await.unwrap();

    assert_eq!(found, Some(IngestState::Cloned));
    assert_eq!(fx.master().record_count().await.unwrap(), 7);
    assert_eq!(fx.new_data().record_count().await.unwrap(), 0);
    assert!(!journal.copy.exists());
}

#[tokio::test]
async fn test_recover_absorbs_pending_copy() {
    let fx = Fixture::new().await;
    fx.produce("a", 2).await;
    fx.interrupted_at(IngestState::Cloned).await;

    fx.workflow.recover().await.unwrap();
    assert_eq!(fx.master().record_count().await.unwrap(), 2);
    assert_eq!(fx.new_data().record_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_run_with_retry_succeeds() {
    let fx = Fixture::new().await;
    fx.produce("a", 2).await;

    let report = ingest_with_retry(&fx.workflow, fast_backoff()).await.unwrap();
    assert_eq!(report.absorbed.moved, 1);
    assert_eq!(fx.master().record_count().await.unwrap(), 2);
}

#[test]
fn test_conflicts_are_not_retryable() {
    let conflict = IngestError::Store(StoreError::MergeConflict {
        dest: PathBuf::from("/m"),
        segment: "page_view/x.pailfile".into(),
    });
    assert!(!conflict.is_retryable());

    let io = IngestError::Journal(StoreError::Io {
        path: PathBuf::from("/t"),
        source: std::io::Error::other("disk"),
    });
    assert!(io.is_retryable());
}
