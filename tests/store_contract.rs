//! Store and ingestion contract through the public API.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use batchlayer::config::TempPaths;
use batchlayer::ingest::IngestionWorkflow;
use batchlayer::loader::{initial_import, load_facts};
use batchlayer::store::{AbsorbReport, Store, StoreError};
use common::{structure, view};
use tempfile::TempDir;

#[tokio::test]
async fn test_absorb_twice_does_not_duplicate() {
    let dir = TempDir::new().unwrap();
    let master = Store::create(dir.path().join("master"), structure()).await.unwrap();
    let new_data = Store::create(dir.path().join("newData"), structure()).await.unwrap();
    load_facts(&new_data, &[view("http://a.com/", 0, 0), view("http://a.com/", 0, 1)])
        .await
        .unwrap();

    let first = initial_import(&master, &new_data).await.unwrap();
    let second = master.absorb(&new_data).await.unwrap();

    assert_eq!(first.moved, 1);
    assert_eq!(second, AbsorbReport::default());
    assert_eq!(master.record_count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_snapshot_is_point_in_time() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(dir.path().join("newData"), structure()).await.unwrap();
    load_facts(&store, &[view("http://a.com/", 0, 0)]).await.unwrap();

    let snapshot = store.snapshot(dir.path().join("snap")).await.unwrap();
    load_facts(&store, &[view("http://a.com/", 1, 1)]).await.unwrap();

    assert_eq!(snapshot.store().record_count().await.unwrap(), 1);
    assert_eq!(store.record_count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_reopen_with_other_structure_fails() {
    struct Flat;
    impl batchlayer::store::RecordStructure for Flat {
        fn name(&self) -> &str {
            "flat"
        }
        fn format_version(&self) -> u32 {
            1
        }
        fn partition(&self, _fact: &batchlayer::fact::Fact) -> String {
            "all".to_string()
        }
        fn is_partition(&self, name: &str) -> bool {
            name == "all"
        }
    }

    let dir = TempDir::new().unwrap();
    Store::create(dir.path().join("master"), structure()).await.unwrap();

    let result = Store::open(dir.path().join("master"), std::sync::Arc::new(Flat)).await;
    assert!(matches!(result, Err(StoreError::StoreExistsConflict { .. })));
}

/// Producers keep writing while cycles run; every fact reaches master once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_and_ingestion() {
    let dir = TempDir::new().unwrap();
    let master = Store::create(dir.path().join("master"), structure()).await.unwrap();
    let new_data = Store::create(dir.path().join("newData"), structure()).await.unwrap();
    let workflow = IngestionWorkflow::new(
        master.clone(),
        new_data.clone(),
        TempPaths::new(dir.path().join("tmp")),
    );

    const BATCHES: i64 = 20;
    const PER_BATCH: i64 = 5;
    let producer = tokio::spawn(async move {
        for batch in 0..BATCHES {
            let facts: Vec<_> = (0..PER_BATCH)
                .map(|i| {
                    let nonce = batch * PER_BATCH + i;
                    view("http://a.com/", nonce * 60, nonce)
                })
                .collect();
            load_facts(&new_data, &facts).await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });

    while !producer.is_finished() {
        workflow.run_cycle().await.unwrap();
    }
    producer.await.unwrap();
    workflow.run_cycle().await.unwrap();

    let facts = master.read_facts(None).await.unwrap().facts;
    let mut seen: HashMap<i64, usize> = HashMap::new();
    for fact in &facts {
        *seen.entry(fact.page_view_edge().unwrap().nonce).or_default() += 1;
    }
    assert_eq!(seen.len() as i64, BATCHES * PER_BATCH);
    assert!(seen.values().all(|&n| n == 1));
    assert_eq!(workflow.new_data().record_count().await.unwrap(), 0);
}
