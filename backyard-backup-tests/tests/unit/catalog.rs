//! Catalog queries over provider metadata

use backyard_backup::error::BackupError;
use backyard_backup::managers::catalog::Catalog;
use backyard_backup::models::metadata::KEY_BACKUP_TYPE;
use backyard_backup::models::{encode_metadata, BackupKind};
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use test_utils::{dependent_days_ago, full_days_ago, MemoryProvider};

fn seeded() -> Arc<MemoryProvider> {
    let now = Utc::now();
    let provider = MemoryProvider::new();
    provider.insert_record(&full_days_ago("full-1", now, 3), b"one");
    provider.insert_record(
        &dependent_days_ago("inc-1", BackupKind::Incremental, "full-1", Some("full-1"), now, 2),
        b"two",
    );
    provider.insert_record(
        &dependent_days_ago("inc-2", BackupKind::Incremental, "full-1", Some("inc-1"), now, 1),
        b"three",
    );
    Arc::new(provider)
}

#[tokio::test]
async fn test_list_is_newest_first() {
    let catalog = Catalog::new(seeded());
    let ids: Vec<String> = catalog.list().await.unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["inc-2", "inc-1", "full-1"]);
}

#[tokio::test]
async fn test_repeated_listing_is_stable() {
    let catalog = Catalog::new(seeded());
    let first: HashSet<String> = catalog.list().await.unwrap().into_iter().map(|r| r.id).collect();
    let second: HashSet<String> = catalog.list().await.unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
}

#[tokio::test]
async fn test_undecodable_objects_are_skipped() {
    let provider = seeded();
    let now = Utc::now();

    // Not a dump, and a dump with a broken type field
    provider.insert_raw("sqlite/test/notes.txt", b"x", Default::default());
    let mut broken = encode_metadata(&full_days_ago("broken", now, 0));
    broken.insert(KEY_BACKUP_TYPE.to_string(), "weekly".to_string());
    provider.insert_raw("sqlite/test/full/20240101-000000-broken.db.gz", b"x", broken);

    let catalog = Catalog::new(provider);
    assert_eq!(catalog.list().await.unwrap().len(), 3);
    assert!(matches!(catalog.get("broken").await, Err(BackupError::NotFound(_))));
}

#[tokio::test]
async fn test_latest_by_kind_and_any() {
    let catalog = Catalog::new(seeded());

    let full = catalog.latest("sqlite", "test", BackupKind::Full).await.unwrap().unwrap();
    assert_eq!(full.id, "full-1");

    let any = catalog.latest_any("sqlite", "test").await.unwrap().unwrap();
    assert_eq!(any.id, "inc-2");

    assert!(catalog
        .latest("sqlite", "test", BackupKind::Differential)
        .await
        .unwrap()
        .is_none());
    assert!(catalog.latest_any("sqlite", "other").await.unwrap().is_none());
}

#[tokio::test]
async fn test_chain_is_oldest_first() {
    let catalog = Catalog::new(seeded());
    let chain: Vec<String> = catalog.chain("inc-2").await.unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(chain, vec!["full-1", "inc-1", "inc-2"]);
}

#[tokio::test]
async fn test_chain_with_missing_link_is_broken() {
    let provider = seeded();
    let catalog = Catalog::new(provider.clone());
    let middle = catalog.get("inc-1").await.unwrap();
    catalog.delete(&middle.id).await.unwrap();

    match catalog.chain("inc-2").await {
        Err(BackupError::BrokenChain { backup_id, missing }) => {
            assert_eq!(backup_id, "inc-2");
            assert!(missing.contains("inc-1"));
        }
        other => panic!("expected broken chain, got {:?}", other.map(|c| c.len())),
    }
}

#[tokio::test]
async fn test_delete_removes_from_listing() {
    let provider = seeded();
    let catalog = Catalog::new(provider.clone());

    let deleted = catalog.delete("inc-2").await.unwrap();
    assert_eq!(provider.deleted(), vec![deleted.storage_path]);
    assert!(matches!(catalog.get("inc-2").await, Err(BackupError::NotFound(_))));
    assert!(matches!(catalog.delete("inc-2").await, Err(BackupError::NotFound(_))));
}

#[tokio::test]
async fn test_record_round_trips_through_metadata() {
    let now = Utc::now() - Duration::hours(1);
    let mut record = full_days_ago("full-x", now, 0);
    record.table_checksums.insert("users".to_string(), "abc".to_string());

    let provider = MemoryProvider::new();
    provider.insert_record(&record, b"0123456789");
    let listed = Catalog::new(Arc::new(provider)).get("full-x").await.unwrap();

    assert_eq!(listed.started_at, record.started_at);
    assert_eq!(listed.tables_included, record.tables_included);
    assert_eq!(listed.table_checksums, record.table_checksums);
    assert_eq!(listed.size_bytes, 10);
    assert!(listed.compressed);
}
