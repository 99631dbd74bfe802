//! Strategies run through the orchestrator against in-memory collaborators

use backyard_backup::connectors::TableSelection;
use backyard_backup::error::BackupError;
use backyard_backup::managers::backup::BackupManager;
use backyard_backup::models::{BackupKind, BackupOptions, BackupStatus};
use test_utils::{ConfigBuilder, MemoryHarness, MemoryProvider, OrphanPolicy, ScriptedConnector};

fn manager(builder: ConfigBuilder) -> (BackupManager, tempfile::TempDir) {
    let (config, temp_dir, _) = builder.persist();
    (BackupManager::new(config), temp_dir)
}

fn shop() -> ScriptedConnector {
    ScriptedConnector::new("test")
        .with_table("audit", "created")
        .with_table("orders", "1,9.5")
        .with_table("users", "ada,grace")
}

async fn run(
    manager: &BackupManager,
    harness: &MemoryHarness,
    kind: BackupKind,
) -> Result<backyard_backup::models::BackupRecord, BackupError> {
    manager
        .backup_with(
            harness.connector(),
            harness.provider(),
            BackupOptions::new(kind, "test", "memory"),
        )
        .await
}

fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_full_backup_is_listed_with_same_fields() {
    let (manager, _temp) = manager(ConfigBuilder::minimal());
    let harness = MemoryHarness::new(shop(), MemoryProvider::new());

    let record = run(&manager, &harness, BackupKind::Full).await.unwrap();
    assert_eq!(record.status, BackupStatus::Success);
    assert_eq!(record.tables_included, names(&["audit", "orders", "users"]));
    assert_eq!(record.table_checksums.len(), 3);
    assert_eq!(harness.connector.dumps(), vec![TableSelection::All]);
    assert!(!harness.connector.is_connected());

    let listed = harness.catalog().list().await.unwrap();
    assert_eq!(listed, vec![record]);
}

#[tokio::test]
async fn test_dependent_backup_without_full_fails() {
    let (manager, _temp) = manager(ConfigBuilder::minimal());
    let harness = MemoryHarness::new(shop(), MemoryProvider::new());

    for kind in [BackupKind::Incremental, BackupKind::Differential] {
        let err = run(&manager, &harness, kind).await.unwrap_err();
        assert!(matches!(err, BackupError::NoBaseBackupFound(ref db) if db == "test"));
    }
    assert_eq!(harness.provider.object_count(), 0);
    assert!(harness.connector.dumps().is_empty());
}

#[tokio::test]
async fn test_incremental_contains_tables_changed_since_latest_backup() {
    let (manager, _temp) = manager(ConfigBuilder::minimal());
    let harness = MemoryHarness::new(shop(), MemoryProvider::new());

    let full = run(&manager, &harness, BackupKind::Full).await.unwrap();

    harness.connector.set_table("orders", "1,9.5;2,20.0");
    let first = run(&manager, &harness, BackupKind::Incremental).await.unwrap();
    assert_eq!(first.tables_included, names(&["orders"]));
    assert_eq!(first.base_backup_id.as_deref(), Some(full.id.as_str()));
    assert_eq!(first.parent_backup_id.as_deref(), Some(full.id.as_str()));

    harness.connector.set_table("users", "ada,grace,linus");
    let second = run(&manager, &harness, BackupKind::Incremental).await.unwrap();
    assert_eq!(second.tables_included, names(&["users"]));
    assert_eq!(second.base_backup_id.as_deref(), Some(full.id.as_str()));
    assert_eq!(second.parent_backup_id.as_deref(), Some(first.id.as_str()));

    assert_eq!(
        harness.connector.dumps().last(),
        Some(&TableSelection::Tables(names(&["users"])))
    );
}

#[tokio::test]
async fn test_differential_contains_tables_changed_since_base() {
    let (manager, _temp) = manager(ConfigBuilder::minimal());
    let harness = MemoryHarness::new(shop(), MemoryProvider::new());

    let full = run(&manager, &harness, BackupKind::Full).await.unwrap();
    harness.connector.set_table("orders", "changed");
    run(&manager, &harness, BackupKind::Incremental).await.unwrap();
    harness.connector.set_table("users", "changed");

    let diff = run(&manager, &harness, BackupKind::Differential).await.unwrap();
    assert_eq!(diff.tables_included, names(&["orders", "users"]));
    assert_eq!(diff.base_backup_id.as_deref(), Some(full.id.as_str()));
}

#[tokio::test]
async fn test_unchanged_database_still_records_empty_incremental() {
    let (manager, _temp) = manager(ConfigBuilder::minimal());
    let harness = MemoryHarness::new(shop(), MemoryProvider::new());

    run(&manager, &harness, BackupKind::Full).await.unwrap();
    let record = run(&manager, &harness, BackupKind::Incremental).await.unwrap();

    assert!(record.tables_included.is_empty());
    assert_eq!(harness.provider.object_count(), 2);
}

#[tokio::test]
async fn test_without_checksums_every_table_counts_as_changed() {
    let (manager, _temp) = manager(ConfigBuilder::minimal());
    let harness = MemoryHarness::new(shop().without_checksums(), MemoryProvider::new());

    let full = run(&manager, &harness, BackupKind::Full).await.unwrap();
    assert!(full.table_checksums.is_empty());

    let record = run(&manager, &harness, BackupKind::Incremental).await.unwrap();
    assert_eq!(record.tables_included, names(&["audit", "orders", "users"]));
}

#[tokio::test]
async fn test_table_filters_are_applied_at_dump_time() {
    let (manager, _temp) = manager(ConfigBuilder::minimal());
    let harness = MemoryHarness::new(shop(), MemoryProvider::new());

    let options = BackupOptions::new(BackupKind::Full, "test", "memory")
        .with_include(["users", "orders", "missing"])
        .with_exclude(["orders"]);
    let record = manager
        .backup_with(harness.connector(), harness.provider(), options)
        .await
        .unwrap();

    assert_eq!(record.tables_included, names(&["users"]));
    assert_eq!(harness.connector.dumps(), vec![TableSelection::Tables(names(&["users"]))]);
}

#[tokio::test]
async fn test_failed_dump_leaves_no_catalogued_object() {
    let (manager, _temp) = manager(ConfigBuilder::minimal());
    let harness = MemoryHarness::new(shop().failing_dump_after(5), MemoryProvider::new());

    let err = run(&manager, &harness, BackupKind::Full).await.unwrap_err();
    let record = err.record().expect("failed transfer carries its record");
    assert_eq!(record.status, BackupStatus::Failed);
    assert!(record.error_detail.as_deref().unwrap_or_default().contains("producer"));

    assert_eq!(harness.provider.object_count(), 0);
    assert!(harness.catalog().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_store_is_reported_with_keep_policy() {
    let (manager, _temp) = manager(ConfigBuilder::minimal().with_orphan_policy(OrphanPolicy::Keep));
    let harness = MemoryHarness::new(shop(), MemoryProvider::new().failing_store());

    let err = run(&manager, &harness, BackupKind::Full).await.unwrap_err();
    assert!(matches!(err, BackupError::Transfer { .. }));
    assert!(harness.provider.deleted().is_empty());
    assert!(harness.catalog().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dropped_tables_recorded_against_reference() {
    let (manager, _temp) = manager(ConfigBuilder::minimal());
    let harness = MemoryHarness::new(shop(), MemoryProvider::new());

    run(&manager, &harness, BackupKind::Full).await.unwrap();
    harness.connector.drop_table("audit");

    // Differentials always compare with the base
    for _ in 0..2 {
        let diff = run(&manager, &harness, BackupKind::Differential).await.unwrap();
        assert_eq!(diff.tables_dropped, names(&["audit"]));
        assert!(diff.tables_included.is_empty());
    }

    // The latest backup already knows audit is gone
    let inc = run(&manager, &harness, BackupKind::Incremental).await.unwrap();
    assert!(inc.tables_dropped.is_empty());

    let listed = harness.catalog().list().await.unwrap();
    assert_eq!(listed.iter().filter(|r| r.tables_dropped == names(&["audit"])).count(), 2);
}

#[tokio::test]
async fn test_cancelled_manager_reports_cancellation() {
    let (manager, _temp) = manager(ConfigBuilder::minimal());
    let harness = MemoryHarness::new(shop(), MemoryProvider::new());

    manager.cancellation_token().cancel();
    let err = run(&manager, &harness, BackupKind::Full).await.unwrap_err();
    assert!(matches!(err, BackupError::Cancelled { .. }));
    assert_eq!(harness.provider.object_count(), 0);

    let record = err.record().expect("cancelled backup keeps its record");
    assert_eq!(record.status, BackupStatus::Failed);
    assert_eq!(record.kind, BackupKind::Full);
    assert_eq!(record.error_detail.as_deref(), Some("transfer cancelled"));
}
