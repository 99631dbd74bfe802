//! Tests for the 'backup' command

use backyard_backup::error::BackupError;
use backyard_backup::models::{BackupKind, BackupOptions, BackupStatus};
use test_utils::{seed_sqlite, ConfigBuilder, StorageType, TestContext, SHOP_SCHEMA};

#[tokio::test]
async fn test_full_backup_of_empty_database() {
    let ctx = TestContext::new();
    seed_sqlite(&ctx.sqlite_path("test"), "");
    let manager = ctx.manager();

    let record = manager
        .backup(BackupOptions::new(BackupKind::Full, "test", "local"))
        .await
        .unwrap();

    assert_eq!(record.status, BackupStatus::Success);
    assert_eq!(record.kind, BackupKind::Full);
    assert!(record.tables_included.is_empty());

    let objects = ctx.stored_objects("local");
    assert_eq!(objects, vec![ctx.storage_path("local").join(&record.storage_path)]);
    assert!(record.storage_path.starts_with("sqlite/test/full/"));
    assert!(record.storage_path.ends_with(&format!("-{}.db.gz", record.id)));

    let listed = manager.list("test", "local").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, record.id);
    assert_eq!(listed[0], record);
}

#[tokio::test]
async fn test_incremental_without_full_fails() {
    let ctx = TestContext::new();
    seed_sqlite(&ctx.sqlite_path("test"), SHOP_SCHEMA);
    let manager = ctx.manager();

    let err = manager
        .backup(BackupOptions::new(BackupKind::Incremental, "test", "local"))
        .await
        .unwrap_err();

    assert!(matches!(err, BackupError::NoBaseBackupFound(ref db) if db == "test"));
    assert!(ctx.stored_objects("local").is_empty());
    assert!(manager.list("test", "local").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_database_fails_before_io() {
    let ctx = TestContext::new();
    let manager = ctx.manager();

    let err = manager
        .backup(BackupOptions::new(BackupKind::Full, "nope", "local"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::Config(_)));
    assert!(!ctx.storage_path("local").exists());
}

#[tokio::test]
async fn test_unimplemented_storage_type() {
    let ctx = TestContext::from_builder(
        ConfigBuilder::minimal().add_unimplemented_storage("cloud", StorageType::Azure),
    );
    seed_sqlite(&ctx.sqlite_path("test"), SHOP_SCHEMA);

    let err = ctx
        .manager()
        .backup(BackupOptions::new(BackupKind::Full, "test", "cloud"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::NotImplemented(_)));
}

#[tokio::test]
async fn test_uncompressed_backup_path() {
    let ctx = TestContext::new();
    seed_sqlite(&ctx.sqlite_path("test"), SHOP_SCHEMA);

    let record = ctx
        .manager()
        .backup(BackupOptions::new(BackupKind::Full, "test", "local").with_compression(false))
        .await
        .unwrap();

    assert!(!record.compressed);
    assert!(record.storage_path.ends_with(".db"));
    assert_eq!(record.tables_included, vec!["audit", "orders", "users"]);
    assert_eq!(record.table_checksums.len(), 3);
}

#[tokio::test]
async fn test_max_size_rejects_large_dump() {
    let ctx = TestContext::new();
    seed_sqlite(&ctx.sqlite_path("test"), SHOP_SCHEMA);

    let err = ctx
        .manager()
        .backup(
            BackupOptions::new(BackupKind::Full, "test", "local")
                .with_compression(false)
                .with_max_size(Some(128)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, BackupError::Transfer { .. }));
    assert!(ctx.stored_objects("local").is_empty());
}

#[tokio::test]
async fn test_scheduled_backup_uses_schedule_settings() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().add_schedule("nightly", "test", "local"));
    seed_sqlite(&ctx.sqlite_path("test"), SHOP_SCHEMA);

    let record = ctx.manager().run_schedule("nightly", BackupKind::Full).await.unwrap();
    assert_eq!(record.source_database, "test");
    assert!(record.compressed);
}
