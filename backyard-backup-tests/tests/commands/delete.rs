//! Tests for the 'delete' command

use backyard_backup::error::BackupError;
use backyard_backup::managers::catalog::Catalog;
use backyard_backup::models::{BackupKind, BackupOptions};
use backyard_backup::providers::LocalProvider;
use std::sync::Arc;
use test_utils::{seed_sqlite, ConfigBuilder, TestContext, SHOP_SCHEMA};

#[tokio::test]
async fn test_delete_removes_object_and_record() {
    let ctx = TestContext::new();
    seed_sqlite(&ctx.sqlite_path("test"), SHOP_SCHEMA);
    let manager = ctx.manager();

    let record = manager
        .backup(BackupOptions::new(BackupKind::Full, "test", "local"))
        .await
        .unwrap();
    let object = ctx.storage_path("local").join(&record.storage_path);
    assert!(object.exists());

    let deleted = manager.delete("test", "local", &record.id).await.unwrap();
    assert_eq!(deleted.id, record.id);
    assert!(!object.exists());
    assert!(manager.list("test", "local").await.unwrap().is_empty());

    let catalog = Catalog::new(Arc::new(LocalProvider::new(ctx.storage_path("local"))));
    assert!(matches!(catalog.get(&record.id).await, Err(BackupError::NotFound(_))));
}

#[tokio::test]
async fn test_delete_unknown_backup() {
    let ctx = TestContext::new();
    let err = ctx.manager().delete("test", "local", "nope").await.unwrap_err();
    assert!(matches!(err, BackupError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_checks_owning_database() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().add_sqlite_database("other"));
    seed_sqlite(&ctx.sqlite_path("test"), SHOP_SCHEMA);
    let manager = ctx.manager();

    let record = manager
        .backup(BackupOptions::new(BackupKind::Full, "test", "local"))
        .await
        .unwrap();

    let err = manager.delete("other", "local", &record.id).await.unwrap_err();
    assert!(matches!(err, BackupError::NotFound(_)));
    assert_eq!(manager.list("test", "local").await.unwrap().len(), 1);
}
