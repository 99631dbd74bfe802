//! Tests for the 'restore' command

use backyard_backup::error::BackupError;
use backyard_backup::managers::backup::RestoreRequest;
use backyard_backup::models::{BackupKind, BackupOptions};
use test_utils::{seed_sqlite, sqlite_count, sqlite_tables, TestContext, SHOP_SCHEMA};

fn request(id: &str) -> RestoreRequest {
    RestoreRequest {
        database: "test".to_string(),
        storage: "local".to_string(),
        backup_id: id.to_string(),
        output_dir: None,
    }
}

#[tokio::test]
async fn test_restore_uses_tables_frozen_at_backup_time() {
    let ctx = TestContext::new();
    let db = ctx.sqlite_path("test");
    seed_sqlite(&db, SHOP_SCHEMA);
    let manager = ctx.manager();

    let record = manager
        .backup(BackupOptions::new(BackupKind::Full, "test", "local").with_include(["users", "orders"]))
        .await
        .unwrap();
    assert_eq!(record.tables_included, vec!["orders", "users"]);

    seed_sqlite(&db, "DELETE FROM users; CREATE TABLE extra (x INTEGER);");

    let report = manager.restore(&request(&record.id)).await.unwrap();
    assert!(report.success);
    assert_eq!(report.applied, vec![record.id.clone()]);
    assert_eq!(sqlite_tables(&db), vec!["orders", "users"]);
    assert_eq!(sqlite_count(&db, "users"), 2);
}

#[tokio::test]
async fn test_restore_applies_chain_in_order() {
    let ctx = TestContext::new();
    let db = ctx.sqlite_path("test");
    seed_sqlite(&db, SHOP_SCHEMA);
    let manager = ctx.manager();

    let full = manager
        .backup(BackupOptions::new(BackupKind::Full, "test", "local"))
        .await
        .unwrap();

    seed_sqlite(&db, "INSERT INTO users (name) VALUES ('linus');");
    let first = manager
        .backup(BackupOptions::new(BackupKind::Incremental, "test", "local"))
        .await
        .unwrap();
    assert_eq!(first.tables_included, vec!["users"]);

    seed_sqlite(&db, "INSERT INTO orders (user_id, total) VALUES (3, 1.0);");
    let second = manager
        .backup(BackupOptions::new(BackupKind::Incremental, "test", "local"))
        .await
        .unwrap();
    assert_eq!(second.tables_included, vec!["orders"]);
    assert_eq!(second.parent_backup_id.as_deref(), Some(first.id.as_str()));

    // Lose everything after the full backup
    seed_sqlite(&db, "DELETE FROM users; DELETE FROM orders; DROP TABLE audit;");

    let report = manager.restore(&request(&second.id)).await.unwrap();
    assert_eq!(report.applied, vec![full.id, first.id, second.id]);
    assert_eq!(sqlite_tables(&db), vec!["audit", "orders", "users"]);
    assert_eq!(sqlite_count(&db, "users"), 3);
    assert_eq!(sqlite_count(&db, "orders"), 3);
    assert_eq!(sqlite_count(&db, "audit"), 1);
}

#[tokio::test]
async fn test_restore_differential_skips_intermediate_incrementals() {
    let ctx = TestContext::new();
    let db = ctx.sqlite_path("test");
    seed_sqlite(&db, SHOP_SCHEMA);
    let manager = ctx.manager();

    let full = manager
        .backup(BackupOptions::new(BackupKind::Full, "test", "local"))
        .await
        .unwrap();
    seed_sqlite(&db, "INSERT INTO users (name) VALUES ('linus');");
    manager
        .backup(BackupOptions::new(BackupKind::Incremental, "test", "local"))
        .await
        .unwrap();
    let diff = manager
        .backup(BackupOptions::new(BackupKind::Differential, "test", "local"))
        .await
        .unwrap();

    let report = manager.restore(&request(&diff.id)).await.unwrap();
    assert_eq!(report.applied, vec![full.id, diff.id]);
    assert_eq!(sqlite_count(&db, "users"), 3);
}

#[tokio::test]
async fn test_export_writes_decoded_dump() {
    let ctx = TestContext::new();
    seed_sqlite(&ctx.sqlite_path("test"), SHOP_SCHEMA);
    let manager = ctx.manager();

    let record = manager
        .backup(BackupOptions::new(BackupKind::Full, "test", "local"))
        .await
        .unwrap();
    assert!(record.compressed);

    let out = ctx.create_subdir("export");
    let mut req = request(&record.id);
    req.output_dir = Some(out.clone());
    let report = manager.restore(&req).await.unwrap();

    let exported = out.join(format!("{}.db", record.id));
    assert_eq!(report.output_file.as_deref(), Some(exported.to_string_lossy().as_ref()));
    assert_eq!(sqlite_tables(&exported), vec!["audit", "orders", "users"]);
}

#[tokio::test]
async fn test_restore_unknown_backup() {
    let ctx = TestContext::new();
    seed_sqlite(&ctx.sqlite_path("test"), SHOP_SCHEMA);

    let err = ctx.manager().restore(&request("nope")).await.unwrap_err();
    assert!(matches!(err, BackupError::NotFound(_)));
}

#[tokio::test]
async fn test_restore_with_missing_base_is_broken_chain() {
    let ctx = TestContext::new();
    let db = ctx.sqlite_path("test");
    seed_sqlite(&db, SHOP_SCHEMA);
    let manager = ctx.manager();

    let full = manager
        .backup(BackupOptions::new(BackupKind::Full, "test", "local"))
        .await
        .unwrap();
    seed_sqlite(&db, "INSERT INTO users (name) VALUES ('linus');");
    let inc = manager
        .backup(BackupOptions::new(BackupKind::Incremental, "test", "local"))
        .await
        .unwrap();
    manager.delete("test", "local", &full.id).await.unwrap();

    let err = manager.restore(&request(&inc.id)).await.unwrap_err();
    assert!(matches!(err, BackupError::BrokenChain { .. }));
    // Nothing was applied
    assert_eq!(sqlite_count(&db, "users"), 3);
}

#[tokio::test]
async fn test_cancelled_restore_returns_partial_report() {
    let ctx = TestContext::new();
    let db = ctx.sqlite_path("test");
    seed_sqlite(&db, SHOP_SCHEMA);
    let manager = ctx.manager();

    let record = manager
        .backup(BackupOptions::new(BackupKind::Full, "test", "local"))
        .await
        .unwrap();

    manager.cancellation_token().cancel();
    let err = manager.restore(&request(&record.id)).await.unwrap_err();
    assert!(matches!(err, BackupError::Cancelled { .. }));

    let report = err.restore_report().expect("cancelled restore keeps its report");
    assert_eq!(report.backup_id, record.id);
    assert!(!report.success);
    assert!(report.applied.is_empty());
    assert!(report.error_detail.as_deref().unwrap_or_default().contains("cancelled"));
    assert_eq!(sqlite_count(&db, "users"), 2);
}

#[tokio::test]
async fn test_restore_drops_tables_removed_after_base() {
    let ctx = TestContext::new();
    let db = ctx.sqlite_path("test");
    seed_sqlite(&db, SHOP_SCHEMA);
    let manager = ctx.manager();

    manager
        .backup(BackupOptions::new(BackupKind::Full, "test", "local"))
        .await
        .unwrap();
    seed_sqlite(&db, "DROP TABLE audit;");
    let inc = manager
        .backup(BackupOptions::new(BackupKind::Incremental, "test", "local"))
        .await
        .unwrap();
    assert!(inc.tables_included.is_empty());
    assert_eq!(inc.tables_dropped, vec!["audit"]);

    // The catalog reads the drop back from storage
    let listed = manager.list("test", "local").await.unwrap();
    assert_eq!(listed[0].id, inc.id);
    assert_eq!(listed[0].tables_dropped, vec!["audit"]);

    let report = manager.restore(&request(&inc.id)).await.unwrap();
    assert_eq!(sqlite_tables(&db), vec!["orders", "users"]);
    assert!(!report.tables_restored.contains(&"audit".to_string()));
}
