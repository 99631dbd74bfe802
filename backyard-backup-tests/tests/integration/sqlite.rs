//! End-to-end lifecycle of a sqlite database backed up to local storage

use backyard_backup::error::BackupError;
use backyard_backup::managers::backup::RestoreRequest;
use backyard_backup::models::{BackupKind, BackupOptions};
use backyard_backup::utils::locker::BackupLock;
use serial_test::serial;
use test_utils::{seed_sqlite, sqlite_count, sqlite_tables, ConfigBuilder, TestContext, SHOP_SCHEMA};

#[tokio::test]
async fn test_week_of_backups_then_disaster() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().add_schedule("nightly", "test", "local"));
    let db = ctx.sqlite_path("test");
    seed_sqlite(&db, SHOP_SCHEMA);
    let manager = ctx.manager();

    let full = manager.run_schedule("nightly", BackupKind::Full).await.unwrap();
    for day in 0..3 {
        seed_sqlite(&db, &format!("INSERT INTO audit (event) VALUES ('day {}');", day));
        manager
            .run_schedule("nightly", BackupKind::Incremental)
            .await
            .unwrap();
    }
    seed_sqlite(&db, "UPDATE users SET name = 'ada lovelace' WHERE id = 1;");
    let last = manager
        .backup(BackupOptions::new(BackupKind::Incremental, "test", "local"))
        .await
        .unwrap();
    assert_eq!(last.tables_included, vec!["users"]);

    std::fs::remove_file(&db).unwrap();

    let report = manager
        .restore(&RestoreRequest {
            database: "test".to_string(),
            storage: "local".to_string(),
            backup_id: last.id.clone(),
            output_dir: None,
        })
        .await
        .unwrap();

    assert_eq!(report.applied.len(), 5);
    assert_eq!(report.applied.first(), Some(&full.id));
    assert_eq!(report.applied.last(), Some(&last.id));
    assert_eq!(sqlite_tables(&db), vec!["audit", "orders", "users"]);
    assert_eq!(sqlite_count(&db, "audit"), 4);
    assert_eq!(sqlite_count(&db, "users"), 2);
}

#[tokio::test]
async fn test_excluded_table_is_never_dumped() {
    let ctx = TestContext::new();
    let db = ctx.sqlite_path("test");
    seed_sqlite(&db, SHOP_SCHEMA);
    let manager = ctx.manager();

    let record = manager
        .backup(BackupOptions::new(BackupKind::Full, "test", "local").with_exclude(["audit"]))
        .await
        .unwrap();
    assert_eq!(record.tables_included, vec!["orders", "users"]);

    let out = ctx.create_subdir("export");
    manager
        .restore(&RestoreRequest {
            database: "test".to_string(),
            storage: "local".to_string(),
            backup_id: record.id.clone(),
            output_dir: Some(out.clone()),
        })
        .await
        .unwrap();

    let exported = out.join(format!("{}.db", record.id));
    assert_eq!(sqlite_tables(&exported), vec!["orders", "users"]);
    assert_eq!(sqlite_count(&exported, "orders"), 2);
}

#[tokio::test]
#[serial]
async fn test_busy_database_is_rejected() {
    let ctx = TestContext::new();
    seed_sqlite(&ctx.sqlite_path("test"), SHOP_SCHEMA);
    let lock_dir = ctx.config().global.lock_directory.clone();

    let held = BackupLock::acquire(&lock_dir, "test").unwrap();
    let err = ctx
        .manager()
        .backup(BackupOptions::new(BackupKind::Full, "test", "local"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::Lock(ref msg) if msg.contains("busy")));
    drop(held);

    ctx.manager()
        .backup(BackupOptions::new(BackupKind::Full, "test", "local"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_timeout_cancels_backup() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().with_timeout(0));
    seed_sqlite(&ctx.sqlite_path("test"), SHOP_SCHEMA);

    let err = ctx
        .manager()
        .backup(BackupOptions::new(BackupKind::Full, "test", "local"))
        .await
        .unwrap_err();
    match err {
        BackupError::Cancelled { ref what, .. } => {
            assert!(what.contains("timed out"));
            assert!(err.record().is_some());
        }
        other => panic!("expected timeout, got {}", other),
    }
    assert!(ctx.stored_objects("local").is_empty());
}
