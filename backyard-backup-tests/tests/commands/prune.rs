//! Tests for the 'prune' command

use backyard_backup::error::BackupError;
use backyard_backup::models::{BackupKind, BackupOptions};
use test_utils::{seed_sqlite, ConfigBuilder, ScheduleConfig, TestContext, SHOP_SCHEMA};

fn keep_latest(count: u32) -> ScheduleConfig {
    ScheduleConfig {
        database: "test".to_string(),
        storage: "local".to_string(),
        full: Some("0 2 * * *".to_string()),
        incremental: Some("0 * * * *".to_string()),
        differential: None,
        retention_days: 0,
        max_backups: count,
        include_tables: vec![],
        exclude_tables: vec![],
        compress: None,
    }
}

#[tokio::test]
async fn test_prune_keeps_newest_per_kind() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().add_custom_schedule("nightly", keep_latest(1)));
    seed_sqlite(&ctx.sqlite_path("test"), SHOP_SCHEMA);
    let manager = ctx.manager();

    let mut fulls = Vec::new();
    for _ in 0..3 {
        fulls.push(
            manager
                .backup(BackupOptions::new(BackupKind::Full, "test", "local"))
                .await
                .unwrap(),
        );
    }

    let dry = manager.prune("nightly", true).await.unwrap();
    assert_eq!(dry.deleted.len(), 2);
    assert_eq!(manager.list("test", "local").await.unwrap().len(), 3);

    let outcome = manager.prune("nightly", false).await.unwrap();
    assert_eq!(outcome.deleted, vec![fulls[1].id.clone(), fulls[0].id.clone()]);

    let remaining = manager.list("test", "local").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, fulls[2].id);
}

#[tokio::test]
async fn test_prune_keeps_full_needed_by_incremental() {
    let ctx = TestContext::from_builder(ConfigBuilder::minimal().add_custom_schedule("nightly", keep_latest(1)));
    let db = ctx.sqlite_path("test");
    seed_sqlite(&db, SHOP_SCHEMA);
    let manager = ctx.manager();

    let old_full = manager
        .backup(BackupOptions::new(BackupKind::Full, "test", "local"))
        .await
        .unwrap();
    seed_sqlite(&db, "INSERT INTO users (name) VALUES ('linus');");
    let inc = manager
        .backup(BackupOptions::new(BackupKind::Incremental, "test", "local"))
        .await
        .unwrap();
    let new_full = manager
        .backup(BackupOptions::new(BackupKind::Full, "test", "local"))
        .await
        .unwrap();

    let outcome = manager.prune("nightly", false).await.unwrap();
    assert!(outcome.deleted.is_empty());
    assert_eq!(outcome.protected, vec![old_full.id.clone()]);

    let ids: Vec<String> = manager
        .list("test", "local")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec![new_full.id, inc.id, old_full.id]);
}

#[tokio::test]
async fn test_prune_unknown_schedule() {
    let ctx = TestContext::new();
    let err = ctx.manager().prune("nope", false).await.unwrap_err();
    assert!(matches!(err, BackupError::Config(_)));
}
