//! Test fixtures and sample data
//!
//! Provides pre-built records and sqlite databases for testing.

use backyard_backup::models::{BackupKind, BackupRecord, BackupStatus};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::path::Path;

/// Create a successful record for testing
pub fn sample_record(id: &str, kind: BackupKind, started_at: DateTime<Utc>) -> BackupRecord {
    BackupRecord {
        id: id.to_string(),
        kind,
        engine: "sqlite".to_string(),
        source_database: "test".to_string(),
        base_backup_id: None,
        parent_backup_id: None,
        started_at,
        completed_at: started_at + Duration::seconds(5),
        size_bytes: 1024,
        storage_path: backyard_backup::models::path::storage_path(
            "sqlite", "test", kind, &started_at, id, true,
        ),
        compressed: true,
        tables_included: vec!["users".to_string()],
        table_checksums: BTreeMap::new(),
        tables_dropped: Vec::new(),
        status: BackupStatus::Success,
        error_detail: None,
    }
}

/// Full backup started `days_ago` days before `now`
pub fn full_days_ago(id: &str, now: DateTime<Utc>, days_ago: i64) -> BackupRecord {
    sample_record(id, BackupKind::Full, now - Duration::days(days_ago))
}

/// Dependent backup of `base` (and `parent`, for incrementals) started `days_ago` days before `now`
pub fn dependent_days_ago(
    id: &str,
    kind: BackupKind,
    base: &str,
    parent: Option<&str>,
    now: DateTime<Utc>,
    days_ago: i64,
) -> BackupRecord {
    let mut record = sample_record(id, kind, now - Duration::days(days_ago));
    record.base_backup_id = Some(base.to_string());
    record.parent_backup_id = parent.map(str::to_string);
    record
}

/// Create (or open) a sqlite database and run the statements in one batch
pub fn seed_sqlite(path: &Path, sql: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create database directory");
    }
    let conn = Connection::open(path).expect("Failed to open sqlite database");
    conn.execute_batch(sql).expect("Failed to seed sqlite database");
}

/// Three small tables used by most sqlite tests
pub const SHOP_SCHEMA: &str = r#"
CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER, total REAL);
CREATE TABLE audit (id INTEGER PRIMARY KEY, event TEXT);
CREATE INDEX orders_user ON orders(user_id);
INSERT INTO users (name) VALUES ('ada'), ('grace');
INSERT INTO orders (user_id, total) VALUES (1, 9.5), (2, 20.0);
INSERT INTO audit (event) VALUES ('created');
"#;

/// Table names of a sqlite database, sorted
pub fn sqlite_tables(path: &Path) -> Vec<String> {
    let conn = Connection::open(path).expect("Failed to open sqlite database");
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
        .expect("Failed to prepare table query");
    stmt.query_map([], |row| row.get::<_, String>(0))
        .expect("Failed to list tables")
        .collect::<rusqlite::Result<Vec<_>>>()
        .expect("Failed to read table names")
}

/// Row count of one sqlite table
pub fn sqlite_count(path: &Path, table: &str) -> i64 {
    let conn = Connection::open(path).expect("Failed to open sqlite database");
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| row.get(0))
        .expect("Failed to count rows")
}

/// Minimal valid config TOML for CLI tests; `{dir}` is replaced by the caller
pub fn minimal_config_toml() -> &'static str {
    r#"
[global]
log_directory = "{dir}/logs"
lock_directory = "{dir}/locks"

[databases.test]
type = "sqlite"
file_path = "{dir}/test.sqlite"

[storage.local]
type = "local"
base_path = "{dir}/storage"
"#
}

/// Config TOML with a schedule referencing a missing database
pub fn invalid_schedule_config_toml() -> &'static str {
    r#"
[storage.local]
type = "local"
base_path = "/tmp/backyard"

[schedules.nightly]
database = "missing"
storage = "local"
full = "0 2 * * *"
"#
}
