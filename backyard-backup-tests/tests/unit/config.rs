//! Configuration parsing, validation and name resolution

use backyard_backup::config::{parse_config, ConfigError, DatabaseType, OrphanPolicy, StorageType};
use backyard_backup::managers::scheduler::ScheduleRegistry;
use backyard_backup::models::BackupKind;
use test_utils::{invalid_schedule_config_toml, ConfigBuilder, ScheduleConfig};

#[test]
fn test_defaults_for_missing_global_section() {
    let config = parse_config(
        r#"
[databases.app]
type = "sqlite"
file_path = "/tmp/app.db"
"#,
    )
    .unwrap();

    assert_eq!(config.global.chunk_size_kb, 64);
    assert_eq!(config.global.conduit_depth, 8);
    assert_eq!(config.global.orphan_policy, OrphanPolicy::Delete);
    assert!(config.global.compression);
    assert_eq!(config.databases["app"].db_type, DatabaseType::Sqlite);
}

#[test]
fn test_all_storage_types_parse() {
    let config = parse_config(
        r#"
[storage.disk]
type = "local"
base_path = "/srv/backups"

[storage.bucket]
type = "s3"
bucket = "backups"
endpoint = "http://localhost:9000"

[storage.gcs]
type = "gcs"
bucket = "b"

[storage.azure]
type = "azure"
"#,
    )
    .unwrap();

    assert_eq!(config.storage["disk"].storage_type, StorageType::Local);
    assert_eq!(config.storage["bucket"].region, "us-east-1");
    assert_eq!(config.storage["gcs"].storage_type, StorageType::Gcs);
    assert_eq!(config.storage["azure"].storage_type, StorageType::Azure);
}

#[test]
fn test_schedule_must_reference_known_database() {
    let err = parse_config(invalid_schedule_config_toml()).unwrap_err();
    assert!(matches!(err, ConfigError::DatabaseNotFound(ref name) if name == "missing"));
}

#[test]
fn test_invalid_cron_is_rejected() {
    let err = parse_config(
        r#"
[databases.app]
type = "sqlite"
file_path = "/tmp/app.db"

[storage.local]
type = "local"
base_path = "/tmp/backups"

[schedules.nightly]
database = "app"
storage = "local"
full = "every night"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError(_)));
}

#[test]
fn test_server_database_requires_host() {
    let err = parse_config(
        r#"
[databases.pg]
type = "postgres"
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("requires host"));
}

#[test]
fn test_unknown_names_do_not_resolve() {
    let config = ConfigBuilder::minimal().build();
    assert!(config.resolve_database("test").is_ok());
    assert!(matches!(
        config.resolve_database("nope"),
        Err(ConfigError::DatabaseNotFound(_))
    ));
    assert!(matches!(
        config.resolve_storage("nope"),
        Err(ConfigError::StorageNotFound(_))
    ));
}

#[test]
fn test_schedule_registry_from_config() {
    let config = ConfigBuilder::minimal()
        .add_custom_schedule(
            "hourly",
            ScheduleConfig {
                database: "test".to_string(),
                storage: "local".to_string(),
                full: Some("0 3 * * 0".to_string()),
                incremental: Some("0 * * * *".to_string()),
                differential: None,
                retention_days: 7,
                max_backups: 0,
                include_tables: vec![],
                exclude_tables: vec![],
                compress: Some(false),
            },
        )
        .build();

    let registry = ScheduleRegistry::from_config(&config).unwrap();
    let tasks = registry.for_schedule("hourly");
    assert_eq!(tasks.len(), 2);
    assert_eq!(registry.get("hourly-incremental").unwrap().kind, BackupKind::Incremental);
    assert_eq!(config.schedules["hourly"].retention().max_backups, 0);
}
