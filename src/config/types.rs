use crate::models::{BackupKind, RetentionPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub databases: HashMap<String, DatabaseConfig>,
    #[serde(default)]
    pub storage: HashMap<String, StorageConfig>,
    #[serde(default)]
    pub schedules: HashMap<String, ScheduleConfig>,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Global configuration settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Logging configuration
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_max_files")]
    pub log_max_files: u32,

    /// Directory for per-database lock files
    #[serde(default = "default_lock_directory")]
    pub lock_directory: PathBuf,

    /// Timeout settings
    #[serde(default = "default_timeout")]
    pub default_timeout_seconds: u64,
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_seconds: u64,

    /// Streaming conduit sizing
    #[serde(default = "default_chunk_size_kb")]
    pub chunk_size_kb: usize,
    #[serde(default = "default_conduit_depth")]
    pub conduit_depth: usize,

    /// Compress dumps unless the caller says otherwise
    #[serde(default = "default_compression")]
    pub compression: bool,

    /// What to do with objects left behind by a failed transfer
    #[serde(default)]
    pub orphan_policy: OrphanPolicy,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_directory: default_log_directory(),
            log_level: default_log_level(),
            log_max_files: default_log_max_files(),
            lock_directory: default_lock_directory(),
            default_timeout_seconds: default_timeout(),
            cancel_grace_seconds: default_cancel_grace(),
            chunk_size_kb: default_chunk_size_kb(),
            conduit_depth: default_conduit_depth(),
            compression: default_compression(),
            orphan_policy: OrphanPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Best-effort delete of the partial object
    #[default]
    Delete,
    /// Leave the object for manual inspection
    Keep,
}

/// Database connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub db_type: DatabaseType,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Database name on the server (defaults to the configured name)
    #[serde(default)]
    pub database: Option<String>,
    /// Path to the database file (sqlite)
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Sqlite,
    Postgres,
    Mysql,
    Mongodb,
}

impl DatabaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::Sqlite => "sqlite",
            DatabaseType::Postgres => "postgres",
            DatabaseType::Mysql => "mysql",
            DatabaseType::Mongodb => "mongodb",
        }
    }
}

/// Storage backend settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// Root directory (local)
    #[serde(default)]
    pub base_path: Option<PathBuf>,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// Key prefix inside the bucket
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Local,
    S3,
    Gcs,
    Azure,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Local => "local",
            StorageType::S3 => "s3",
            StorageType::Gcs => "gcs",
            StorageType::Azure => "azure",
        }
    }
}

/// Recurring backups of one database into one storage
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    pub database: String,
    pub storage: String,

    /// Cron expressions per backup kind
    #[serde(default)]
    pub full: Option<String>,
    #[serde(default)]
    pub incremental: Option<String>,
    #[serde(default)]
    pub differential: Option<String>,

    /// Retention bounds (0 disables a bound)
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,

    #[serde(default)]
    pub include_tables: Vec<String>,
    #[serde(default)]
    pub exclude_tables: Vec<String>,
    #[serde(default)]
    pub compress: Option<bool>,
}

impl ScheduleConfig {
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            retention_days: self.retention_days,
            max_backups: self.max_backups,
        }
    }

    /// Cron expressions that are set, by backup kind
    pub fn cron_entries(&self) -> Vec<(BackupKind, &str)> {
        [
            (BackupKind::Full, self.full.as_deref()),
            (BackupKind::Incremental, self.incremental.as_deref()),
            (BackupKind::Differential, self.differential.as_deref()),
        ]
        .into_iter()
        .filter_map(|(kind, cron)| cron.map(|c| (kind, c)))
        .collect()
    }
}

/// Notification configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub slack_webhook_url: String,

    #[serde(default = "default_notify_on")]
    pub notify_on: Vec<NotifyEvent>,

    #[serde(default = "default_rate_limit")]
    pub rate_limit_minutes: u64,

    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            slack_webhook_url: String::new(),
            notify_on: default_notify_on(),
            rate_limit_minutes: default_rate_limit(),
            cache_file: default_cache_file(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NotifyEvent {
    Success,
    Failure,
}

// Default value functions

fn default_log_directory() -> PathBuf { PathBuf::from("~/.backyard-backup/logs") }
fn default_log_level() -> String { "info".to_string() }
fn default_log_max_files() -> u32 { 10 }
fn default_lock_directory() -> PathBuf { std::env::temp_dir() }
fn default_timeout() -> u64 { 1800 }
fn default_cancel_grace() -> u64 { 10 }
fn default_chunk_size_kb() -> usize { 64 }
fn default_conduit_depth() -> usize { 8 }
fn default_compression() -> bool { true }
fn default_region() -> String { "us-east-1".to_string() }
fn default_retention_days() -> u32 { 30 }
fn default_max_backups() -> u32 { 10 }
fn default_notify_on() -> Vec<NotifyEvent> {
    vec![NotifyEvent::Failure]
}
fn default_rate_limit() -> u64 { 60 }
fn default_cache_file() -> PathBuf {
    PathBuf::from("~/.cache/backyard-backup-notifications.json")
}
