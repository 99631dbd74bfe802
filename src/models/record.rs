//! Backup records, options and the retention policy type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// Kind of backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Full,
    Incremental,
    Differential,
}

impl BackupKind {
    pub const ALL: [BackupKind; 3] = [
        BackupKind::Full,
        BackupKind::Incremental,
        BackupKind::Differential,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
            BackupKind::Differential => "differential",
        }
    }

    /// Incremental and differential backups depend on a base full backup
    pub fn requires_base(&self) -> bool {
        !matches!(self, BackupKind::Full)
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for BackupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(BackupKind::Full),
            "incremental" => Ok(BackupKind::Incremental),
            "differential" => Ok(BackupKind::Differential),
            other => Err(format!(
                "unknown backup type '{}' (expected full, incremental or differential)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Success,
    Failed,
}

/// Everything known about one backup attempt.
///
/// Successful records are rebuilt from storage object metadata on every
/// catalog query. Failed records are only ever handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub kind: BackupKind,
    /// Engine type of the source database (sqlite, postgres, ...)
    pub engine: String,
    pub source_database: String,
    /// Full backup this record is defined relative to (never set for full backups)
    pub base_backup_id: Option<String>,
    /// Backup the change set was computed against
    pub parent_backup_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub storage_path: String,
    pub compressed: bool,
    pub tables_included: Vec<String>,
    #[serde(default)]
    pub table_checksums: BTreeMap<String, String>,
    /// Tables of the reference backup that no longer exist; restore drops them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables_dropped: Vec<String>,
    pub status: BackupStatus,
    pub error_detail: Option<String>,
}

impl BackupRecord {
    pub fn is_success(&self) -> bool {
        self.status == BackupStatus::Success
    }

    /// The backup that has to be applied before this one on restore
    pub fn predecessor(&self) -> Option<&str> {
        self.parent_backup_id
            .as_deref()
            .or(self.base_backup_id.as_deref())
    }

    pub fn duration_secs(&self) -> u64 {
        (self.completed_at - self.started_at).num_seconds().max(0) as u64
    }
}

/// Caller-supplied options for one backup run
#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub kind: BackupKind,
    pub compress: bool,
    pub source_db: String,
    pub dest_storage: String,
    pub include_tables: BTreeSet<String>,
    pub exclude_tables: BTreeSet<String>,
    /// Upper bound on the stored (encoded) size in bytes
    pub max_size: Option<u64>,
}

impl BackupOptions {
    pub fn new(kind: BackupKind, source_db: &str, dest_storage: &str) -> Self {
        Self {
            kind,
            compress: true,
            source_db: source_db.to_string(),
            dest_storage: dest_storage.to_string(),
            include_tables: BTreeSet::new(),
            exclude_tables: BTreeSet::new(),
            max_size: None,
        }
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_include<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_tables.extend(tables.into_iter().map(Into::into));
        self
    }

    pub fn with_exclude<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_tables.extend(tables.into_iter().map(Into::into));
        self
    }

    pub fn with_max_size(mut self, max_size: Option<u64>) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn has_table_filter(&self) -> bool {
        !self.include_tables.is_empty() || !self.exclude_tables.is_empty()
    }
}

/// Retention bounds for one (database, kind) group. Zero disables a bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub retention_days: u32,
    pub max_backups: u32,
}

/// One object as reported by a storage provider
#[derive(Debug, Clone, PartialEq)]
pub struct StorageObject {
    pub path: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

/// Outcome of restoring a backup chain
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub backup_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Backups applied, oldest first
    pub applied: Vec<String>,
    pub tables_restored: Vec<String>,
    /// Set when the dump was written to a file instead of the database
    pub output_file: Option<String>,
    pub success: bool,
    pub error_detail: Option<String>,
}
