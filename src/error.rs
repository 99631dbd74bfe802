//! Error taxonomy for backup, restore and catalog operations

use crate::config::ConfigError;
use crate::models::{BackupRecord, RestoreReport};

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to connect to database '{database}': {cause:#}")]
    Connection {
        database: String,
        cause: anyhow::Error,
    },

    #[error("Transfer failed for backup {backup_id}: {message}")]
    Transfer {
        backup_id: String,
        message: String,
        /// Partially populated record describing the failed attempt
        record: Option<Box<BackupRecord>>,
    },

    #[error("No full backup found for database '{0}'")]
    NoBaseBackupFound(String),

    #[error("Backup '{0}' not found")]
    NotFound(String),

    #[error("{0} is not implemented")]
    NotImplemented(String),

    #[error("Backup chain for '{backup_id}' is broken: '{missing}' is no longer in storage")]
    BrokenChain { backup_id: String, missing: String },

    #[error("Storage operation failed: {0:#}")]
    Storage(anyhow::Error),

    #[error("Operation cancelled: {what}")]
    Cancelled {
        what: String,
        /// Record of the interrupted backup, marked failed
        record: Option<Box<BackupRecord>>,
        /// Progress of the interrupted restore
        report: Option<Box<RestoreReport>>,
    },

    #[error("{0}")]
    Lock(String),

    #[error(
        "Restore of backup {} failed: {}",
        .0.backup_id,
        .0.error_detail.as_deref().unwrap_or("unknown error")
    )]
    Restore(Box<RestoreReport>),
}

pub type BackupResult<T> = std::result::Result<T, BackupError>;

impl BackupError {
    /// Record of the failed attempt, when one could be assembled
    pub fn record(&self) -> Option<&BackupRecord> {
        match self {
            BackupError::Transfer { record, .. } | BackupError::Cancelled { record, .. } => record.as_deref(),
            _ => None,
        }
    }

    /// Report of the failed restore, when the chain was resolved
    pub fn restore_report(&self) -> Option<&RestoreReport> {
        match self {
            BackupError::Restore(report) => Some(report),
            BackupError::Cancelled { report, .. } => report.as_deref(),
            _ => None,
        }
    }
}

impl From<ConfigError> for BackupError {
    fn from(err: ConfigError) -> Self {
        BackupError::Config(err.to_string())
    }
}

/// Marker error for capabilities an engine or backend does not offer.
///
/// Connectors and providers return it inside `anyhow::Error`; the
/// orchestration layer downcasts it into [`BackupError::NotImplemented`].
#[derive(Debug, thiserror::Error)]
#[error("{0} is not implemented")]
pub struct Unsupported(pub String);

pub fn is_unsupported(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Unsupported>().is_some()
}
