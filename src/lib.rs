//! Backyard Backup Library
//!
//! Streams database dumps into object storage. Backups are full, incremental
//! or differential, and the storage metadata is the only catalog.

pub mod config;
pub mod connectors;
pub mod error;
pub mod managers;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod strategies;
pub mod utils;

// Re-export commonly used types
pub use config::{load_config, Config};
pub use connectors::{create_connector, Connector, RestoreMode, TableSelection};
pub use error::{BackupError, BackupResult};
pub use managers::backup::{BackupManager, RestoreRequest};
pub use managers::catalog::Catalog;
pub use managers::logging::{init_console_logging, init_logging, LogGuard, LoggingConfig};
pub use managers::notification::NotificationManager;
pub use models::{BackupKind, BackupOptions, BackupRecord, BackupStatus, RestoreReport, RetentionPolicy};
pub use providers::{create_provider, Provider};
