//! Test utilities for backyard-backup
//!
//! This crate provides shared test utilities, in-memory collaborators,
//! and helper functions for testing the backyard-backup crate.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use test_utils::{ConfigBuilder, TestContext};
//!
//! #[tokio::test]
//! async fn my_test() {
//!     let ctx = TestContext::from_builder(
//!         ConfigBuilder::new().add_sqlite_database("test").add_local_storage("local"),
//!     );
//!     let manager = ctx.manager();
//!     // ... test code
//! }
//! ```

pub mod config_builder;
pub mod fixtures;
pub mod mocks;
pub mod test_context;

// Re-export commonly used items
pub use config_builder::ConfigBuilder;
pub use fixtures::*;
pub use mocks::{MemoryProvider, ScriptedConnector};
pub use test_context::{MemoryHarness, TestContext};

// Re-export types from the main crate for convenience
pub use backyard_backup::config::{
    Config, DatabaseConfig, DatabaseType, GlobalConfig, NotificationConfig, OrphanPolicy,
    ScheduleConfig, StorageConfig, StorageType,
};
pub use backyard_backup::models::{BackupKind, BackupOptions, BackupRecord, BackupStatus, RetentionPolicy};

/// Common test result type
pub type TestResult<T = ()> = anyhow::Result<T>;
