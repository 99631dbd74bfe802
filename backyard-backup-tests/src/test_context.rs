//! Test context and harness for command and integration tests
//!
//! Provides a unified context for setting up and tearing down test environments.

use crate::config_builder::ConfigBuilder;
use crate::mocks::{MemoryProvider, ScriptedConnector};
use backyard_backup::config::Config;
use backyard_backup::connectors::Connector;
use backyard_backup::managers::backup::BackupManager;
use backyard_backup::managers::catalog::Catalog;
use backyard_backup::providers::Provider;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Test context that owns a persisted configuration and its temp directory
pub struct TestContext {
    /// Temporary directory for test files
    temp_dir: TempDir,
    config: Config,
    config_path: PathBuf,
}

impl TestContext {
    /// Context with one sqlite database "test" and one local storage "local"
    pub fn new() -> Self {
        Self::from_builder(ConfigBuilder::minimal())
    }

    /// Create a test context from a ConfigBuilder
    pub fn from_builder(builder: ConfigBuilder) -> Self {
        let (config, temp_dir, config_path) = builder.persist();
        Self {
            temp_dir,
            config,
            config_path,
        }
    }

    /// Get the temporary directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn manager(&self) -> BackupManager {
        BackupManager::new(self.config.clone())
    }

    /// File of a configured sqlite database
    pub fn sqlite_path(&self, database: &str) -> PathBuf {
        self.config.databases[database]
            .file_path
            .clone()
            .expect("database has no file_path")
    }

    /// Root directory of a configured local storage
    pub fn storage_path(&self, storage: &str) -> PathBuf {
        self.config.storage[storage]
            .base_path
            .clone()
            .expect("storage has no base_path")
    }

    /// Data files (not sidecars or partials) under a local storage
    pub fn stored_objects(&self, storage: &str) -> Vec<PathBuf> {
        let mut found = Vec::new();
        collect_files(&self.storage_path(storage), &mut found);
        found.retain(|p| {
            let name = p.to_string_lossy();
            !name.ends_with(".metadata") && !name.ends_with(".partial")
        });
        found.sort();
        found
    }

    /// Create a subdirectory in the temp dir
    pub fn create_subdir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&path).expect("Failed to create subdirectory");
        path
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_files(dir: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, found);
        } else {
            found.push(path);
        }
    }
}

/// In-memory connector and provider sharing one catalog
pub struct MemoryHarness {
    pub connector: Arc<ScriptedConnector>,
    pub provider: Arc<MemoryProvider>,
}

impl MemoryHarness {
    pub fn new(connector: ScriptedConnector, provider: MemoryProvider) -> Self {
        Self {
            connector: Arc::new(connector),
            provider: Arc::new(provider),
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }

    pub fn provider(&self) -> Arc<dyn Provider> {
        self.provider.clone()
    }

    pub fn catalog(&self) -> Catalog {
        Catalog::new(self.provider())
    }
}
