//! Fluent API for building test configurations
//!
//! Provides a builder pattern for creating test configurations with sensible defaults.
//! Every path (logs, locks, sqlite files, local storage) lives in the builder's
//! temporary directory.

use backyard_backup::config::{
    Config, DatabaseConfig, DatabaseType, GlobalConfig, NotificationConfig, OrphanPolicy,
    ScheduleConfig, StorageConfig, StorageType,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builder for creating test configurations
pub struct ConfigBuilder {
    temp_dir: TempDir,
    global: GlobalConfig,
    databases: HashMap<String, DatabaseConfig>,
    storage: HashMap<String, StorageConfig>,
    schedules: HashMap<String, ScheduleConfig>,
    notifications: NotificationConfig,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder with minimal defaults
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let log_directory = temp_dir.path().join("logs");
        fs::create_dir_all(&log_directory).expect("Failed to create log_directory");

        let lock_directory = temp_dir.path().join("locks");
        fs::create_dir_all(&lock_directory).expect("Failed to create lock_directory");

        let global = GlobalConfig {
            log_directory,
            log_level: "debug".to_string(),
            log_max_files: 5,
            lock_directory,
            default_timeout_seconds: 300,
            cancel_grace_seconds: 2,
            chunk_size_kb: 4,
            conduit_depth: 4,
            compression: true,
            orphan_policy: OrphanPolicy::Delete,
        };

        Self {
            temp_dir,
            global,
            databases: HashMap::new(),
            storage: HashMap::new(),
            schedules: HashMap::new(),
            notifications: NotificationConfig::default(),
        }
    }

    /// One sqlite database "test" and one local storage "local"
    pub fn minimal() -> Self {
        Self::new()
            .add_sqlite_database("test")
            .add_local_storage("local")
    }

    /// Temporary directory holding every path of the configuration
    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Add a sqlite database stored at `<temp>/databases/<name>.sqlite`
    pub fn add_sqlite_database(mut self, name: &str) -> Self {
        let file_path = self.temp_dir.path().join("databases").join(format!("{}.sqlite", name));
        self.databases.insert(
            name.to_string(),
            DatabaseConfig {
                db_type: DatabaseType::Sqlite,
                host: String::new(),
                port: None,
                user: String::new(),
                password: String::new(),
                database: None,
                file_path: Some(file_path),
                options: HashMap::new(),
            },
        );
        self
    }

    /// Add a server database (never contacted by the unit tests)
    pub fn add_server_database(mut self, name: &str, db_type: DatabaseType) -> Self {
        self.databases.insert(
            name.to_string(),
            DatabaseConfig {
                db_type,
                host: "localhost".to_string(),
                port: None,
                user: "backup".to_string(),
                password: "secret".to_string(),
                database: None,
                file_path: None,
                options: HashMap::new(),
            },
        );
        self
    }

    /// Add a local storage rooted at `<temp>/storage/<name>`
    pub fn add_local_storage(mut self, name: &str) -> Self {
        let base_path = self.temp_dir.path().join("storage").join(name);
        self.storage.insert(
            name.to_string(),
            StorageConfig {
                storage_type: StorageType::Local,
                base_path: Some(base_path),
                bucket: String::new(),
                region: "us-east-1".to_string(),
                endpoint: None,
                access_key: String::new(),
                secret_key: String::new(),
                prefix: String::new(),
                options: HashMap::new(),
            },
        );
        self
    }

    /// Add a storage of a type that has no provider
    pub fn add_unimplemented_storage(mut self, name: &str, storage_type: StorageType) -> Self {
        self.storage.insert(
            name.to_string(),
            StorageConfig {
                storage_type,
                base_path: None,
                bucket: "bucket".to_string(),
                region: "us-east-1".to_string(),
                endpoint: None,
                access_key: String::new(),
                secret_key: String::new(),
                prefix: String::new(),
                options: HashMap::new(),
            },
        );
        self
    }

    /// Add a schedule with a nightly full backup
    pub fn add_schedule(self, name: &str, database: &str, storage: &str) -> Self {
        self.add_custom_schedule(
            name,
            ScheduleConfig {
                database: database.to_string(),
                storage: storage.to_string(),
                full: Some("0 2 * * *".to_string()),
                incremental: None,
                differential: None,
                retention_days: 30,
                max_backups: 10,
                include_tables: vec![],
                exclude_tables: vec![],
                compress: None,
            },
        )
    }

    pub fn add_custom_schedule(mut self, name: &str, schedule: ScheduleConfig) -> Self {
        self.schedules.insert(name.to_string(), schedule);
        self
    }

    pub fn with_orphan_policy(mut self, policy: OrphanPolicy) -> Self {
        self.global.orphan_policy = policy;
        self
    }

    pub fn with_compression(mut self, compression: bool) -> Self {
        self.global.compression = compression;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.global.default_timeout_seconds = seconds;
        self
    }

    /// Build the configuration (the temp dir is dropped with the builder!)
    pub fn build(self) -> Config {
        self.config()
    }

    fn config(&self) -> Config {
        Config {
            global: self.global.clone(),
            databases: self.databases.clone(),
            storage: self.storage.clone(),
            schedules: self.schedules.clone(),
            notifications: self.notifications.clone(),
        }
    }

    /// Build the configuration, write it to `<temp>/config.toml` and keep the temp dir alive
    pub fn persist(self) -> (Config, TempDir, PathBuf) {
        let config = self.config();
        let config_path = self.temp_dir.path().join("config.toml");
        let content = toml::to_string(&config).expect("Failed to serialize config");
        fs::write(&config_path, content).expect("Failed to write config");
        (config, self.temp_dir, config_path)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
