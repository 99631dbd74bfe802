use super::types::*;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database '{0}' not found in configuration")]
    DatabaseNotFound(String),

    #[error("Storage '{0}' not found in configuration")]
    StorageNotFound(String),

    #[error("Schedule '{0}' not found in configuration")]
    ScheduleNotFound(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Default config location: `~/.backyard-backup/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".backyard-backup")
        .join("config.toml")
}

/// Load and validate configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let contents = fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.global.chunk_size_kb == 0 || config.global.conduit_depth == 0 {
        return Err(ConfigError::ValidationError(
            "chunk_size_kb and conduit_depth must be greater than zero".to_string(),
        ));
    }

    for (name, database) in &config.databases {
        validate_database(name, database)?;
    }

    for (name, storage) in &config.storage {
        validate_storage(name, storage)?;
    }

    for (name, schedule) in &config.schedules {
        validate_schedule(name, schedule, config)?;
    }

    Ok(())
}

fn validate_database(name: &str, database: &DatabaseConfig) -> Result<()> {
    match database.db_type {
        DatabaseType::Sqlite => {
            if database.file_path.is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "Database '{}': sqlite requires file_path",
                    name
                )));
            }
        }
        DatabaseType::Postgres | DatabaseType::Mysql | DatabaseType::Mongodb => {
            if database.host.is_empty() && !database.options.contains_key("uri") {
                return Err(ConfigError::ValidationError(format!(
                    "Database '{}': {} requires host",
                    name,
                    database.db_type.as_str()
                )));
            }
        }
    }
    Ok(())
}

fn validate_storage(name: &str, storage: &StorageConfig) -> Result<()> {
    match storage.storage_type {
        StorageType::Local if storage.base_path.is_none() => Err(ConfigError::ValidationError(
            format!("Storage '{}': local storage requires base_path", name),
        )),
        StorageType::S3 if storage.bucket.is_empty() => Err(ConfigError::ValidationError(
            format!("Storage '{}': s3 storage requires bucket", name),
        )),
        _ => Ok(()),
    }
}

fn validate_schedule(name: &str, schedule: &ScheduleConfig, config: &Config) -> Result<()> {
    if !config.databases.contains_key(&schedule.database) {
        return Err(ConfigError::DatabaseNotFound(schedule.database.clone()));
    }
    if !config.storage.contains_key(&schedule.storage) {
        return Err(ConfigError::StorageNotFound(schedule.storage.clone()));
    }

    let entries = schedule.cron_entries();
    if entries.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "Schedule '{}': no cron expression set for any backup type",
            name
        )));
    }

    // Basic check: five whitespace separated fields
    for (kind, cron) in entries {
        if !crate::utils::cron::validate_cron_schedule(cron) {
            return Err(ConfigError::ValidationError(format!(
                "Schedule '{}': invalid {} cron expression (expected 5 fields): {}",
                name, kind, cron
            )));
        }
    }

    Ok(())
}

impl Config {
    /// Look up a database by its configured name
    pub fn resolve_database(&self, name: &str) -> Result<&DatabaseConfig> {
        self.databases
            .get(name)
            .ok_or_else(|| ConfigError::DatabaseNotFound(name.to_string()))
    }

    /// Look up a storage backend by its configured name
    pub fn resolve_storage(&self, name: &str) -> Result<&StorageConfig> {
        self.storage
            .get(name)
            .ok_or_else(|| ConfigError::StorageNotFound(name.to_string()))
    }

    pub fn resolve_schedule(&self, name: &str) -> Result<&ScheduleConfig> {
        self.schedules
            .get(name)
            .ok_or_else(|| ConfigError::ScheduleNotFound(name.to_string()))
    }
}
