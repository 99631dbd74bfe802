//! Configuration module for backyard-backup
//!
//! Loads and validates the TOML configuration: global settings, named
//! databases, named storage backends, schedules and notifications.
//!
//! ## Example Usage
//!
//! ```no_run
//! use backyard_backup::config;
//!
//! let config = config::load_config("config.toml")?;
//! let database = config.resolve_database("app")?;
//! println!("engine: {}", database.db_type.as_str());
//! # Ok::<(), config::ConfigError>(())
//! ```

mod loader;
mod types;

pub use loader::{default_config_path, load_config, parse_config, validate_config, ConfigError, Result};
pub use types::*;

/// Expand tilde (~) in path
pub fn expand_tilde(path: &std::path::Path) -> std::path::PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

impl DatabaseConfig {
    /// Name of the database on the server, falling back to the configured name
    pub fn server_database<'a>(&'a self, configured_name: &'a str) -> &'a str {
        self.database.as_deref().unwrap_or(configured_name)
    }
}
