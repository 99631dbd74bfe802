//! Database connectors
//!
//! A connector knows how to introspect one database engine and how to turn
//! a selection of its tables into a forward-only dump stream and back.

mod mongodb;
mod mysql;
mod postgres;
mod sqlite;

pub use self::mongodb::MongoConnector;
pub use self::mysql::MysqlConnector;
pub use self::postgres::PostgresConnector;
pub use self::sqlite::SqliteConnector;

use crate::config::{DatabaseConfig, DatabaseType};
use crate::error::{BackupError, BackupResult, Unsupported};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// How a restore stream is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    /// Replace the whole database (full backups)
    Replace,
    /// Replace only the tables present in the stream (incremental/differential)
    Merge,
}

/// Which tables a dump covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSelection {
    /// The whole database, including non-table objects
    All,
    /// Exactly these tables; an empty list produces an empty dump
    Tables(Vec<String>),
}

impl TableSelection {
    pub fn is_empty(&self) -> bool {
        matches!(self, TableSelection::Tables(t) if t.is_empty())
    }
}

/// Summary returned by [`Connector::describe`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub engine: String,
    pub name: String,
    pub version: Option<String>,
    pub size_bytes: Option<u64>,
    pub table_count: usize,
}

/// Capability set of one database engine
#[async_trait]
pub trait Connector: Send + Sync {
    /// Engine type, used as the first storage path segment
    fn engine(&self) -> &'static str;

    /// Configured name of the database
    fn database_name(&self) -> &str;

    async fn connect(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Table (or collection) names in engine order
    async fn list_tables(&self) -> Result<Vec<String>>;

    async fn describe(&self) -> Result<DatabaseInfo>;

    /// Write a self-contained dump of the selection into the sink
    async fn dump(
        &self,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        selection: &TableSelection,
    ) -> Result<u64>;

    /// Apply a dump destructively. A failure can leave the target partially restored.
    async fn restore(&self, source: &mut (dyn AsyncRead + Send + Unpin), mode: RestoreMode) -> Result<()>;

    /// Content checksum per table, used to detect changed tables
    async fn table_checksums(&self, _tables: &[String]) -> Result<BTreeMap<String, String>> {
        Err(Unsupported(format!("table checksums for {}", self.engine())).into())
    }

    /// Drop tables that a merged backup recorded as gone; missing ones are ignored
    async fn drop_tables(&self, _tables: &[String]) -> Result<()> {
        Err(Unsupported(format!("dropping tables on {}", self.engine())).into())
    }
}

/// Build the connector for a configured database
pub fn create_connector(name: &str, config: &DatabaseConfig) -> BackupResult<Arc<dyn Connector>> {
    let connector: Arc<dyn Connector> = match config.db_type {
        DatabaseType::Sqlite => {
            let path = config.file_path.as_deref().ok_or_else(|| {
                BackupError::Config(format!("Database '{}': sqlite requires file_path", name))
            })?;
            Arc::new(SqliteConnector::new(name, crate::config::expand_tilde(path)))
        }
        DatabaseType::Postgres => Arc::new(PostgresConnector::new(name, config)),
        DatabaseType::Mysql => Arc::new(MysqlConnector::new(name, config)),
        DatabaseType::Mongodb => Arc::new(MongoConnector::new(name, config)),
    };
    Ok(connector)
}

/// Quote an identifier for SQL engines that use double quotes
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
