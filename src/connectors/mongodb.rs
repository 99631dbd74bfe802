//! MongoDB connector built on `mongodump`, `mongorestore` and `mongosh`
//!
//! Collections play the role of tables. Content checksums are not available,
//! so incremental and differential backups of MongoDB copy every collection.

use super::postgres::non_empty_lines;
use super::{Connector, DatabaseInfo, RestoreMode, TableSelection};
use crate::config::DatabaseConfig;
use crate::utils::command::{
    ensure_tool, feed_command_input, run_command_stdout, stream_command_output, ToolCommand,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

const QUERY_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_PORT: u16 = 27017;

pub struct MongoConnector {
    name: String,
    database: String,
    uri: String,
}

#[derive(Debug, Deserialize)]
struct ServerSummary {
    version: String,
    #[serde(rename = "dataSize", default)]
    data_size: f64,
    collections: usize,
}

impl MongoConnector {
    pub fn new(name: &str, config: &DatabaseConfig) -> Self {
        Self {
            name: name.to_string(),
            database: config.server_database(name).to_string(),
            uri: connection_uri(config),
        }
    }

    fn dump_command(&self, excluded: &[String]) -> ToolCommand {
        let mut command = ToolCommand::new("mongodump")
            .arg(format!("--uri={}", self.uri))
            .arg(format!("--db={}", self.database))
            .arg("--archive");
        for collection in excluded {
            command = command.arg(format!("--excludeCollection={}", collection));
        }
        command
    }

    fn restore_command(&self, mode: RestoreMode) -> ToolCommand {
        let command = ToolCommand::new("mongorestore")
            .arg(format!("--uri={}", self.uri))
            .arg("--archive")
            .arg(format!("--nsInclude={}.*", self.database))
            .arg("--drop");
        match mode {
            RestoreMode::Replace => command.arg("--preserveUUID"),
            RestoreMode::Merge => command,
        }
    }

    async fn eval(&self, script: &str) -> Result<String> {
        let command = ToolCommand::new("mongosh")
            .arg(self.uri.as_str())
            .arg("--quiet")
            .args(["--eval", script]);
        run_command_stdout(&command, Some(QUERY_TIMEOUT)).await
    }

    fn sibling(&self) -> String {
        format!("db.getSiblingDB('{}')", self.database.replace('\'', "\\'"))
    }
}

#[async_trait]
impl Connector for MongoConnector {
    fn engine(&self) -> &'static str {
        "mongodb"
    }

    fn database_name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        for tool in ["mongosh", "mongodump", "mongorestore"] {
            ensure_tool(tool)?;
        }
        self.eval("db.runCommand({ ping: 1 }).ok")
            .await
            .context("Cannot reach MongoDB")?;
        debug!("Connected to MongoDB database '{}'", self.database);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let script = format!("{}.getCollectionNames().sort().join('\\n')", self.sibling());
        let output = self.eval(&script).await?;
        Ok(non_empty_lines(&output))
    }

    async fn describe(&self) -> Result<DatabaseInfo> {
        let script = format!(
            "const d = {}; const s = d.stats(); \
             print(JSON.stringify({{ version: db.version(), dataSize: s.dataSize, collections: s.collections }}))",
            self.sibling()
        );
        let output = self.eval(&script).await?;
        let summary: ServerSummary = serde_json::from_str(output.trim())
            .with_context(|| format!("Unexpected describe output from mongosh: {}", output.trim()))?;

        Ok(DatabaseInfo {
            engine: "mongodb".to_string(),
            name: self.name.clone(),
            version: Some(summary.version),
            size_bytes: Some(summary.data_size.max(0.0) as u64),
            table_count: summary.collections,
        })
    }

    async fn dump(
        &self,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        selection: &TableSelection,
    ) -> Result<u64> {
        let excluded = match selection {
            TableSelection::All => Vec::new(),
            TableSelection::Tables(keep) if keep.is_empty() => return Ok(0),
            TableSelection::Tables(keep) => self
                .list_tables()
                .await?
                .into_iter()
                .filter(|c| !keep.contains(c))
                .collect(),
        };
        let written = stream_command_output(&self.dump_command(&excluded), sink).await?;
        info!("Dumped MongoDB database '{}' ({} bytes)", self.database, written);
        Ok(written)
    }

    async fn restore(&self, source: &mut (dyn AsyncRead + Send + Unpin), mode: RestoreMode) -> Result<()> {
        let fed = feed_command_input(&self.restore_command(mode), source, mode == RestoreMode::Merge).await?;
        debug!("Fed {} bytes to mongorestore", fed);
        Ok(())
    }
}

/// Connection string from `options.uri` or the individual fields
fn connection_uri(config: &DatabaseConfig) -> String {
    if let Some(uri) = config.options.get("uri") {
        return uri.clone();
    }
    let credentials = if config.user.is_empty() {
        String::new()
    } else if config.password.is_empty() {
        format!("{}@", config.user)
    } else {
        format!("{}:{}@", config.user, config.password)
    };
    let host = if config.host.is_empty() { "localhost" } else { config.host.as_str() };
    format!(
        "mongodb://{}{}:{}/?authSource=admin",
        credentials,
        host,
        config.port.unwrap_or(DEFAULT_PORT)
    )
}
