//! MySQL connector built on `mysqldump` and `mysql`

use super::postgres::non_empty_lines;
use super::{Connector, DatabaseInfo, RestoreMode, TableSelection};
use crate::config::DatabaseConfig;
use crate::utils::command::{
    ensure_tool, feed_command_input, run_command_stdout, stream_command_output, ToolCommand,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

const QUERY_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_PORT: u16 = 3306;

pub struct MysqlConnector {
    name: String,
    database: String,
    host: String,
    port: u16,
    user: String,
    password: String,
}

impl MysqlConnector {
    pub fn new(name: &str, config: &DatabaseConfig) -> Self {
        Self {
            name: name.to_string(),
            database: config.server_database(name).to_string(),
            host: config.host.clone(),
            port: config.port.unwrap_or(DEFAULT_PORT),
            user: config.user.clone(),
            password: config.password.clone(),
        }
    }

    fn tool(&self, program: &str) -> ToolCommand {
        let mut command = ToolCommand::new(program)
            .arg(format!("--host={}", self.host))
            .arg(format!("--port={}", self.port));
        if !self.user.is_empty() {
            command = command.arg(format!("--user={}", self.user));
        }
        command.env("MYSQL_PWD", &self.password)
    }

    fn dump_command(&self, selection: &TableSelection) -> ToolCommand {
        let command = self
            .tool("mysqldump")
            .args(["--single-transaction", "--routines", "--triggers", "--events"]);
        match selection {
            TableSelection::All => command
                .arg("--add-drop-database")
                .args(["--databases", self.database.as_str()]),
            TableSelection::Tables(tables) => command
                .arg(self.database.as_str())
                .args(tables.iter().cloned()),
        }
    }

    fn restore_command(&self) -> ToolCommand {
        self.tool("mysql").arg(self.database.as_str())
    }

    async fn query(&self, sql: &str) -> Result<String> {
        let command = self
            .tool("mysql")
            .args(["--batch", "--skip-column-names"])
            .args(["--execute", sql])
            .arg(self.database.as_str());
        run_command_stdout(&command, Some(QUERY_TIMEOUT)).await
    }
}

#[async_trait]
impl Connector for MysqlConnector {
    fn engine(&self) -> &'static str {
        "mysql"
    }

    fn database_name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        for tool in ["mysql", "mysqldump"] {
            ensure_tool(tool)?;
        }
        self.query("SELECT 1")
            .await
            .with_context(|| format!("Cannot reach MySQL at {}:{}", self.host, self.port))?;
        debug!("Connected to MySQL database '{}'", self.database);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let output = self.query("SHOW TABLES").await?;
        Ok(non_empty_lines(&output))
    }

    async fn describe(&self) -> Result<DatabaseInfo> {
        let output = self
            .query(
                "SELECT VERSION(), COALESCE(SUM(data_length + index_length), 0), COUNT(*) \
                 FROM information_schema.tables WHERE table_schema = DATABASE()",
            )
            .await?;
        let line = output.lines().next().unwrap_or_default();
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 3 {
            anyhow::bail!("Unexpected describe output from mysql: {}", line);
        }

        Ok(DatabaseInfo {
            engine: "mysql".to_string(),
            name: self.name.clone(),
            version: Some(fields[0].to_string()),
            size_bytes: fields[1].trim().parse().ok(),
            table_count: fields[2].trim().parse().unwrap_or(0),
        })
    }

    async fn dump(
        &self,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        selection: &TableSelection,
    ) -> Result<u64> {
        if selection.is_empty() {
            return Ok(0);
        }
        let written = stream_command_output(&self.dump_command(selection), sink).await?;
        info!("Dumped MySQL database '{}' ({} bytes)", self.database, written);
        Ok(written)
    }

    async fn restore(&self, source: &mut (dyn AsyncRead + Send + Unpin), mode: RestoreMode) -> Result<()> {
        // Table dumps carry DROP TABLE IF EXISTS, so merging is plain replay
        let fed = feed_command_input(&self.restore_command(), source, mode == RestoreMode::Merge).await?;
        debug!("Fed {} bytes to mysql", fed);
        Ok(())
    }

    async fn table_checksums(&self, tables: &[String]) -> Result<BTreeMap<String, String>> {
        if tables.is_empty() {
            return Ok(BTreeMap::new());
        }
        let output = self
            .query(&format!("CHECKSUM TABLE {}", backtick_list(tables)))
            .await?;
        Ok(parse_checksum_output(&self.database, &output))
    }

    async fn drop_tables(&self, tables: &[String]) -> Result<()> {
        if tables.is_empty() {
            return Ok(());
        }
        self.query(&format!("DROP TABLE IF EXISTS {}", backtick_list(tables)))
            .await?;
        debug!("Dropped {} tables from '{}'", tables.len(), self.database);
        Ok(())
    }
}

fn backtick_list(tables: &[String]) -> String {
    let quoted: Vec<String> = tables
        .iter()
        .map(|t| format!("`{}`", t.replace('`', "``")))
        .collect();
    quoted.join(", ")
}

/// Parse `CHECKSUM TABLE` rows (`db.table<TAB>checksum`)
fn parse_checksum_output(database: &str, output: &str) -> BTreeMap<String, String> {
    let qualified = format!("{}.", database);
    output
        .lines()
        .filter_map(|line| {
            let (table, checksum) = line.split_once('\t')?;
            let table = table.strip_prefix(&qualified).unwrap_or(table);
            Some((table.to_string(), checksum.trim().to_string()))
        })
        .collect()
}
