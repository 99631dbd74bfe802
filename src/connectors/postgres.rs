//! PostgreSQL connector built on `pg_dump`, `pg_restore` and `psql`

use super::{quote_ident, Connector, DatabaseInfo, RestoreMode, TableSelection};
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
const DEFAULT_PORT: u16 = 5432;

pub struct PostgresConnector {
    name: String,
    database: String,
    host: String,
    port: u16,
    user: String,
    password: String,
}

impl PostgresConnector {
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
            .args(["--host", self.host.as_str()])
            .args(["--port".to_string(), self.port.to_string()]);
        if !self.user.is_empty() {
            command = command.args(["--username", self.user.as_str()]);
        }
        command
            .arg("--no-password")
            .env("PGPASSWORD", &self.password)
    }

    fn dump_command(&self, selection: &TableSelection) -> ToolCommand {
        let mut command = self
            .tool("pg_dump")
            .args(["--format=custom", "--blobs"])
            .arg(format!("--dbname={}", self.database));
        if let TableSelection::Tables(tables) = selection {
            for table in tables {
                command = command.arg(format!("--table={}", quote_ident(table)));
            }
        }
        command
    }

    fn restore_command(&self) -> ToolCommand {
        self.tool("pg_restore")
            .args(["--clean", "--if-exists", "--no-owner", "--single-transaction"])
            .arg(format!("--dbname={}", self.database))
    }

    async fn query(&self, sql: &str) -> Result<String> {
        let command = self
            .tool("psql")
            .args(["--no-align", "--tuples-only", "--quiet"])
            .arg(format!("--dbname={}", self.database))
            .args(["--command", sql]);
        run_command_stdout(&command, Some(QUERY_TIMEOUT)).await
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    fn engine(&self) -> &'static str {
        "postgres"
    }

    fn database_name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        for tool in ["psql", "pg_dump", "pg_restore"] {
            ensure_tool(tool)?;
        }
        self.query("SELECT 1")
            .await
            .with_context(|| format!("Cannot reach PostgreSQL at {}:{}", self.host, self.port))?;
        debug!("Connected to PostgreSQL database '{}'", self.database);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let output = self
            .query("SELECT tablename FROM pg_tables WHERE schemaname = current_schema() ORDER BY tablename")
            .await?;
        Ok(non_empty_lines(&output))
    }

    async fn describe(&self) -> Result<DatabaseInfo> {
        let output = self
            .query(
                "SELECT current_setting('server_version'), pg_database_size(current_database()), \
                 (SELECT count(*) FROM pg_tables WHERE schemaname = current_schema())",
            )
            .await?;
        let line = output.lines().next().unwrap_or_default();
        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() != 3 {
            anyhow::bail!("Unexpected describe output from psql: {}", line);
        }

        Ok(DatabaseInfo {
            engine: "postgres".to_string(),
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
        info!("Dumped PostgreSQL database '{}' ({} bytes)", self.database, written);
        Ok(written)
    }

    async fn restore(&self, source: &mut (dyn AsyncRead + Send + Unpin), mode: RestoreMode) -> Result<()> {
        // A custom-format archive drops and recreates only the objects it holds
        let fed = feed_command_input(&self.restore_command(), source, mode == RestoreMode::Merge).await?;
        debug!("Fed {} bytes to pg_restore", fed);
        Ok(())
    }

    async fn table_checksums(&self, tables: &[String]) -> Result<BTreeMap<String, String>> {
        let mut checksums = BTreeMap::new();
        for table in tables {
            let sql = format!(
                "SELECT md5(coalesce(string_agg(t::text, '|' ORDER BY t::text), '')) FROM {} t",
                quote_ident(table)
            );
            let output = self.query(&sql).await?;
            checksums.insert(table.clone(), output.trim().to_string());
        }
        Ok(checksums)
    }

    async fn drop_tables(&self, tables: &[String]) -> Result<()> {
        if tables.is_empty() {
            return Ok(());
        }
        self.query(&drop_statement(tables)).await?;
        debug!("Dropped {} tables from '{}'", tables.len(), self.database);
        Ok(())
    }
}

fn drop_statement(tables: &[String]) -> String {
    let quoted: Vec<String> = tables.iter().map(|t| quote_ident(t)).collect();
    format!("DROP TABLE IF EXISTS {}", quoted.join(", "))
}

pub(super) fn non_empty_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
