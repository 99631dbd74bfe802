//! SQLite connector
//!
//! Dumps are consistent database files produced with `VACUUM INTO`, with
//! unselected tables dropped from the copy. Replace restores swap the file in
//! with a rename; merge restores attach the dump and rebuild only the tables
//! it contains.

use super::{quote_ident, Connector, DatabaseInfo, RestoreMode, TableSelection};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

const TABLES_QUERY: &str =
    "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

pub struct SqliteConnector {
    name: String,
    path: PathBuf,
    /// At most one open connection
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteConnector {
    pub fn new(name: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            path: path.into(),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run blocking work against the open connection
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| anyhow::anyhow!("SQLite connection lock poisoned"))?;
            let conn = guard
                .as_ref()
                .with_context(|| format!("Database '{}' is not connected", name))?;
            f(conn)
        })
        .await
        .context("SQLite worker task failed")?
    }

    fn open(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {:?}", path))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    fn engine(&self) -> &'static str {
        "sqlite"
    }

    fn database_name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
            let opened = Self::open(&path)?;
            opened
                .query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
                .with_context(|| format!("{:?} is not a readable SQLite database", path))?;
            let mut guard = conn
                .lock()
                .map_err(|_| anyhow::anyhow!("SQLite connection lock poisoned"))?;
            *guard = Some(opened);
            Ok::<(), anyhow::Error>(())
        })
        .await
        .context("SQLite worker task failed")??;

        debug!("Connected to SQLite database {:?}", self.path);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("SQLite connection lock poisoned"))?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| e).context("Failed to close SQLite connection")?;
        }
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| table_names(conn, "main")).await
    }

    async fn describe(&self) -> Result<DatabaseInfo> {
        let name = self.name.clone();
        self.with_conn(move |conn| {
            let version: String = conn.query_row("SELECT sqlite_version()", [], |r| r.get(0))?;
            let page_count: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
            let page_size: i64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
            Ok(DatabaseInfo {
                engine: "sqlite".to_string(),
                name,
                version: Some(version),
                size_bytes: Some((page_count * page_size).max(0) as u64),
                table_count: table_names(conn, "main")?.len(),
            })
        })
        .await
    }

    async fn dump(
        &self,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        selection: &TableSelection,
    ) -> Result<u64> {
        if selection.is_empty() {
            debug!("No tables selected, writing empty dump");
            return Ok(0);
        }

        let workdir = tempfile::Builder::new()
            .prefix("backyard-sqlite-")
            .tempdir()
            .context("Failed to create dump directory")?;
        let snapshot = workdir.path().join("snapshot.db");

        let target = snapshot.clone();
        let keep = match selection {
            TableSelection::All => None,
            TableSelection::Tables(tables) => Some(tables.clone()),
        };
        self.with_conn(move |conn| {
            let literal = target.to_string_lossy().replace('\'', "''");
            conn.execute_batch(&format!("VACUUM INTO '{}'", literal))
                .context("VACUUM INTO failed")?;

            if let Some(keep) = keep {
                let copy = Connection::open(&target)?;
                for table in table_names(&copy, "main")? {
                    if !keep.contains(&table) {
                        copy.execute_batch(&format!("DROP TABLE {}", quote_ident(&table)))?;
                    }
                }
                copy.execute_batch("VACUUM")?;
            }
            Ok(())
        })
        .await?;

        let mut file = tokio::fs::File::open(&snapshot)
            .await
            .context("Failed to open dump snapshot")?;
        let copied = tokio::io::copy(&mut file, sink)
            .await
            .context("Failed to stream SQLite dump")?;

        info!("Dumped SQLite database '{}' ({} bytes)", self.name, copied);
        Ok(copied)
    }

    async fn restore(&self, source: &mut (dyn AsyncRead + Send + Unpin), mode: RestoreMode) -> Result<()> {
        let staged = staging_path(&self.path);
        let written = {
            let mut file = tokio::fs::File::create(&staged)
                .await
                .with_context(|| format!("Failed to create {:?}", staged))?;
            let copied = tokio::io::copy(source, &mut file).await;
            match copied {
                Ok(n) => {
                    file.sync_all().await?;
                    n
                }
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&staged).await;
                    return Err(anyhow::Error::new(e).context("Failed to read restore stream"));
                }
            }
        };

        let result = match mode {
            RestoreMode::Replace => self.replace_with(&staged).await,
            RestoreMode::Merge if written == 0 => {
                debug!("Empty change set for '{}', nothing to merge", self.name);
                Ok(())
            }
            RestoreMode::Merge => {
                let incoming = staged.clone();
                self.with_conn(move |conn| merge_from(conn, &incoming)).await
            }
        };

        if tokio::fs::try_exists(&staged).await.unwrap_or(false) {
            let _ = tokio::fs::remove_file(&staged).await;
        }
        result
    }

    async fn table_checksums(&self, tables: &[String]) -> Result<BTreeMap<String, String>> {
        let tables = tables.to_vec();
        self.with_conn(move |conn| {
            let mut checksums = BTreeMap::new();
            for table in tables {
                checksums.insert(table.clone(), table_checksum(conn, &table)?);
            }
            Ok(checksums)
        })
        .await
    }

    async fn drop_tables(&self, tables: &[String]) -> Result<()> {
        let count = tables.len();
        let tables = tables.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            for table in &tables {
                tx.execute_batch(&format!("DROP TABLE IF EXISTS main.{}", quote_ident(table)))
                    .with_context(|| format!("Failed to drop table '{}'", table))?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?;
        debug!("Dropped {} tables from '{}'", count, self.name);
        Ok(())
    }
}

impl SqliteConnector {
    /// Swap the staged file in for the database file and reopen
    async fn replace_with(&self, staged: &Path) -> Result<()> {
        {
            let check = Self::open(staged)?;
            check
                .query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
                .context("Restore stream is not a SQLite database")?;
        }

        let conn = Arc::clone(&self.conn);
        let path = self.path.clone();
        let staged = staged.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| anyhow::anyhow!("SQLite connection lock poisoned"))?;
            let was_connected = guard.take().is_some();

            for suffix in ["-wal", "-shm"] {
                let mut side = path.as_os_str().to_owned();
                side.push(suffix);
                let _ = std::fs::remove_file(PathBuf::from(side));
            }
            std::fs::rename(&staged, &path)
                .with_context(|| format!("Failed to move restored database into {:?}", path))?;

            if was_connected {
                *guard = Some(Self::open(&path)?);
            }
            Ok::<(), anyhow::Error>(())
        })
        .await
        .context("SQLite worker task failed")??;

        info!("Replaced SQLite database '{}'", self.name);
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(format!(".restore-{}", uuid::Uuid::new_v4()));
    PathBuf::from(os)
}

fn table_names(conn: &Connection, schema: &str) -> Result<Vec<String>> {
    let query = TABLES_QUERY.replace("sqlite_master", &format!("{}.sqlite_master", schema));
    let mut stmt = conn.prepare(&query)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

/// Rebuild every table found in `incoming` inside the main database
fn merge_from(conn: &Connection, incoming: &Path) -> Result<()> {
    let literal = incoming.to_string_lossy().replace('\'', "''");
    conn.execute_batch(&format!("ATTACH DATABASE '{}' AS incoming", literal))
        .context("Failed to attach restore stream")?;

    let merged = (|| -> Result<usize> {
        let tables: Vec<(String, String)> = {
            let mut stmt = conn.prepare(
                "SELECT name, sql FROM incoming.sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND sql IS NOT NULL",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let tx = conn.unchecked_transaction()?;
        for (name, create_sql) in &tables {
            let quoted = quote_ident(name);
            tx.execute_batch(&format!("DROP TABLE IF EXISTS main.{}", quoted))?;
            tx.execute_batch(create_sql)?;
            tx.execute_batch(&format!(
                "INSERT INTO main.{q} SELECT * FROM incoming.{q}",
                q = quoted
            ))?;

            let indexes: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT sql FROM incoming.sqlite_master \
                     WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL",
                )?;
                let rows = stmt
                    .query_map([name], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };
            for index_sql in indexes {
                tx.execute_batch(&index_sql)?;
            }
        }
        tx.commit()?;
        Ok(tables.len())
    })();

    conn.execute_batch("DETACH DATABASE incoming")
        .context("Failed to detach restore stream")?;

    let merged = merged.context("Failed to merge tables")?;
    debug!("Merged {} tables", merged);
    Ok(())
}

/// SHA-256 over a table's schema and every row value
fn table_checksum(conn: &Connection, table: &str) -> Result<String> {
    let mut hasher = Sha256::new();

    let schema: Option<String> = conn
        .query_row(
            "SELECT sql FROM main.sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .with_context(|| format!("Table '{}' not found", table))?;
    hasher.update(schema.unwrap_or_default().as_bytes());

    let mut stmt = conn.prepare(&format!("SELECT * FROM main.{}", quote_ident(table)))?;
    let columns = stmt.column_count();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        for idx in 0..columns {
            match row.get_ref(idx)? {
                ValueRef::Null => hasher.update(b"N"),
                ValueRef::Integer(i) => {
                    hasher.update(b"I");
                    hasher.update(i.to_le_bytes());
                }
                ValueRef::Real(f) => {
                    hasher.update(b"R");
                    hasher.update(f.to_bits().to_le_bytes());
                }
                ValueRef::Text(t) => {
                    hasher.update(b"T");
                    hasher.update((t.len() as u64).to_le_bytes());
                    hasher.update(t);
                }
                ValueRef::Blob(b) => {
                    hasher.update(b"B");
                    hasher.update((b.len() as u64).to_le_bytes());
                    hasher.update(b);
                }
            }
        }
        hasher.update(b"\n");
    }

    Ok(hex::encode(hasher.finalize()))
}
