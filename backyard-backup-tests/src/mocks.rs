//! In-memory collaborators for orchestration tests
//!
//! [`MemoryProvider`] keeps objects in a map and only commits after a clean
//! end-of-stream, like the real providers. [`ScriptedConnector`] holds named
//! tables as strings and dumps them as `name\tcontent` lines.

use anyhow::{bail, Result};
use async_trait::async_trait;
use backyard_backup::connectors::{Connector, DatabaseInfo, RestoreMode, TableSelection};
use backyard_backup::error::Unsupported;
use backyard_backup::models::{encode_metadata, BackupRecord, StorageObject};
use backyard_backup::providers::Provider;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    metadata: HashMap<String, String>,
    last_modified: DateTime<Utc>,
}

/// Storage provider backed by a map
pub struct MemoryProvider {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    read_chunk: usize,
    read_delay: Option<Duration>,
    fail_store: bool,
    fail_delete: Mutex<HashSet<String>>,
    deleted: Mutex<Vec<String>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            read_chunk: 8 * 1024,
            read_delay: None,
            fail_store: false,
            fail_delete: Mutex::new(HashSet::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    /// Read at most `bytes` per read call while storing
    pub fn with_read_chunk(mut self, bytes: usize) -> Self {
        self.read_chunk = bytes.max(1);
        self
    }

    /// Sleep between reads while storing
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Every store fails after its first read
    pub fn failing_store(mut self) -> Self {
        self.fail_store = true;
        self
    }

    /// Deleting `path` fails
    pub fn fail_delete_of(&self, path: &str) {
        self.fail_delete.lock().insert(path.to_string());
    }

    /// Put an object carrying the record's metadata (used to seed catalogs)
    pub fn insert_record(&self, record: &BackupRecord, data: &[u8]) {
        self.objects.lock().insert(
            record.storage_path.clone(),
            StoredObject {
                data: data.to_vec(),
                metadata: encode_metadata(record),
                last_modified: record.completed_at,
            },
        );
    }

    /// Put an arbitrary object
    pub fn insert_raw(&self, path: &str, data: &[u8], metadata: HashMap<String, String>) {
        self.objects.lock().insert(
            path.to_string(),
            StoredObject {
                data: data.to_vec(),
                metadata,
                last_modified: Utc::now(),
            },
        );
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn paths(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(path).map(|o| o.data.clone())
    }

    /// Paths deleted so far, in order
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn store(
        &self,
        path: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        metadata: &HashMap<String, String>,
    ) -> Result<u64> {
        let mut data = Vec::new();
        let mut buf = vec![0u8; self.read_chunk];
        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            if self.fail_store {
                bail!("simulated storage failure while writing {}", path);
            }
            if let Some(delay) = self.read_delay {
                tokio::time::sleep(delay).await;
            }
        }

        let size = data.len() as u64;
        self.objects.lock().insert(
            path.to_string(),
            StoredObject {
                data,
                metadata: metadata.clone(),
                last_modified: Utc::now(),
            },
        );
        Ok(size)
    }

    async fn retrieve(&self, path: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64> {
        let data = match self.objects.lock().get(path) {
            Some(object) => object.data.clone(),
            None => bail!("Object not found: {}", path),
        };
        sink.write_all(&data).await?;
        Ok(data.len() as u64)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        if self.fail_delete.lock().contains(path) {
            bail!("simulated delete failure for {}", path);
        }
        if self.objects.lock().remove(path).is_none() {
            bail!("Object not found: {}", path);
        }
        self.deleted.lock().push(path.to_string());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StorageObject>> {
        Ok(self
            .objects
            .lock()
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, object)| to_storage_object(path, object))
            .collect())
    }

    async fn describe(&self, path: &str) -> Result<StorageObject> {
        match self.objects.lock().get(path) {
            Some(object) => Ok(to_storage_object(path, object)),
            None => bail!("Object not found: {}", path),
        }
    }
}

fn to_storage_object(path: &str, object: &StoredObject) -> StorageObject {
    StorageObject {
        path: path.to_string(),
        size: object.data.len() as u64,
        last_modified: object.last_modified,
        metadata: object.metadata.clone(),
    }
}

/// Connector over a map of table name to content
pub struct ScriptedConnector {
    name: String,
    tables: Mutex<BTreeMap<String, String>>,
    checksums: bool,
    fail_after: Option<usize>,
    dumps: Mutex<Vec<TableSelection>>,
    restores: Mutex<Vec<(RestoreMode, Vec<String>)>>,
    connected: AtomicBool,
}

impl ScriptedConnector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tables: Mutex::new(BTreeMap::new()),
            checksums: true,
            fail_after: None,
            dumps: Mutex::new(Vec::new()),
            restores: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
        }
    }

    pub fn with_table(self, table: &str, content: &str) -> Self {
        self.set_table(table, content);
        self
    }

    /// Report checksums as unsupported, like engines without them
    pub fn without_checksums(mut self) -> Self {
        self.checksums = false;
        self
    }

    /// The dump fails after writing this many bytes
    pub fn failing_dump_after(mut self, bytes: usize) -> Self {
        self.fail_after = Some(bytes);
        self
    }

    pub fn set_table(&self, table: &str, content: &str) {
        self.tables.lock().insert(table.to_string(), content.to_string());
    }

    pub fn drop_table(&self, table: &str) {
        self.tables.lock().remove(table);
    }

    pub fn tables(&self) -> BTreeMap<String, String> {
        self.tables.lock().clone()
    }

    /// Selections passed to `dump`, in order
    pub fn dumps(&self) -> Vec<TableSelection> {
        self.dumps.lock().clone()
    }

    /// Mode and table names of every applied restore, in order
    pub fn restores(&self) -> Vec<(RestoreMode, Vec<String>)> {
        self.restores.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn encode(&self, selection: &TableSelection) -> Vec<u8> {
        let tables = self.tables.lock();
        let mut out = String::new();
        for (name, content) in tables.iter() {
            let selected = match selection {
                TableSelection::All => true,
                TableSelection::Tables(wanted) => wanted.contains(name),
            };
            if selected {
                out.push_str(name);
                out.push('\t');
                out.push_str(content);
                out.push('\n');
            }
        }
        out.into_bytes()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn engine(&self) -> &'static str {
        "memory"
    }

    fn database_name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.tables.lock().keys().cloned().collect())
    }

    async fn describe(&self) -> Result<DatabaseInfo> {
        let tables = self.tables.lock();
        Ok(DatabaseInfo {
            engine: "memory".to_string(),
            name: self.name.clone(),
            version: None,
            size_bytes: Some(tables.values().map(|c| c.len() as u64).sum()),
            table_count: tables.len(),
        })
    }

    async fn dump(
        &self,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        selection: &TableSelection,
    ) -> Result<u64> {
        self.dumps.lock().push(selection.clone());
        let payload = self.encode(selection);

        if let Some(limit) = self.fail_after {
            let partial = &payload[..limit.min(payload.len())];
            sink.write_all(partial).await?;
            sink.flush().await?;
            bail!("simulated dump failure after {} bytes", partial.len());
        }

        sink.write_all(&payload).await?;
        Ok(payload.len() as u64)
    }

    async fn restore(&self, source: &mut (dyn AsyncRead + Send + Unpin), mode: RestoreMode) -> Result<()> {
        let mut raw = String::new();
        source.read_to_string(&mut raw).await?;

        let mut incoming = BTreeMap::new();
        for line in raw.lines() {
            let Some((name, content)) = line.split_once('\t') else {
                bail!("malformed dump line: {}", line);
            };
            incoming.insert(name.to_string(), content.to_string());
        }

        let names: Vec<String> = incoming.keys().cloned().collect();
        {
            let mut tables = self.tables.lock();
            if mode == RestoreMode::Replace {
                tables.clear();
            }
            tables.extend(incoming);
        }
        self.restores.lock().push((mode, names));
        Ok(())
    }

    async fn table_checksums(&self, tables: &[String]) -> Result<BTreeMap<String, String>> {
        if !self.checksums {
            return Err(Unsupported("table checksums for memory".to_string()).into());
        }
        let current = self.tables.lock();
        Ok(tables
            .iter()
            .filter_map(|t| current.get(t).map(|c| (t.clone(), format!("{}:{}", c.len(), c))))
            .collect())
    }

    async fn drop_tables(&self, tables: &[String]) -> Result<()> {
        let mut current = self.tables.lock();
        for table in tables {
            current.remove(table);
        }
        Ok(())
    }
}
