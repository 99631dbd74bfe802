//! Local filesystem provider
//!
//! Objects live under a base directory at their storage path. Metadata is a
//! JSON sidecar next to the data file (`<object>.metadata`). Data is streamed
//! into `<object>.partial` and renamed into place only after the source ended
//! cleanly and the sidecar was written.

use super::Provider;
use crate::models::StorageObject;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

const METADATA_SUFFIX: &str = ".metadata";
const PARTIAL_SUFFIX: &str = ".partial";

pub struct LocalProvider {
    base_path: PathBuf,
}

impl LocalProvider {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn object_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            anyhow::bail!("Invalid object path: {}", path);
        }
        Ok(self.base_path.join(relative))
    }

    async fn read_metadata(data_path: &Path) -> Result<HashMap<String, String>> {
        let sidecar = with_suffix(data_path, METADATA_SUFFIX);
        match fs::read_to_string(&sidecar).await {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse metadata sidecar {:?}", sidecar)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read metadata sidecar {:?}", sidecar)),
        }
    }

    async fn stat(&self, relative: &str, data_path: &Path) -> Result<StorageObject> {
        let meta = fs::metadata(data_path)
            .await
            .with_context(|| format!("Object not found: {}", relative))?;
        let last_modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(StorageObject {
            path: relative.to_string(),
            size: meta.len(),
            last_modified,
            metadata: Self::read_metadata(data_path).await?,
        })
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path)
            .await
            .with_context(|| format!("Failed to create storage directory {:?}", self.base_path))
    }

    async fn store(
        &self,
        path: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        metadata: &HashMap<String, String>,
    ) -> Result<u64> {
        let data_path = self.object_path(path)?;
        if let Some(parent) = data_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let partial = with_suffix(&data_path, PARTIAL_SUFFIX);
        let written = match write_partial(&partial, source).await {
            Ok(n) => n,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    debug!("Failed to remove partial file {:?}: {}", partial, cleanup);
                }
                return Err(e.context(format!("Failed to store object {}", path)));
            }
        };

        let sidecar = with_suffix(&data_path, METADATA_SUFFIX);
        let json = serde_json::to_string_pretty(metadata).context("Failed to serialize metadata")?;
        fs::write(&sidecar, json)
            .await
            .with_context(|| format!("Failed to write metadata sidecar {:?}", sidecar))?;

        fs::rename(&partial, &data_path)
            .await
            .with_context(|| format!("Failed to move {:?} into place", partial))?;

        debug!("Stored {} bytes at {:?}", written, data_path);
        Ok(written)
    }

    async fn retrieve(&self, path: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64> {
        let data_path = self.object_path(path)?;
        let mut file = fs::File::open(&data_path)
            .await
            .with_context(|| format!("Object not found: {}", path))?;
        let copied = tokio::io::copy(&mut file, sink)
            .await
            .with_context(|| format!("Failed to read object {}", path))?;
        Ok(copied)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let data_path = self.object_path(path)?;
        let partial = with_suffix(&data_path, PARTIAL_SUFFIX);
        let sidecar = with_suffix(&data_path, METADATA_SUFFIX);

        let mut removed = false;
        for candidate in [&data_path, &partial] {
            match fs::remove_file(candidate).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("Failed to delete {:?}", candidate)),
            }
        }
        if let Err(e) = fs::remove_file(&sidecar).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove metadata sidecar {:?}: {}", sidecar, e);
            }
        }

        if !removed {
            anyhow::bail!("Object not found: {}", path);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StorageObject>> {
        let mut objects = Vec::new();
        let mut pending = vec![self.base_path.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e).with_context(|| format!("Failed to list {:?}", dir)),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let entry_path = entry.path();
                if file_type.is_dir() {
                    pending.push(entry_path);
                    continue;
                }

                let Some(relative) = relative_key(&self.base_path, &entry_path) else {
                    continue;
                };
                if relative.ends_with(METADATA_SUFFIX)
                    || relative.ends_with(PARTIAL_SUFFIX)
                    || !relative.starts_with(prefix)
                {
                    continue;
                }

                match self.stat(&relative, &entry_path).await {
                    Ok(object) => objects.push(object),
                    // Deleted between listing and stat
                    Err(e) => debug!("Skipping {}: {:#}", relative, e),
                }
            }
        }

        objects.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(objects)
    }

    async fn describe(&self, path: &str) -> Result<StorageObject> {
        let data_path = self.object_path(path)?;
        self.stat(path, &data_path).await
    }
}

async fn write_partial(partial: &Path, source: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
    let mut file = fs::File::create(partial)
        .await
        .with_context(|| format!("Failed to create {:?}", partial))?;
    let written = tokio::io::copy(source, &mut file)
        .await
        .context("Failed to read source stream")?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

/// Storage key of a file under the base directory, always `/` separated
fn relative_key(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}
