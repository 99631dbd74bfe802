//! Storage providers
//!
//! A provider stores byte streams under a path together with a flat metadata
//! map, and lists them back with that map intact. The catalog relies on
//! nothing else.

mod local;
mod s3;

pub use local::LocalProvider;
pub use s3::S3Provider;

use crate::config::{StorageConfig, StorageType};
use crate::error::{BackupError, BackupResult};
use crate::models::StorageObject;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

/// Capability set of one storage backend
#[async_trait]
pub trait Provider: Send + Sync {
    /// Backend name (for logging)
    fn name(&self) -> &'static str;

    /// Prepare the backend (create directories, check bucket access)
    async fn initialize(&self) -> Result<()>;

    /// Persist the stream and its metadata under `path`.
    ///
    /// Nothing is committed unless `source` reaches a clean end-of-stream.
    /// Returns the number of bytes stored.
    async fn store(
        &self,
        path: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        metadata: &HashMap<String, String>,
    ) -> Result<u64>;

    /// Stream the object at `path` into the sink
    async fn retrieve(&self, path: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Every object under `prefix`, with its metadata
    async fn list(&self, prefix: &str) -> Result<Vec<StorageObject>>;

    async fn describe(&self, path: &str) -> Result<StorageObject>;
}

/// Build and initialize the provider for a storage configuration
pub async fn create_provider(name: &str, config: &StorageConfig) -> BackupResult<Arc<dyn Provider>> {
    let provider: Arc<dyn Provider> = match config.storage_type {
        StorageType::Local => {
            let base = config.base_path.as_deref().ok_or_else(|| {
                BackupError::Config(format!("Storage '{}': local storage requires base_path", name))
            })?;
            Arc::new(LocalProvider::new(crate::config::expand_tilde(base)))
        }
        StorageType::S3 => Arc::new(S3Provider::from_config(config).await),
        StorageType::Gcs | StorageType::Azure => {
            return Err(BackupError::NotImplemented(format!(
                "{} storage",
                config.storage_type.as_str()
            )))
        }
    };

    provider.initialize().await.map_err(BackupError::Storage)?;
    info!("Initialized {} storage '{}'", provider.name(), name);
    Ok(provider)
}
