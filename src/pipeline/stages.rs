//! Producer and consumer stages wiring connectors and providers to a conduit

use super::{ByteConsumer, ByteProducer, ConduitReader, ConduitWriter};
use crate::connectors::{Connector, RestoreMode, TableSelection};
use crate::providers::Provider;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Dumps a table selection from a connector
pub struct DumpProducer {
    pub connector: Arc<dyn Connector>,
    pub selection: TableSelection,
}

#[async_trait]
impl ByteProducer for DumpProducer {
    async fn produce(self: Box<Self>, sink: &mut ConduitWriter) -> Result<u64> {
        self.connector.dump(sink, &self.selection).await
    }
}

/// Stores the stream as one object
pub struct StoreConsumer {
    pub provider: Arc<dyn Provider>,
    pub path: String,
    pub metadata: HashMap<String, String>,
}

#[async_trait]
impl ByteConsumer for StoreConsumer {
    async fn consume(self: Box<Self>, source: &mut ConduitReader) -> Result<u64> {
        self.provider.store(&self.path, source, &self.metadata).await
    }
}

/// Reads one stored object back
pub struct RetrieveProducer {
    pub provider: Arc<dyn Provider>,
    pub path: String,
}

#[async_trait]
impl ByteProducer for RetrieveProducer {
    async fn produce(self: Box<Self>, sink: &mut ConduitWriter) -> Result<u64> {
        self.provider.retrieve(&self.path, sink).await
    }
}

/// Applies the stream to a database
pub struct RestoreConsumer {
    pub connector: Arc<dyn Connector>,
    pub mode: RestoreMode,
}

#[async_trait]
impl ByteConsumer for RestoreConsumer {
    async fn consume(self: Box<Self>, source: &mut ConduitReader) -> Result<u64> {
        self.connector.restore(source, self.mode).await?;
        Ok(source.bytes_received())
    }
}

/// Writes the stream to a local file
pub struct FileConsumer {
    pub path: PathBuf,
}

#[async_trait]
impl ByteConsumer for FileConsumer {
    async fn consume(self: Box<Self>, source: &mut ConduitReader) -> Result<u64> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        let mut file = tokio::fs::File::create(&self.path)
            .await
            .with_context(|| format!("Failed to create {:?}", self.path))?;
        let written = tokio::io::copy(source, &mut file)
            .await
            .with_context(|| format!("Failed to write {:?}", self.path))?;
        file.flush().await?;
        Ok(written)
    }
}
