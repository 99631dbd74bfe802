//! Metadata-driven backup catalog
//!
//! The catalog has no state of its own. Every query lists the storage
//! objects under a prefix and decodes their metadata, so the result always
//! reflects what storage holds at that moment. Objects that do not decode
//! are skipped and logged at debug level.

use crate::error::{BackupError, BackupResult};
use crate::models::path::database_prefix;
use crate::models::{decode_record, BackupKind, BackupRecord};
use crate::providers::Provider;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct Catalog {
    provider: Arc<dyn Provider>,
}

impl Catalog {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Every backup in the storage, newest first
    pub async fn list(&self) -> BackupResult<Vec<BackupRecord>> {
        self.list_prefix("").await
    }

    /// Backups of one database, newest first
    pub async fn list_for(&self, engine: &str, database: &str) -> BackupResult<Vec<BackupRecord>> {
        let records = self.list_prefix(&database_prefix(engine, database)).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.source_database == database)
            .collect())
    }

    /// Backups under an arbitrary prefix, newest first
    pub async fn list_prefix(&self, prefix: &str) -> BackupResult<Vec<BackupRecord>> {
        let objects = self.provider.list(prefix).await.map_err(BackupError::Storage)?;

        let mut records = Vec::with_capacity(objects.len());
        for object in &objects {
            match decode_record(object) {
                Ok(record) => records.push(record),
                Err(reason) => debug!("Skipping {}: {}", object.path, reason),
            }
        }

        records.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| b.id.cmp(&a.id)));
        Ok(records)
    }

    /// Look a backup up by id
    pub async fn get(&self, id: &str) -> BackupResult<BackupRecord> {
        self.list()
            .await?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| BackupError::NotFound(id.to_string()))
    }

    /// Delete a backup by id and return the removed record
    pub async fn delete(&self, id: &str) -> BackupResult<BackupRecord> {
        let record = self.get(id).await?;
        self.provider
            .delete(&record.storage_path)
            .await
            .map_err(BackupError::Storage)?;
        debug!(backup_id = %record.id, path = %record.storage_path, "Deleted backup object");
        Ok(record)
    }

    /// Most recent backup of one kind for a database
    pub async fn latest(
        &self,
        engine: &str,
        database: &str,
        kind: BackupKind,
    ) -> BackupResult<Option<BackupRecord>> {
        Ok(self
            .list_for(engine, database)
            .await?
            .into_iter()
            .find(|r| r.kind == kind))
    }

    /// Most recent backup of any kind for a database
    pub async fn latest_any(&self, engine: &str, database: &str) -> BackupResult<Option<BackupRecord>> {
        Ok(self.list_for(engine, database).await?.into_iter().next())
    }

    /// Backups needed to restore `id`, oldest (the Full) first
    pub async fn chain(&self, id: &str) -> BackupResult<Vec<BackupRecord>> {
        let records = self.list().await?;
        let target = records
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| BackupError::NotFound(id.to_string()))?;

        let mut chain = vec![target.clone()];
        let mut seen = HashSet::from([target.id.clone()]);
        let mut current = target;

        while current.kind != BackupKind::Full {
            let Some(link) = current.predecessor() else {
                return Err(BackupError::BrokenChain {
                    backup_id: id.to_string(),
                    missing: format!("base of {}", current.id),
                });
            };
            let previous = records.iter().find(|r| r.id == link).ok_or_else(|| {
                BackupError::BrokenChain {
                    backup_id: id.to_string(),
                    missing: link.to_string(),
                }
            })?;
            if !seen.insert(previous.id.clone()) {
                return Err(BackupError::BrokenChain {
                    backup_id: id.to_string(),
                    missing: format!("cycle at {}", previous.id),
                });
            }
            chain.push(previous.clone());
            current = previous;
        }

        chain.reverse();
        Ok(chain)
    }
}
