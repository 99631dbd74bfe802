//! Restore of backup chains and export of single backups

use super::catalog::Catalog;
use crate::connectors::{Connector, RestoreMode};
use crate::error::{is_unsupported, BackupError, BackupResult};
use crate::models::{path, BackupRecord, RestoreReport};
use crate::pipeline::{FileConsumer, Pipeline, RestoreConsumer, RetrieveProducer, TransferFailure};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct RestoreManager {
    catalog: Catalog,
    pipeline: Pipeline,
    cancel: CancellationToken,
}

impl RestoreManager {
    pub fn new(catalog: Catalog, pipeline: Pipeline, cancel: CancellationToken) -> Self {
        Self {
            catalog,
            pipeline,
            cancel,
        }
    }

    /// Restore `backup_id` into the connector's database, applying its chain oldest first
    pub async fn restore(&self, connector: &Arc<dyn Connector>, backup_id: &str) -> BackupResult<RestoreReport> {
        let started_at = Utc::now();
        let chain = self.catalog.chain(backup_id).await?;

        let target = chain.last().ok_or_else(|| BackupError::NotFound(backup_id.to_string()))?;
        if target.source_database != connector.database_name() || target.engine != connector.engine() {
            return Err(BackupError::Config(format!(
                "Backup {} belongs to {} database '{}', not {} database '{}'",
                backup_id,
                target.engine,
                target.source_database,
                connector.engine(),
                connector.database_name()
            )));
        }
        self.validate(&chain).await?;

        let mut report = RestoreReport {
            backup_id: backup_id.to_string(),
            started_at,
            completed_at: started_at,
            applied: Vec::new(),
            tables_restored: Vec::new(),
            output_file: None,
            success: false,
            error_detail: None,
        };

        for (position, link) in chain.iter().enumerate() {
            let mode = if position == 0 { RestoreMode::Replace } else { RestoreMode::Merge };
            info!(
                backup_id = %link.id,
                database = %link.source_database,
                kind = %link.kind,
                "Applying backup {}/{} ({:?})",
                position + 1,
                chain.len(),
                mode
            );

            let producer = Box::new(RetrieveProducer {
                provider: Arc::clone(self.catalog.provider()),
                path: link.storage_path.clone(),
            });
            let consumer = Box::new(RestoreConsumer {
                connector: Arc::clone(connector),
                mode,
            });

            let outcome = self
                .pipeline
                .for_restore(link.compressed)
                .run(producer, consumer, &self.cancel)
                .await;

            match outcome {
                Ok(_) => {
                    report.applied.push(link.id.clone());
                    for table in &link.tables_included {
                        if !report.tables_restored.contains(table) {
                            report.tables_restored.push(table.clone());
                        }
                    }
                    if mode == RestoreMode::Merge && !link.tables_dropped.is_empty() {
                        if let Err(e) = drop_removed_tables(connector.as_ref(), link).await {
                            report.completed_at = Utc::now();
                            report.error_detail = Some(format!("applying {}: {:#}", link.id, e));
                            return Err(BackupError::Restore(Box::new(report)));
                        }
                        report.tables_restored.retain(|t| !link.tables_dropped.contains(t));
                    }
                }
                Err(TransferFailure::Cancelled) => {
                    warn!(backup_id = %link.id, "Restore cancelled after {} of {} backups", position, chain.len());
                    report.completed_at = Utc::now();
                    report.error_detail = Some(format!("cancelled while applying {}", link.id));
                    return Err(BackupError::Cancelled {
                        what: format!("restore of backup {}", backup_id),
                        record: None,
                        report: Some(Box::new(report)),
                    });
                }
                Err(failure) => {
                    warn!(backup_id = %link.id, "Restore step failed: {}", failure);
                    report.completed_at = Utc::now();
                    report.error_detail = Some(format!("applying {}: {}", link.id, failure));
                    return Err(BackupError::Restore(Box::new(report)));
                }
            }
        }

        report.completed_at = Utc::now();
        report.success = true;
        info!(
            backup_id = %backup_id,
            database = %target.source_database,
            "Restore completed ({} backups applied)",
            report.applied.len()
        );
        Ok(report)
    }

    /// Write the decoded dump of one backup to `<output_dir>/<id>.db`
    pub async fn export(&self, backup_id: &str, output_dir: &Path) -> BackupResult<RestoreReport> {
        let started_at = Utc::now();
        let record = self.catalog.get(backup_id).await?;
        self.validate(std::slice::from_ref(&record)).await?;

        let output = output_dir.join(path::export_file_name(&record.id));
        let mut report = RestoreReport {
            backup_id: record.id.clone(),
            started_at,
            completed_at: started_at,
            applied: Vec::new(),
            tables_restored: Vec::new(),
            output_file: Some(output.display().to_string()),
            success: false,
            error_detail: None,
        };

        let producer = Box::new(RetrieveProducer {
            provider: Arc::clone(self.catalog.provider()),
            path: record.storage_path.clone(),
        });
        let consumer = Box::new(FileConsumer { path: output.clone() });

        let outcome = self
            .pipeline
            .for_restore(record.compressed)
            .run(producer, consumer, &self.cancel)
            .await;

        if let Err(failure) = outcome {
            if let Err(e) = tokio::fs::remove_file(&output).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove partial export {:?}: {}", output, e);
                }
            }
            report.completed_at = Utc::now();
            report.error_detail = Some(failure.to_string());
            return match failure {
                TransferFailure::Cancelled => Err(BackupError::Cancelled {
                    what: format!("export of backup {}", backup_id),
                    record: None,
                    report: Some(Box::new(report)),
                }),
                _ => Err(BackupError::Restore(Box::new(report))),
            };
        }

        report.completed_at = Utc::now();
        report.applied.push(record.id.clone());
        report.tables_restored = record.tables_included.clone();
        report.success = true;
        info!(backup_id = %record.id, "Exported backup to {:?}", output);
        Ok(report)
    }

    /// Every object of the chain must still exist before anything is touched
    async fn validate(&self, chain: &[BackupRecord]) -> BackupResult<()> {
        for link in chain {
            self.catalog
                .provider()
                .describe(&link.storage_path)
                .await
                .map_err(|e| {
                    BackupError::Storage(e.context(format!("Backup {} is not readable", link.id)))
                })?;
        }
        Ok(())
    }
}

/// Remove the tables a merged backup recorded as dropped since its reference
async fn drop_removed_tables(connector: &dyn Connector, link: &BackupRecord) -> anyhow::Result<()> {
    match connector.drop_tables(&link.tables_dropped).await {
        Ok(()) => {
            info!(backup_id = %link.id, "Dropped tables removed since reference: {}", link.tables_dropped.join(", "));
            Ok(())
        }
        Err(e) if is_unsupported(&e) => {
            warn!(backup_id = %link.id, "{}, keeping tables {}", e, link.tables_dropped.join(", "));
            Ok(())
        }
        Err(e) => Err(e),
    }
}
