//! Backup strategies
//!
//! A strategy decides what a backup contains and what it depends on. Running
//! the plan (id, path, metadata, transfer, failure handling) is shared.

pub mod changes;
mod differential;
mod full;
mod incremental;

pub use differential::DifferentialStrategy;
pub use full::FullStrategy;
pub use incremental::IncrementalStrategy;

use crate::config::OrphanPolicy;
use crate::connectors::{Connector, TableSelection};
use crate::error::{BackupError, BackupResult};
use crate::managers::catalog::Catalog;
use crate::models::{encode_metadata, path, BackupKind, BackupOptions, BackupRecord, BackupStatus};
use crate::pipeline::{DumpProducer, Pipeline, StoreConsumer, TransferFailure};
use crate::providers::Provider;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Everything a strategy needs for one backup run
pub struct BackupContext {
    pub connector: Arc<dyn Connector>,
    pub provider: Arc<dyn Provider>,
    pub catalog: Catalog,
    pub pipeline: Pipeline,
    pub options: BackupOptions,
    pub orphan_policy: OrphanPolicy,
    pub cancel: CancellationToken,
}

/// What one backup will contain
#[derive(Debug, Clone)]
pub struct BackupPlan {
    pub base: Option<BackupRecord>,
    pub parent: Option<BackupRecord>,
    pub selection: TableSelection,
    /// Tables the dump contains
    pub tables: Vec<String>,
    /// Checksums of every filtered table at plan time
    pub checksums: BTreeMap<String, String>,
    /// Tables of the reference backup that no longer exist
    pub dropped: Vec<String>,
}

/// Trait for backup strategies
#[async_trait]
pub trait BackupStrategy: Send + Sync {
    fn kind(&self) -> BackupKind;

    /// Get strategy name (for logging)
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Resolve dependencies and the table selection; no data moves yet
    async fn plan(&self, ctx: &BackupContext) -> BackupResult<BackupPlan>;
}

pub fn strategy_for(kind: BackupKind) -> Box<dyn BackupStrategy> {
    match kind {
        BackupKind::Full => Box::new(FullStrategy),
        BackupKind::Incremental => Box::new(IncrementalStrategy),
        BackupKind::Differential => Box::new(DifferentialStrategy),
    }
}

/// Latest Full backup of the target database, re-read from storage
pub(crate) async fn resolve_base(ctx: &BackupContext) -> BackupResult<BackupRecord> {
    let database = &ctx.options.source_db;
    ctx.catalog
        .latest(ctx.connector.engine(), database, BackupKind::Full)
        .await?
        .ok_or_else(|| BackupError::NoBaseBackupFound(database.clone()))
}

/// Every table the engine reports, unfiltered
pub(crate) async fn engine_tables(ctx: &BackupContext) -> BackupResult<Vec<String>> {
    ctx.connector.list_tables().await.map_err(|e| BackupError::Connection {
        database: ctx.options.source_db.clone(),
        cause: e.context("Failed to list tables"),
    })
}

/// Engine tables after include/exclude filtering
pub(crate) async fn filtered_tables(ctx: &BackupContext) -> BackupResult<Vec<String>> {
    let tables = engine_tables(ctx).await?;
    Ok(changes::apply_table_filter(tables, &ctx.options))
}

/// Plan and run one backup, returning the record of the stored object
pub async fn run_backup(strategy: &dyn BackupStrategy, ctx: &BackupContext) -> BackupResult<BackupRecord> {
    let options = &ctx.options;
    if strategy.kind() != options.kind {
        return Err(BackupError::Config(format!(
            "{} strategy cannot run a {} backup",
            strategy.name(),
            options.kind
        )));
    }

    let plan = strategy.plan(ctx).await?;

    let id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    let engine = ctx.connector.engine();
    let storage_path = path::storage_path(
        engine,
        &options.source_db,
        options.kind,
        &started_at,
        &id,
        options.compress,
    );

    let mut record = BackupRecord {
        id: id.clone(),
        kind: options.kind,
        engine: engine.to_string(),
        source_database: options.source_db.clone(),
        base_backup_id: plan.base.as_ref().map(|b| b.id.clone()),
        parent_backup_id: plan.parent.as_ref().map(|p| p.id.clone()),
        started_at,
        completed_at: started_at,
        size_bytes: 0,
        storage_path: storage_path.clone(),
        compressed: options.compress,
        tables_included: plan.tables.clone(),
        table_checksums: plan.checksums.clone(),
        tables_dropped: plan.dropped.clone(),
        status: BackupStatus::Success,
        error_detail: None,
    };

    info!(
        backup_id = %id,
        database = %options.source_db,
        storage = %options.dest_storage,
        kind = %options.kind,
        "Starting {} backup ({} tables)",
        strategy.name(),
        plan.tables.len()
    );

    let producer = Box::new(DumpProducer {
        connector: Arc::clone(&ctx.connector),
        selection: plan.selection,
    });
    let consumer = Box::new(StoreConsumer {
        provider: Arc::clone(&ctx.provider),
        path: storage_path.clone(),
        metadata: encode_metadata(&record),
    });

    let pipeline = ctx.pipeline.for_backup(options.compress, options.max_size);
    match pipeline.run(producer, consumer, &ctx.cancel).await {
        Ok(stats) => {
            record.completed_at = Utc::now();
            record.size_bytes = stats.bytes_consumed;

            // Report what the catalog will see
            match ctx.provider.describe(&storage_path).await {
                Ok(object) => {
                    record.completed_at = object.last_modified;
                    record.size_bytes = object.size;
                }
                Err(e) => debug!("Could not describe {} after store: {:#}", storage_path, e),
            }

            info!(
                backup_id = %id,
                database = %options.source_db,
                kind = %options.kind,
                "Backup stored at {} ({} bytes dumped, {} bytes stored)",
                storage_path,
                stats.bytes_produced,
                record.size_bytes
            );
            Ok(record)
        }
        Err(failure) => {
            record.status = BackupStatus::Failed;
            record.completed_at = Utc::now();
            record.error_detail = Some(failure.to_string());
            error!(backup_id = %id, database = %options.source_db, "Backup failed: {}", failure);

            discard_orphan(ctx, &storage_path).await;

            match failure {
                TransferFailure::Cancelled => Err(BackupError::Cancelled {
                    what: format!("backup {} of database '{}'", id, options.source_db),
                    record: Some(Box::new(record)),
                    report: None,
                }),
                other => Err(BackupError::Transfer {
                    backup_id: id,
                    message: other.to_string(),
                    record: Some(Box::new(record)),
                }),
            }
        }
    }
}

/// Apply the orphan policy to the path of a failed transfer
async fn discard_orphan(ctx: &BackupContext, storage_path: &str) {
    match ctx.orphan_policy {
        OrphanPolicy::Keep => {
            debug!("Keeping whatever was written at {} for inspection", storage_path);
        }
        OrphanPolicy::Delete => match ctx.provider.delete(storage_path).await {
            Ok(()) => info!("Removed orphaned object {}", storage_path),
            // Usually nothing was committed
            Err(e) => debug!("No orphan removed at {}: {:#}", storage_path, e),
        },
    }
}

/// Checksums of the filtered tables, empty when the engine has none
pub(crate) async fn current_checksums(
    ctx: &BackupContext,
    tables: &[String],
) -> BackupResult<Option<BTreeMap<String, String>>> {
    if tables.is_empty() {
        return Ok(Some(BTreeMap::new()));
    }
    changes::collect_checksums(ctx.connector.as_ref(), tables).await
}
