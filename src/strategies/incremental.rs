//! Incremental backup strategy

use super::changes::{apply_table_filter, changed_tables, dropped_tables};
use super::{current_checksums, engine_tables, resolve_base, BackupContext, BackupPlan, BackupStrategy};
use crate::connectors::TableSelection;
use crate::error::BackupResult;
use crate::models::BackupKind;
use async_trait::async_trait;
use tracing::info;

/// Dumps tables changed since the most recent backup of any kind
pub struct IncrementalStrategy;

#[async_trait]
impl BackupStrategy for IncrementalStrategy {
    fn kind(&self) -> BackupKind {
        BackupKind::Incremental
    }

    async fn plan(&self, ctx: &BackupContext) -> BackupResult<BackupPlan> {
        let base = resolve_base(ctx).await?;

        // The base itself is a candidate, so this always finds something
        let parent = ctx
            .catalog
            .latest_any(ctx.connector.engine(), &ctx.options.source_db)
            .await?
            .unwrap_or_else(|| base.clone());

        let existing = engine_tables(ctx).await?;
        let dropped = dropped_tables(&existing, &parent);
        let tables = apply_table_filter(existing, &ctx.options);
        let checksums = current_checksums(ctx, &tables).await?;
        let changed = changed_tables(&tables, checksums.as_ref(), &parent);

        info!(
            database = %ctx.options.source_db,
            base = %base.id,
            parent = %parent.id,
            "{} of {} tables changed since last backup, {} dropped",
            changed.len(),
            tables.len(),
            dropped.len()
        );

        Ok(BackupPlan {
            base: Some(base),
            parent: Some(parent),
            selection: TableSelection::Tables(changed.clone()),
            tables: changed,
            checksums: checksums.unwrap_or_default(),
            dropped,
        })
    }
}
