//! Differential backup strategy

use super::changes::{apply_table_filter, changed_tables, dropped_tables};
use super::{current_checksums, engine_tables, resolve_base, BackupContext, BackupPlan, BackupStrategy};
use crate::connectors::TableSelection;
use crate::error::BackupResult;
use crate::models::BackupKind;
use async_trait::async_trait;
use tracing::info;

/// Dumps every table changed since the latest Full backup
pub struct DifferentialStrategy;

#[async_trait]
impl BackupStrategy for DifferentialStrategy {
    fn kind(&self) -> BackupKind {
        BackupKind::Differential
    }

    async fn plan(&self, ctx: &BackupContext) -> BackupResult<BackupPlan> {
        let base = resolve_base(ctx).await?;

        let existing = engine_tables(ctx).await?;
        let dropped = dropped_tables(&existing, &base);
        let tables = apply_table_filter(existing, &ctx.options);
        let checksums = current_checksums(ctx, &tables).await?;
        let changed = changed_tables(&tables, checksums.as_ref(), &base);

        info!(
            database = %ctx.options.source_db,
            base = %base.id,
            "{} of {} tables changed since base, {} dropped",
            changed.len(),
            tables.len(),
            dropped.len()
        );

        Ok(BackupPlan {
            base: Some(base.clone()),
            parent: Some(base),
            selection: TableSelection::Tables(changed.clone()),
            tables: changed,
            checksums: checksums.unwrap_or_default(),
            dropped,
        })
    }
}
