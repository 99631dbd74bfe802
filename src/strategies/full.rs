//! Full backup strategy

use super::{current_checksums, filtered_tables, BackupContext, BackupPlan, BackupStrategy};
use crate::connectors::TableSelection;
use crate::error::BackupResult;
use crate::models::BackupKind;
use async_trait::async_trait;

/// Dumps every filtered table; depends on nothing
pub struct FullStrategy;

#[async_trait]
impl BackupStrategy for FullStrategy {
    fn kind(&self) -> BackupKind {
        BackupKind::Full
    }

    async fn plan(&self, ctx: &BackupContext) -> BackupResult<BackupPlan> {
        let tables = filtered_tables(ctx).await?;
        let checksums = current_checksums(ctx, &tables).await?.unwrap_or_default();

        // Without filters the engine dumps the whole database, views and all
        let selection = if ctx.options.has_table_filter() {
            TableSelection::Tables(tables.clone())
        } else {
            TableSelection::All
        };

        Ok(BackupPlan {
            base: None,
            parent: None,
            selection,
            tables,
            checksums,
            dropped: Vec::new(),
        })
    }
}
