//! Table filtering and checksum-based change detection

use crate::connectors::Connector;
use crate::error::{is_unsupported, BackupError, BackupResult};
use crate::models::{BackupOptions, BackupRecord};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Apply include then exclude filters, keeping engine order
pub fn apply_table_filter(tables: Vec<String>, options: &BackupOptions) -> Vec<String> {
    for wanted in &options.include_tables {
        if !tables.contains(wanted) {
            warn!(database = %options.source_db, "Included table '{}' does not exist, ignoring", wanted);
        }
    }

    tables
        .into_iter()
        .filter(|t| options.include_tables.is_empty() || options.include_tables.contains(t))
        .filter(|t| !options.exclude_tables.contains(t))
        .collect()
}

/// Current checksums of `tables`, or `None` when the engine cannot compute them
pub async fn collect_checksums(
    connector: &dyn Connector,
    tables: &[String],
) -> BackupResult<Option<BTreeMap<String, String>>> {
    match connector.table_checksums(tables).await {
        Ok(checksums) => Ok(Some(checksums)),
        Err(e) if is_unsupported(&e) => {
            warn!(
                database = connector.database_name(),
                "{}, every table is treated as changed", e
            );
            Ok(None)
        }
        Err(e) => Err(BackupError::Connection {
            database: connector.database_name().to_string(),
            cause: e.context("Failed to compute table checksums"),
        }),
    }
}

/// Tables whose checksum differs from the reference backup.
///
/// Without checksums on either side every table counts as changed.
pub fn changed_tables(
    tables: &[String],
    current: Option<&BTreeMap<String, String>>,
    reference: &BackupRecord,
) -> Vec<String> {
    let Some(current) = current else {
        return tables.to_vec();
    };
    if reference.table_checksums.is_empty() {
        debug!(reference = %reference.id, "Reference backup has no checksums");
        return tables.to_vec();
    }

    tables
        .iter()
        .filter(|t| current.get(*t).is_none() || current.get(*t) != reference.table_checksums.get(*t))
        .cloned()
        .collect()
}

/// Tables the reference backup knew about that the engine no longer reports.
///
/// `existing` is the unfiltered table list, so a table that is merely
/// excluded now is not mistaken for a dropped one.
pub fn dropped_tables(existing: &[String], reference: &BackupRecord) -> Vec<String> {
    let known: BTreeSet<&String> = reference
        .table_checksums
        .keys()
        .chain(reference.tables_included.iter())
        .collect();
    known
        .into_iter()
        .filter(|t| !existing.contains(t))
        .cloned()
        .collect()
}
