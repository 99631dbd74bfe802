//! Storage path layout
//!
//! `{engine}/{database}/{kind}/{%Y%m%d-%H%M%S}-{id}.db[.gz]`, with the
//! timestamp in UTC so paths sort by start time within a group.

use super::BackupKind;
use chrono::{DateTime, Utc};

pub const DUMP_SUFFIX: &str = ".db";
pub const COMPRESSED_SUFFIX: &str = ".db.gz";
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Build the object path for a new backup
pub fn storage_path(
    engine: &str,
    database: &str,
    kind: BackupKind,
    started_at: &DateTime<Utc>,
    id: &str,
    compressed: bool,
) -> String {
    let suffix = if compressed { COMPRESSED_SUFFIX } else { DUMP_SUFFIX };
    format!(
        "{}/{}/{}/{}-{}{}",
        engine,
        database,
        kind.as_str(),
        started_at.format(TIMESTAMP_FORMAT),
        id,
        suffix
    )
}

/// Prefix holding every backup of one database
pub fn database_prefix(engine: &str, database: &str) -> String {
    format!("{}/{}/", engine, database)
}

/// Whether an object path looks like a backup dump
pub fn is_backup_object(path: &str) -> bool {
    path.ends_with(DUMP_SUFFIX) || path.ends_with(COMPRESSED_SUFFIX)
}

/// File name used when a backup is exported to a directory
pub fn export_file_name(id: &str) -> String {
    format!("{}{}", id, DUMP_SUFFIX)
}
