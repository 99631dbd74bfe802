//! Object metadata schema
//!
//! Every backup object carries a flat string map. The catalog rebuilds a
//! [`BackupRecord`] from that map plus the object's size and modification
//! time, so nothing else needs to be persisted.

use super::{path, BackupKind, BackupRecord, BackupStatus, StorageObject};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub const KEY_BACKUP_ID: &str = "backup_id";
pub const KEY_BACKUP_TYPE: &str = "backup_type";
pub const KEY_SOURCE_DB: &str = "source_db";
pub const KEY_START_TIME: &str = "start_time";
pub const KEY_IS_COMPRESSED: &str = "is_compressed";
pub const KEY_BASE_BACKUP: &str = "base_backup";
pub const KEY_PARENT_BACKUP: &str = "parent_backup";
pub const KEY_DB_TYPE: &str = "db_type";
pub const KEY_METADATA: &str = "metadata";

/// Engine-specific JSON blob stored under the `metadata` key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataBlob {
    #[serde(default)]
    pub engine: String,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_backup_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_backup_id: Option<String>,
}

/// Why an object was left out of the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotBackupObject,
    MissingField(&'static str),
    InvalidField { field: &'static str, value: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotBackupObject => write!(f, "not a backup object"),
            SkipReason::MissingField(field) => write!(f, "missing metadata field '{}'", field),
            SkipReason::InvalidField { field, value } => {
                write!(f, "invalid value '{}' for metadata field '{}'", value, field)
            }
        }
    }
}

/// Encode a record into the metadata map attached at store time
pub fn encode_metadata(record: &BackupRecord) -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert(KEY_BACKUP_ID.to_string(), record.id.clone());
    map.insert(KEY_BACKUP_TYPE.to_string(), record.kind.as_str().to_string());
    map.insert(KEY_SOURCE_DB.to_string(), record.source_database.clone());
    map.insert(
        KEY_START_TIME.to_string(),
        record.started_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
    );
    map.insert(KEY_IS_COMPRESSED.to_string(), record.compressed.to_string());
    map.insert(KEY_DB_TYPE.to_string(), record.engine.clone());

    if let Some(ref base) = record.base_backup_id {
        map.insert(KEY_BASE_BACKUP.to_string(), base.clone());
    }
    if let Some(ref parent) = record.parent_backup_id {
        map.insert(KEY_PARENT_BACKUP.to_string(), parent.clone());
    }

    let blob = MetadataBlob {
        engine: record.engine.clone(),
        tables: record.tables_included.clone(),
        checksums: record.table_checksums.clone(),
        dropped: record.tables_dropped.clone(),
        base_backup_id: record.base_backup_id.clone(),
        parent_backup_id: record.parent_backup_id.clone(),
    };
    // A struct of strings always serializes
    if let Ok(json) = serde_json::to_string(&blob) {
        map.insert(KEY_METADATA.to_string(), json);
    }

    map
}

/// Rebuild a record from a listed object
pub fn decode_record(object: &StorageObject) -> Result<BackupRecord, SkipReason> {
    if !path::is_backup_object(&object.path) {
        return Err(SkipReason::NotBackupObject);
    }

    let meta = &object.metadata;
    let id = required(meta, KEY_BACKUP_ID)?;
    let kind_raw = required(meta, KEY_BACKUP_TYPE)?;
    let kind: BackupKind = kind_raw.parse().map_err(|_| SkipReason::InvalidField {
        field: KEY_BACKUP_TYPE,
        value: kind_raw.to_string(),
    })?;
    let source_database = required(meta, KEY_SOURCE_DB)?;
    let start_raw = required(meta, KEY_START_TIME)?;
    let started_at = DateTime::parse_from_rfc3339(start_raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| SkipReason::InvalidField {
            field: KEY_START_TIME,
            value: start_raw.to_string(),
        })?;

    let base_backup_id = optional(meta, KEY_BASE_BACKUP);
    if kind.requires_base() && base_backup_id.is_none() {
        return Err(SkipReason::MissingField(KEY_BASE_BACKUP));
    }

    let compressed = match meta.get(KEY_IS_COMPRESSED).map(String::as_str) {
        Some("true") => true,
        Some("false") => false,
        Some(other) => {
            return Err(SkipReason::InvalidField {
                field: KEY_IS_COMPRESSED,
                value: other.to_string(),
            })
        }
        None => object.path.ends_with(path::COMPRESSED_SUFFIX),
    };

    // The blob is advisory; a damaged one only loses table detail
    let blob = meta
        .get(KEY_METADATA)
        .and_then(|raw| serde_json::from_str::<MetadataBlob>(raw).ok())
        .unwrap_or_default();

    let engine = optional(meta, KEY_DB_TYPE)
        .or_else(|| (!blob.engine.is_empty()).then(|| blob.engine.clone()))
        .or_else(|| object.path.split('/').next().map(str::to_string))
        .unwrap_or_default();

    let parent_backup_id = optional(meta, KEY_PARENT_BACKUP).or(blob.parent_backup_id);

    Ok(BackupRecord {
        id: id.to_string(),
        kind,
        engine,
        source_database: source_database.to_string(),
        base_backup_id: if kind.requires_base() { base_backup_id } else { None },
        parent_backup_id: if kind.requires_base() { parent_backup_id } else { None },
        started_at,
        completed_at: object.last_modified,
        size_bytes: object.size,
        storage_path: object.path.clone(),
        compressed,
        tables_included: blob.tables,
        table_checksums: blob.checksums,
        tables_dropped: if kind.requires_base() { blob.dropped } else { Vec::new() },
        status: BackupStatus::Success,
        error_detail: None,
    })
}

fn required<'a>(
    meta: &'a HashMap<String, String>,
    key: &'static str,
) -> Result<&'a str, SkipReason> {
    match meta.get(key).map(|v| v.trim()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(SkipReason::MissingField(key)),
    }
}

fn optional(meta: &HashMap<String, String>, key: &str) -> Option<String> {
    meta.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
