//! Retention policy evaluation and enforcement
//!
//! Backups are grouped by (database, kind) and ranked newest first. A backup
//! expires when it ranks beyond `max_backups` or started more than
//! `retention_days` ago; either bound is enough and a bound of 0 is off.
//! Expired backups that a retained backup still needs for restore are kept.

use super::catalog::Catalog;
use crate::error::BackupResult;
use crate::models::{BackupKind, BackupRecord, RetentionPolicy};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

/// Result of evaluating a policy against a catalog slice
#[derive(Debug, Clone, Default)]
pub struct RetentionPlan {
    /// Newest first
    pub expired: Vec<BackupRecord>,
    /// Expired by the policy but still referenced by a retained backup
    pub protected: Vec<BackupRecord>,
    pub retained: usize,
}

/// What an enforcement run did
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionOutcome {
    pub evaluated: usize,
    pub deleted: Vec<String>,
    pub protected: Vec<String>,
    /// Backup id and error for deletions that failed
    pub failed: Vec<(String, String)>,
    pub dry_run: bool,
}

/// Candidates of one (database, kind) group, given newest first
fn group_candidates<'a>(
    group: &[&'a BackupRecord],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Vec<&'a BackupRecord> {
    let cutoff = (policy.retention_days > 0).then(|| now - Duration::days(i64::from(policy.retention_days)));

    group
        .iter()
        .enumerate()
        .filter(|(rank, record)| {
            let over_count = policy.max_backups > 0 && *rank >= policy.max_backups as usize;
            let too_old = cutoff.map_or(false, |cutoff| record.started_at < cutoff);
            over_count || too_old
        })
        .map(|(_, record)| *record)
        .collect()
}

/// Split records into expired and protected backups under a policy
pub fn select_expired(records: &[BackupRecord], policy: &RetentionPolicy, now: DateTime<Utc>) -> RetentionPlan {
    let mut groups: BTreeMap<(&str, BackupKind), Vec<&BackupRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry((record.source_database.as_str(), record.kind))
            .or_default()
            .push(record);
    }

    let mut expired: HashSet<&str> = HashSet::new();
    for group in groups.values_mut() {
        group.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        for record in group_candidates(group, policy, now) {
            expired.insert(record.id.as_str());
        }
    }

    // Anything a retained backup restores on top of must stay
    let mut protected: HashSet<&str> = HashSet::new();
    loop {
        let mut changed = false;
        let retained: Vec<&BackupRecord> = records
            .iter()
            .filter(|r| !expired.contains(r.id.as_str()))
            .collect();
        for record in retained {
            for link in [record.base_backup_id.as_deref(), record.parent_backup_id.as_deref()]
                .into_iter()
                .flatten()
            {
                if let Some(id) = expired.take(link) {
                    protected.insert(id);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    let mut plan = RetentionPlan::default();
    for record in records {
        if expired.contains(record.id.as_str()) {
            plan.expired.push(record.clone());
        } else if protected.contains(record.id.as_str()) {
            plan.protected.push(record.clone());
        } else {
            plan.retained += 1;
        }
    }
    plan.expired.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    plan
}

/// Applies a retention policy to one database through the catalog
pub struct RetentionManager {
    catalog: Catalog,
}

impl RetentionManager {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    pub async fn enforce(
        &self,
        engine: &str,
        database: &str,
        policy: &RetentionPolicy,
        dry_run: bool,
    ) -> BackupResult<RetentionOutcome> {
        let records = self.catalog.list_for(engine, database).await?;
        let plan = select_expired(&records, policy, Utc::now());

        let mut outcome = RetentionOutcome {
            evaluated: records.len(),
            protected: plan.protected.iter().map(|r| r.id.clone()).collect(),
            dry_run,
            ..Default::default()
        };

        for id in &outcome.protected {
            info!(backup_id = %id, database, "Keeping expired backup, a retained backup depends on it");
        }

        for record in &plan.expired {
            if dry_run {
                info!(backup_id = %record.id, database, "[DRY RUN] Would delete expired backup");
                outcome.deleted.push(record.id.clone());
                continue;
            }
            match self.catalog.delete(&record.id).await {
                Ok(_) => {
                    info!(backup_id = %record.id, database, kind = %record.kind, "Deleted expired backup");
                    outcome.deleted.push(record.id.clone());
                }
                Err(e) => {
                    warn!(backup_id = %record.id, database, "Failed to delete expired backup: {}", e);
                    outcome.failed.push((record.id.clone(), e.to_string()));
                }
            }
        }

        Ok(outcome)
    }
}
