//! Registry of recurring backup tasks
//!
//! Tasks are owned by a [`ScheduleRegistry`]; the crontab is only a rendering
//! of its contents.

use crate::config::Config;
use crate::models::BackupKind;
use crate::utils::cron::validate_cron_schedule;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// One recurring backup of one kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledTask {
    /// `<schedule>-<kind>`
    pub name: String,
    pub schedule: String,
    pub database: String,
    pub storage: String,
    pub kind: BackupKind,
    pub cron: String,
}

impl ScheduledTask {
    pub fn new(schedule: &str, database: &str, storage: &str, kind: BackupKind, cron: &str) -> Self {
        Self {
            name: format!("{}-{}", schedule, kind),
            schedule: schedule.to_string(),
            database: database.to_string(),
            storage: storage.to_string(),
            kind,
            cron: cron.trim().to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Task '{0}' is already scheduled")]
    Duplicate(String),

    #[error("Task '{name}' has an invalid cron expression: {cron}")]
    InvalidCron { name: String, cron: String },

    #[error("Task '{0}' is not scheduled")]
    Unknown(String),
}

#[derive(Debug, Default)]
pub struct ScheduleRegistry {
    tasks: Mutex<BTreeMap<String, ScheduledTask>>,
}

impl ScheduleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One task per cron expression of every configured schedule
    pub fn from_config(config: &Config) -> Result<Self, ScheduleError> {
        let registry = Self::new();
        for (name, schedule) in &config.schedules {
            for (kind, cron) in schedule.cron_entries() {
                registry.add(ScheduledTask::new(
                    name,
                    &schedule.database,
                    &schedule.storage,
                    kind,
                    cron,
                ))?;
            }
        }
        Ok(registry)
    }

    pub fn add(&self, task: ScheduledTask) -> Result<(), ScheduleError> {
        if !validate_cron_schedule(&task.cron) {
            return Err(ScheduleError::InvalidCron {
                name: task.name,
                cron: task.cron,
            });
        }
        let mut tasks = self.lock();
        if tasks.contains_key(&task.name) {
            return Err(ScheduleError::Duplicate(task.name));
        }
        tasks.insert(task.name.clone(), task);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<ScheduledTask, ScheduleError> {
        self.lock()
            .remove(name)
            .ok_or_else(|| ScheduleError::Unknown(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<ScheduledTask> {
        self.lock().get(name).cloned()
    }

    /// All tasks ordered by name
    pub fn list(&self) -> Vec<ScheduledTask> {
        self.lock().values().cloned().collect()
    }

    /// Tasks of one configured schedule
    pub fn for_schedule(&self, schedule: &str) -> Vec<ScheduledTask> {
        self.lock()
            .values()
            .filter(|t| t.schedule == schedule)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, ScheduledTask>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
