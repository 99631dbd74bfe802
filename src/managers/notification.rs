//! Slack webhook notification manager
//!
//! Sends notifications to a Slack incoming webhook for backup events.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

use crate::config::{expand_tilde, NotificationConfig, NotifyEvent};
use crate::models::BackupRecord;
use crate::utils::format::{format_bytes, format_duration};

/// Notification manager for sending Slack webhooks
pub struct NotificationManager {
    config: NotificationConfig,
    cache_path: PathBuf,
    client: reqwest::Client,
}

/// Slack attachment colors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationColor {
    Success,
    Failure,
}

impl NotificationColor {
    fn as_str(&self) -> &'static str {
        match self {
            NotificationColor::Success => "good",
            NotificationColor::Failure => "danger",
        }
    }
}

/// Notification payload to send
#[derive(Debug, Clone)]
pub struct Notification {
    pub event_type: NotifyEvent,
    pub database: String,
    pub storage: String,
    pub backup_id: Option<String>,
    pub kind: Option<String>,
    pub size_bytes: Option<u64>,
    pub duration_secs: Option<u64>,
    pub message: String,
    pub error: Option<String>,
}

/// Slack webhook payload
#[derive(Debug, Serialize)]
struct SlackPayload {
    text: String,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    color: String,
    title: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<SlackField>,
    footer: String,
    ts: i64,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: String,
    value: String,
    short: bool,
}

/// Rate limit cache entry
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    /// Unix timestamp of last notification
    last_sent: u64,
    /// Count of notifications sent in current window
    count: u32,
}

/// Rate limit cache
#[derive(Debug, Serialize, Deserialize, Default)]
struct NotificationCache {
    entries: HashMap<String, CacheEntry>,
}

impl NotificationManager {
    pub fn new(config: NotificationConfig) -> Self {
        let cache_path = expand_tilde(&config.cache_file);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            config,
            cache_path,
            client,
        }
    }

    /// Check if notifications are enabled for an event type
    pub fn is_enabled(&self, event: &NotifyEvent) -> bool {
        if self.config.slack_webhook_url.is_empty() {
            return false;
        }
        self.config.notify_on.contains(event)
    }

    /// Send a notification if enabled and not rate-limited
    pub async fn send(&self, notification: Notification) -> Result<()> {
        if !self.is_enabled(&notification.event_type) {
            debug!(
                "Notification type {:?} not enabled, skipping",
                notification.event_type
            );
            return Ok(());
        }

        let cache_key = format!(
            "{}:{}:{:?}",
            notification.database, notification.storage, notification.event_type
        );

        if self.is_rate_limited(&cache_key)? {
            debug!("Notification rate-limited for key: {}", cache_key);
            return Ok(());
        }

        let payload = build_payload(&notification);
        self.send_webhook(&payload).await?;

        self.update_cache(&cache_key)?;

        info!(
            "Sent {:?} notification for database '{}'",
            notification.event_type, notification.database
        );

        Ok(())
    }

    /// Notify about a completed backup; delivery failures are only logged
    pub async fn notify_success(&self, record: &BackupRecord, storage: &str) {
        let notification = Notification {
            event_type: NotifyEvent::Success,
            database: record.source_database.clone(),
            storage: storage.to_string(),
            backup_id: Some(record.id.clone()),
            kind: Some(record.kind.to_string()),
            size_bytes: Some(record.size_bytes),
            duration_secs: Some(record.duration_secs()),
            message: format!("Backup completed for database '{}'", record.source_database),
            error: None,
        };
        if let Err(e) = self.send(notification).await {
            warn!("Failed to send success notification: {:#}", e);
        }
    }

    /// Notify about a failed backup; delivery failures are only logged
    pub async fn notify_failure(
        &self,
        database: &str,
        storage: &str,
        record: Option<&BackupRecord>,
        error: &str,
    ) {
        let notification = Notification {
            event_type: NotifyEvent::Failure,
            database: database.to_string(),
            storage: storage.to_string(),
            backup_id: record.map(|r| r.id.clone()),
            kind: record.map(|r| r.kind.to_string()),
            size_bytes: None,
            duration_secs: record.map(BackupRecord::duration_secs),
            message: format!("Backup failed for database '{}'", database),
            error: Some(error.to_string()),
        };
        if let Err(e) = self.send(notification).await {
            warn!("Failed to send failure notification: {:#}", e);
        }
    }

    async fn send_webhook(&self, payload: &SlackPayload) -> Result<()> {
        let response = self
            .client
            .post(&self.config.slack_webhook_url)
            .json(payload)
            .send()
            .await
            .context("Failed to send Slack webhook")?;

        let status = response.status();
        if status.is_success() {
            debug!("Slack webhook sent successfully");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            error!("Slack webhook failed with status {}: {}", status, body);
            anyhow::bail!("Slack webhook failed with status {}: {}", status, body)
        }
    }

    fn is_rate_limited(&self, cache_key: &str) -> Result<bool> {
        let cache = self.load_cache()?;

        if let Some(entry) = cache.entries.get(cache_key) {
            let rate_limit_secs = self.config.rate_limit_minutes * 60;
            if now_secs().saturating_sub(entry.last_sent) < rate_limit_secs {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn update_cache(&self, cache_key: &str) -> Result<()> {
        let mut cache = self.load_cache()?;
        let now = now_secs();

        let count = cache.entries.get(cache_key).map_or(1, |e| e.count + 1);
        cache
            .entries
            .insert(cache_key.to_string(), CacheEntry { last_sent: now, count });

        // Clean up old entries (older than 24 hours)
        let cutoff = now.saturating_sub(86400);
        cache.entries.retain(|_, v| v.last_sent > cutoff);

        self.save_cache(&cache)
    }

    fn load_cache(&self) -> Result<NotificationCache> {
        if !self.cache_path.exists() {
            return Ok(NotificationCache::default());
        }

        let content =
            fs::read_to_string(&self.cache_path).context("Failed to read notification cache")?;

        serde_json::from_str(&content).context("Failed to parse notification cache")
    }

    fn save_cache(&self, cache: &NotificationCache) -> Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content =
            serde_json::to_string_pretty(cache).context("Failed to serialize notification cache")?;

        fs::write(&self.cache_path, content).context("Failed to write notification cache")?;

        Ok(())
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn build_payload(notification: &Notification) -> SlackPayload {
    let (color, label) = match notification.event_type {
        NotifyEvent::Success => (NotificationColor::Success, "succeeded"),
        NotifyEvent::Failure => (NotificationColor::Failure, "failed"),
    };

    let mut fields = Vec::new();
    if let Some(ref id) = notification.backup_id {
        fields.push(SlackField {
            title: "Backup ID".to_string(),
            value: id.clone(),
            short: false,
        });
    }
    if let Some(ref kind) = notification.kind {
        fields.push(SlackField {
            title: "Type".to_string(),
            value: kind.clone(),
            short: true,
        });
    }
    fields.push(SlackField {
        title: "Database".to_string(),
        value: notification.database.clone(),
        short: true,
    });
    if let Some(size) = notification.size_bytes {
        fields.push(SlackField {
            title: "Size".to_string(),
            value: format_bytes(size),
            short: true,
        });
    }
    if let Some(duration) = notification.duration_secs {
        fields.push(SlackField {
            title: "Duration".to_string(),
            value: format_duration(duration),
            short: true,
        });
    }
    if let Some(ref error) = notification.error {
        // Truncate error message if too long
        let error_display = if error.chars().count() > 500 {
            format!("{}...", error.chars().take(497).collect::<String>())
        } else {
            error.clone()
        };
        fields.push(SlackField {
            title: "Error".to_string(),
            value: format!("```{}```", error_display),
            short: false,
        });
    }

    SlackPayload {
        text: notification.message.clone(),
        attachments: vec![SlackAttachment {
            color: color.as_str().to_string(),
            title: format!("Backup {} ({})", label, notification.storage),
            fields,
            footer: "backyard-backup".to_string(),
            ts: chrono::Utc::now().timestamp(),
        }],
    }
}
