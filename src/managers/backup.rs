//! Backup manager - orchestrates backup, restore and catalog operations

use crate::config::{expand_tilde, Config};
use crate::connectors::{create_connector, Connector};
use crate::error::{BackupError, BackupResult};
use crate::managers::catalog::Catalog;
use crate::managers::notification::NotificationManager;
use crate::managers::restore::RestoreManager;
use crate::managers::retention::{RetentionManager, RetentionOutcome};
use crate::models::{BackupKind, BackupOptions, BackupRecord, RestoreReport};
use crate::pipeline::{ConduitOptions, Pipeline};
use crate::providers::{create_provider, Provider};
use crate::strategies::{run_backup, strategy_for, BackupContext};
use crate::utils::locker::BackupLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A restore as requested by the caller
#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub database: String,
    pub storage: String,
    pub backup_id: String,
    /// Export the dump here instead of restoring into the database
    pub output_dir: Option<PathBuf>,
}

pub struct BackupManager {
    config: Config,
    notification_manager: Option<NotificationManager>,
    cancel: CancellationToken,
}

impl BackupManager {
    /// Create new backup manager
    pub fn new(config: Config) -> Self {
        // Create notification manager if webhook URL is configured
        let notification_manager = if !config.notifications.slack_webhook_url.is_empty() {
            Some(NotificationManager::new(config.notifications.clone()))
        } else {
            None
        };

        Self {
            config,
            notification_manager,
            cancel: CancellationToken::new(),
        }
    }

    /// Create backup manager with a specific notification manager
    pub fn with_notification_manager(config: Config, notification_manager: NotificationManager) -> Self {
        Self {
            config,
            notification_manager: Some(notification_manager),
            cancel: CancellationToken::new(),
        }
    }

    /// Share a cancellation token with the caller (Ctrl-C handler, tests)
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn pipeline(&self) -> Pipeline {
        let global = &self.config.global;
        Pipeline::new(ConduitOptions {
            depth: global.conduit_depth,
            chunk_size: global.chunk_size_kb * 1024,
            ..ConduitOptions::default()
        })
        .with_grace(Duration::from_secs(global.cancel_grace_seconds))
    }

    fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.config.global.default_timeout_seconds)
    }

    fn lock(&self, database: &str) -> BackupResult<BackupLock> {
        let lock_dir = expand_tilde(&self.config.global.lock_directory);
        BackupLock::acquire(&lock_dir, database).map_err(|e| BackupError::Lock(format!("{:#}", e)))
    }

    fn open_database(&self, name: &str) -> BackupResult<Arc<dyn Connector>> {
        let config = self.config.resolve_database(name)?;
        create_connector(name, config)
    }

    async fn open_storage(&self, name: &str) -> BackupResult<Arc<dyn Provider>> {
        let config = self.config.resolve_storage(name)?;
        create_provider(name, config).await
    }

    fn engine_of(&self, database: &str) -> BackupResult<&'static str> {
        Ok(self.config.resolve_database(database)?.db_type.as_str())
    }

    /// Child token that also fires when the operation timeout elapses
    fn operation_token(&self) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let token = self.cancel.child_token();
        let timer_token = token.clone();
        let timeout = self.operation_timeout();
        let timer = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    warn!("Operation timed out after {:?}, cancelling", timeout);
                    timer_token.cancel();
                }
                _ = timer_token.cancelled() => {}
            }
        });
        (token, timer)
    }

    /// A cancellation of the operation token alone means the timer fired
    fn label_timeout<T>(&self, token: &CancellationToken, result: BackupResult<T>) -> BackupResult<T> {
        match result {
            Err(BackupError::Cancelled { what, record, report })
                if token.is_cancelled() && !self.cancel.is_cancelled() =>
            {
                Err(BackupError::Cancelled {
                    what: format!("{} timed out after {}s", what, self.config.global.default_timeout_seconds),
                    record,
                    report,
                })
            }
            other => other,
        }
    }

    /// Run one backup with the configured database and storage
    pub async fn backup(&self, options: BackupOptions) -> BackupResult<BackupRecord> {
        // Name resolution happens before any I/O
        self.config.resolve_database(&options.source_db)?;
        self.config.resolve_storage(&options.dest_storage)?;

        let database = options.source_db.clone();
        let storage = options.dest_storage.clone();

        let result = async {
            let connector = self.open_database(&database)?;
            let provider = self.open_storage(&storage).await?;
            self.backup_with(connector, provider, options).await
        }
        .await;

        if let Some(ref manager) = self.notification_manager {
            match &result {
                Ok(record) => manager.notify_success(record, &storage).await,
                Err(e) => {
                    manager
                        .notify_failure(&database, &storage, e.record(), &e.to_string())
                        .await
                }
            }
        }

        result
    }

    /// Run one backup against explicit collaborators
    pub async fn backup_with(
        &self,
        connector: Arc<dyn Connector>,
        provider: Arc<dyn Provider>,
        options: BackupOptions,
    ) -> BackupResult<BackupRecord> {
        let _lock = self.lock(&options.source_db)?;
        let start_time = Instant::now();

        connector
            .connect()
            .await
            .map_err(|cause| BackupError::Connection {
                database: options.source_db.clone(),
                cause,
            })?;

        let (token, timer) = self.operation_token();
        let database = options.source_db.clone();
        let ctx = BackupContext {
            connector: Arc::clone(&connector),
            catalog: Catalog::new(Arc::clone(&provider)),
            provider,
            pipeline: self.pipeline(),
            options,
            orphan_policy: self.config.global.orphan_policy,
            cancel: token.clone(),
        };

        let strategy = strategy_for(ctx.options.kind);
        let result = run_backup(strategy.as_ref(), &ctx).await;
        timer.abort();
        let result = self.label_timeout(&token, result);

        if let Err(e) = connector.close().await {
            warn!("Failed to close connection to '{}': {:#}", database, e);
        }

        match &result {
            Ok(record) => info!(
                backup_id = %record.id,
                database = %database,
                "Backup completed in {:.2}s",
                start_time.elapsed().as_secs_f64()
            ),
            Err(e) => error!(database = %database, "Backup failed: {}", e),
        }
        result
    }

    /// Restore a backup (with its chain) into its database, or export it
    pub async fn restore(&self, request: &RestoreRequest) -> BackupResult<RestoreReport> {
        self.config.resolve_database(&request.database)?;
        self.config.resolve_storage(&request.storage)?;

        let provider = self.open_storage(&request.storage).await?;
        let (token, timer) = self.operation_token();
        let manager = RestoreManager::new(Catalog::new(provider), self.pipeline(), token.clone());

        let result = match request.output_dir {
            Some(ref dir) => manager.export(&request.backup_id, &expand_tilde(dir)).await,
            None => match self.open_database(&request.database) {
                Ok(connector) => self.restore_into(&manager, connector, request).await,
                Err(e) => Err(e),
            },
        };
        timer.abort();
        self.label_timeout(&token, result)
    }

    async fn restore_into(
        &self,
        manager: &RestoreManager,
        connector: Arc<dyn Connector>,
        request: &RestoreRequest,
    ) -> BackupResult<RestoreReport> {
        let _lock = self.lock(&request.database)?;
        connector
            .connect()
            .await
            .map_err(|cause| BackupError::Connection {
                database: request.database.clone(),
                cause,
            })?;

        let result = manager.restore(&connector, &request.backup_id).await;

        if let Err(e) = connector.close().await {
            warn!("Failed to close connection to '{}': {:#}", request.database, e);
        }
        result
    }

    /// Backups of a database in a storage, newest first
    pub async fn list(&self, database: &str, storage: &str) -> BackupResult<Vec<BackupRecord>> {
        let engine = self.engine_of(database)?;
        self.config.resolve_storage(storage)?;
        let catalog = Catalog::new(self.open_storage(storage).await?);
        catalog.list_for(engine, database).await
    }

    /// Delete one backup of a database
    pub async fn delete(&self, database: &str, storage: &str, backup_id: &str) -> BackupResult<BackupRecord> {
        self.config.resolve_database(database)?;
        self.config.resolve_storage(storage)?;
        let catalog = Catalog::new(self.open_storage(storage).await?);

        let record = catalog.get(backup_id).await?;
        if record.source_database != database {
            return Err(BackupError::NotFound(backup_id.to_string()));
        }

        let dependents: Vec<String> = catalog
            .list_for(&record.engine, database)
            .await?
            .into_iter()
            .filter(|r| r.predecessor() == Some(backup_id) || r.base_backup_id.as_deref() == Some(backup_id))
            .map(|r| r.id)
            .collect();
        if !dependents.is_empty() {
            warn!(
                backup_id,
                "Deleting a backup that {} other backup(s) depend on: {}",
                dependents.len(),
                dependents.join(", ")
            );
        }

        let deleted = catalog.delete(backup_id).await?;
        info!(backup_id, database, "Deleted backup {}", deleted.storage_path);
        Ok(deleted)
    }

    /// Apply a schedule's retention policy
    pub async fn prune(&self, schedule_name: &str, dry_run: bool) -> BackupResult<RetentionOutcome> {
        let schedule = self.config.resolve_schedule(schedule_name)?;
        let engine = self.engine_of(&schedule.database)?;
        let provider = self.open_storage(&schedule.storage).await?;

        RetentionManager::new(Catalog::new(provider))
            .enforce(engine, &schedule.database, &schedule.retention(), dry_run)
            .await
    }

    /// Run a scheduled backup of one kind, then apply the schedule's retention
    pub async fn run_schedule(&self, schedule_name: &str, kind: BackupKind) -> BackupResult<BackupRecord> {
        let schedule = self.config.resolve_schedule(schedule_name)?;
        let options = BackupOptions::new(kind, &schedule.database, &schedule.storage)
            .with_compression(schedule.compress.unwrap_or(self.config.global.compression))
            .with_include(schedule.include_tables.iter().cloned())
            .with_exclude(schedule.exclude_tables.iter().cloned());

        let record = self.backup(options).await?;

        match self.prune(schedule_name, false).await {
            Ok(outcome) if !outcome.deleted.is_empty() => {
                info!(schedule = schedule_name, "Pruned {} expired backup(s)", outcome.deleted.len())
            }
            Ok(_) => {}
            Err(e) => warn!(schedule = schedule_name, "Retention failed after backup: {}", e),
        }

        Ok(record)
    }
}
