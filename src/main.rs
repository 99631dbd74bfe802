use anyhow::{Context, Result};
use backyard_backup::config::{self, Config};
use backyard_backup::managers::backup::{BackupManager, RestoreRequest};
use backyard_backup::managers::logging;
use backyard_backup::managers::scheduler::ScheduleRegistry;
use backyard_backup::models::{BackupKind, BackupOptions, BackupRecord};
use backyard_backup::utils::{self, format::format_bytes};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::warn;

#[derive(Parser)]
#[command(name = "backyard-backup")]
#[command(about = "Streaming database backups into object storage", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up a database, either by name or through a configured schedule
    Backup {
        /// Database to back up
        #[arg(long, required_unless_present = "schedule", requires = "storage")]
        db: Option<String>,

        /// Storage to write the backup to
        #[arg(long)]
        storage: Option<String>,

        /// Run the backup of a configured schedule (applies its retention afterwards)
        #[arg(long, conflicts_with_all = ["db", "storage", "include", "exclude"])]
        schedule: Option<String>,

        /// Backup type: full, incremental or differential
        #[arg(long = "type", default_value = "full")]
        kind: BackupKind,

        /// Compress the dump (defaults to the global setting)
        #[arg(long)]
        compress: Option<bool>,

        /// Only back up these tables (comma separated or repeated)
        #[arg(long, value_delimiter = ',')]
        include: Vec<String>,

        /// Skip these tables (comma separated or repeated)
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,

        /// Abort when the stored backup would exceed this many bytes
        #[arg(long)]
        max_size: Option<u64>,
    },

    /// Restore a backup (and the backups it depends on) into its database
    Restore {
        #[arg(long)]
        db: String,

        #[arg(long)]
        storage: String,

        /// Backup ID to restore
        #[arg(long)]
        id: String,

        /// Write the dump to this directory instead of restoring it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List backups of a database
    List {
        #[arg(long)]
        db: String,

        #[arg(long)]
        storage: String,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a single backup
    Delete {
        #[arg(long)]
        db: String,

        #[arg(long)]
        storage: String,

        #[arg(long)]
        id: String,
    },

    /// Apply retention policies (all schedules unless one is given)
    Prune {
        #[arg(long)]
        schedule: Option<String>,

        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate configuration file
    Validate,

    /// Show configured schedules and installed cron entries
    Schedules,

    /// Install cron entries for every configured schedule
    SetupCron {
        /// Show what would be done without making changes
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);

    // Validate prints its own findings, so it only needs console logging
    if let Commands::Validate = cli.command {
        logging::init_console_logging();
        return handle_validate(&config_path);
    }

    let config = config::load_config(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    // Setup logging with file rotation (must keep guard alive)
    let logging_config = logging::LoggingConfig::from_global(&config.global);
    let _log_guard = logging::init_logging(&logging_config)?;

    let backup_manager = BackupManager::new(config.clone());

    // First Ctrl-C cancels the running operation
    let cancel = backup_manager.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling...");
            cancel.cancel();
        }
    });

    match cli.command {
        Commands::Backup {
            db,
            storage,
            schedule,
            kind,
            compress,
            include,
            exclude,
            max_size,
        } => {
            let record = match (schedule, db, storage) {
                (Some(schedule), _, _) => {
                    println!("Running {} backup for schedule: {}", kind, schedule);
                    backup_manager.run_schedule(&schedule, kind).await?
                }
                (None, Some(db), Some(storage)) => {
                    println!("Running {} backup of '{}' to '{}'", kind, db, storage);
                    let options = BackupOptions::new(kind, &db, &storage)
                        .with_compression(compress.unwrap_or(config.global.compression))
                        .with_include(include)
                        .with_exclude(exclude)
                        .with_max_size(max_size);
                    backup_manager.backup(options).await?
                }
                _ => anyhow::bail!("Either --schedule or both --db and --storage are required"),
            };
            print_backup_summary(&record);
        }

        Commands::Restore { db, storage, id, output } => {
            let request = RestoreRequest {
                database: db,
                storage,
                backup_id: id,
                output_dir: output,
            };

            match &request.output_dir {
                Some(dir) => println!("Exporting backup {} to {}\n", request.backup_id, dir.display()),
                None => println!("Restoring backup {} into '{}'\n", request.backup_id, request.database),
            }

            let report = backup_manager.restore(&request).await?;
            match report.output_file {
                Some(ref file) => println!("✓ Backup exported to {}", file),
                None => {
                    println!("✓ Restore completed successfully!");
                    println!("Backups applied: {}", report.applied.join(" -> "));
                    if !report.tables_restored.is_empty() {
                        println!("Tables: {}", report.tables_restored.join(", "));
                    }
                }
            }
        }

        Commands::List { db, storage, json } => {
            let records = backup_manager.list(&db, &storage).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_backup_table(&db, &storage, &records);
            }
        }

        Commands::Delete { db, storage, id } => {
            let record = backup_manager.delete(&db, &storage, &id).await?;
            println!("✓ Deleted {} backup {} ({})", record.kind, record.id, record.storage_path);
        }

        Commands::Prune { schedule, dry_run } => {
            let schedules: Vec<String> = match schedule {
                Some(name) => vec![name],
                None => sorted_schedule_names(&config),
            };
            if schedules.is_empty() {
                println!("No schedules configured, nothing to prune.");
            }

            let mut failures = 0;
            for name in schedules {
                match backup_manager.prune(&name, dry_run).await {
                    Ok(outcome) => {
                        let verb = if dry_run { "Would delete" } else { "Deleted" };
                        println!("Schedule: {}", name);
                        println!("  Evaluated: {}", outcome.evaluated);
                        println!("  {}: {}", verb, outcome.deleted.len());
                        for id in &outcome.deleted {
                            println!("    - {}", id);
                        }
                        if !outcome.protected.is_empty() {
                            println!("  Kept (still needed by newer backups): {}", outcome.protected.join(", "));
                        }
                        for (id, error) in &outcome.failed {
                            eprintln!("  ✗ Failed to delete {}: {}", id, error);
                            failures += 1;
                        }
                    }
                    Err(e) => {
                        eprintln!("✗ Prune failed for schedule '{}': {}", name, e);
                        failures += 1;
                    }
                }
            }
            if failures > 0 {
                anyhow::bail!("Prune finished with {} failure(s)", failures);
            }
        }

        Commands::Validate => unreachable!("handled before configuration loading"),

        Commands::Schedules => {
            let registry = ScheduleRegistry::from_config(&config)?;
            let tasks = registry.list();
            if tasks.is_empty() {
                println!("No schedules configured.");
            } else {
                println!("  {:<28} {:<14} {:<16} {:<12} {}", "Task", "Type", "Database", "Storage", "Cron");
                println!("  {}", "-".repeat(86));
                for task in tasks {
                    println!(
                        "  {:<28} {:<14} {:<16} {:<12} {}",
                        task.name, task.kind, task.database, task.storage, task.cron
                    );
                }
            }

            match utils::cron::list_cron_jobs() {
                Ok(jobs) if jobs.is_empty() => println!("\nNo cron entries installed."),
                Ok(jobs) => {
                    println!("\nInstalled cron entries:");
                    for job in jobs {
                        println!("  {}", job);
                    }
                }
                Err(e) => eprintln!("\nCould not read crontab: {:#}", e),
            }
        }

        Commands::SetupCron { dry_run } => {
            handle_setup_cron(&config, &config_path, dry_run)?;
        }
    }

    Ok(())
}

fn handle_validate(config_path: &std::path::Path) -> Result<()> {
    println!("Validating configuration: {}\n", config_path.display());

    let config = match config::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ Configuration is invalid: {}", e);
            return Err(e.into());
        }
    };

    println!("✓ Configuration is valid\n");
    println!("Databases: {}", config.databases.len());
    for (name, database) in sorted(&config.databases) {
        println!("  {} ({})", name, database.db_type.as_str());
    }
    println!("Storage: {}", config.storage.len());
    for (name, storage) in sorted(&config.storage) {
        println!("  {} ({})", name, storage.storage_type.as_str());
    }
    println!("Schedules: {}", config.schedules.len());
    for (name, schedule) in sorted(&config.schedules) {
        println!("  {} ({} -> {})", name, schedule.database, schedule.storage);
    }
    Ok(())
}

fn handle_setup_cron(config: &Config, config_path: &std::path::Path, dry_run: bool) -> Result<()> {
    if cfg!(not(unix)) {
        anyhow::bail!("Cron job setup is only supported on Unix systems");
    }

    let binary = utils::cron::get_binary_path()?;
    let config_path = std::fs::canonicalize(config_path).unwrap_or_else(|_| config_path.to_path_buf());
    let log_dir = config::expand_tilde(&config.global.log_directory);
    let registry = ScheduleRegistry::from_config(config)?;

    println!("Installing cron jobs...");
    let mut failures = 0;
    for name in sorted_schedule_names(config) {
        let entries: Vec<String> = registry
            .for_schedule(&name)
            .iter()
            .map(|task| {
                utils::cron::render_cron_entry(&binary, &config_path, &log_dir, &name, task.kind, &task.cron)
            })
            .collect();

        match utils::cron::install_schedule(&name, &entries, dry_run) {
            Ok(()) if !dry_run => println!("  ✓ Installed {} job(s) for '{}'", entries.len(), name),
            Ok(()) => {}
            Err(e) => {
                eprintln!("  ✗ Failed to install jobs for '{}': {:#}", name, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("Cron setup finished with {} failure(s)", failures);
    }
    Ok(())
}

fn print_backup_summary(record: &BackupRecord) {
    println!("✓ Backup completed successfully");
    println!("  ID: {}", record.id);
    println!("  Type: {}", record.kind);
    if let Some(ref base) = record.base_backup_id {
        println!("  Base: {}", base);
    }
    println!("  Size: {}", format_bytes(record.size_bytes));
    println!("  Tables: {}", record.tables_included.len());
    println!("  Location: {}", record.storage_path);
}

fn print_backup_table(db: &str, storage: &str, records: &[BackupRecord]) {
    println!("=== Backups of '{}' in '{}' ===\n", db, storage);
    if records.is_empty() {
        println!("  No backups found.");
        return;
    }

    println!("  {:<38} {:<14} {:<20} {:>10}  {}", "ID", "Type", "Date", "Size", "Base");
    println!("  {}", "-".repeat(100));
    for record in records {
        println!(
            "  {:<38} {:<14} {:<20} {:>10}  {}",
            record.id,
            record.kind,
            record.started_at.format("%Y-%m-%d %H:%M:%S"),
            format_bytes(record.size_bytes),
            record.base_backup_id.as_deref().unwrap_or("-")
        );
    }
    println!("\n  Total: {} backups", records.len());
}

fn sorted<V>(map: &std::collections::HashMap<String, V>) -> Vec<(&String, &V)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

fn sorted_schedule_names(config: &Config) -> Vec<String> {
    sorted(&config.schedules).into_iter().map(|(name, _)| name.clone()).collect()
}
