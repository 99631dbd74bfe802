//! Crontab management for scheduled backups

use crate::models::BackupKind;
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

const MARKER_PREFIX: &str = "# backyard-backup - schedule:";

/// Get the path to the backyard-backup binary
pub fn get_binary_path() -> Result<PathBuf> {
    env::current_exe().context("Failed to get current executable path")
}

/// Get the current crontab
pub fn get_crontab() -> Result<String> {
    let output = Command::new("crontab")
        .arg("-l")
        .output()
        .context("Failed to execute crontab -l")?;

    if !output.status.success() {
        // Empty crontab returns non-zero, check stderr
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("no crontab") {
            return Ok(String::new());
        }
        anyhow::bail!("Failed to read crontab: {}", stderr);
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Set the crontab content
pub fn set_crontab(content: &str) -> Result<()> {
    use std::io::Write;

    let mut child = Command::new("crontab")
        .arg("-")
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .context("Failed to spawn crontab")?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(content.as_bytes())
            .context("Failed to write to crontab stdin")?;
    } else {
        anyhow::bail!("Failed to open crontab stdin");
    }

    let output = child.wait_with_output().context("Failed to wait for crontab")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("Crontab command failed: {}", stderr);
    }

    info!("Crontab updated successfully");
    Ok(())
}

fn marker(schedule: &str, kind: BackupKind) -> String {
    format!("{} {} ({})", MARKER_PREFIX, schedule, kind)
}

/// Marker comment plus command line for one schedule entry
pub fn render_cron_entry(
    binary: &Path,
    config_path: &Path,
    log_dir: &Path,
    schedule: &str,
    kind: BackupKind,
    cron: &str,
) -> String {
    let log_file = log_dir.join(format!("cron-{}.log", schedule));
    format!(
        "{}\n{} {} --config {} backup --schedule {} --type {} >> {} 2>&1",
        marker(schedule, kind),
        cron,
        binary.display(),
        config_path.display(),
        schedule,
        kind,
        log_file.display()
    )
}

/// Drop every marked entry (marker line and the line after it) for a schedule
pub fn strip_schedule_entries(crontab: &str, schedule: &str) -> String {
    let prefix = format!("{} {} (", MARKER_PREFIX, schedule);
    let mut kept = Vec::new();
    let mut skip_next = false;

    for line in crontab.lines() {
        if line.starts_with(&prefix) {
            skip_next = true;
            continue;
        }
        if skip_next {
            skip_next = false;
            continue;
        }
        kept.push(line);
    }

    let mut content = kept.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    content
}

/// Install (or replace) the crontab entries of one schedule
pub fn install_schedule(schedule: &str, entries: &[String], dry_run: bool) -> Result<()> {
    if dry_run {
        println!("  [DRY RUN] Would install cron entries for '{}':", schedule);
        for entry in entries {
            println!("    {}", entry.replace('\n', "\n    "));
        }
        return Ok(());
    }

    let existing = get_crontab()?;
    if existing.contains(&format!("{} {} (", MARKER_PREFIX, schedule)) {
        warn!("Cron entries for schedule '{}' already exist, updating...", schedule);
    }

    let mut content = strip_schedule_entries(&existing, schedule);
    for entry in entries {
        content.push_str(entry);
        content.push('\n');
    }
    set_crontab(&content)?;

    info!("Installed {} cron entries for schedule: {}", entries.len(), schedule);
    Ok(())
}

/// Remove the crontab entries of one schedule
pub fn remove_schedule(schedule: &str) -> Result<()> {
    let existing = get_crontab()?;
    let stripped = strip_schedule_entries(&existing, schedule);
    if stripped.trim_end() == existing.trim_end() {
        warn!("No cron entries found for schedule '{}'", schedule);
        return Ok(());
    }

    set_crontab(&stripped)?;
    info!("Removed cron entries for schedule: {}", schedule);
    Ok(())
}

/// Validate cron schedule syntax
pub fn validate_cron_schedule(schedule: &str) -> bool {
    // Basic validation: should have 5 fields
    schedule.split_whitespace().count() == 5
}

/// List all backyard-backup cron markers
pub fn list_cron_jobs() -> Result<Vec<String>> {
    let existing = get_crontab()?;
    Ok(existing
        .lines()
        .filter(|line| line.starts_with(MARKER_PREFIX))
        .map(str::to_string)
        .collect())
}
