//! Utilities for running external database tools
//!
//! Dump tools stream their stdout into a sink and restore tools read their
//! stdin from a source, so payloads never pass through memory as a whole.
//! Every child is spawned with `kill_on_drop`, so cancelling the future that
//! owns it terminates the process.

use anyhow::{Context, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, error};

/// Program, arguments and environment of one tool invocation
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl ToolCommand {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable; empty values are skipped
    pub fn env(mut self, key: &str, value: &str) -> Self {
        if !value.is_empty() {
            self.envs.push((key.to_string(), value.to_string()));
        }
        self
    }

    /// Command line for logs, without environment values
    pub fn display(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd.kill_on_drop(true);
        cmd
    }
}

/// Check that a tool is installed
pub fn ensure_tool(program: &str) -> Result<()> {
    which::which(program)
        .map(|_| ())
        .with_context(|| format!("'{}' not found in PATH", program))
}

/// Run a tool and return its stdout
pub async fn run_command_stdout(command: &ToolCommand, timeout: Option<Duration>) -> Result<String> {
    debug!("Running command: {}", command.display());

    let mut cmd = command.build();
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, cmd.output())
            .await
            .map_err(|_| anyhow::anyhow!("Command timed out after {:?}: {}", limit, command.program))?,
        None => cmd.output().await,
    }
    .with_context(|| format!("Failed to execute {}", command.program))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("Command failed: {}", command.display());
        error!("Stderr: {}", stderr.trim());
        anyhow::bail!(
            "{} failed with exit code {:?}: {}",
            command.program,
            output.status.code(),
            stderr.trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Run a tool and stream its stdout into `sink`
pub async fn stream_command_output(
    command: &ToolCommand,
    sink: &mut (dyn AsyncWrite + Send + Unpin),
) -> Result<u64> {
    debug!("Streaming output of: {}", command.display());

    let mut cmd = command.build();
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {}", command.program))?;

    let stderr_task = collect_stderr(&mut child);
    let mut stdout = child
        .stdout
        .take()
        .context("Failed to capture stdout")?;

    let copied = match tokio::io::copy(&mut stdout, sink).await {
        Ok(n) => n,
        Err(e) => {
            // The sink is gone; stop the tool instead of letting it block on a full pipe
            if let Err(kill) = child.kill().await {
                debug!("Failed to kill {}: {}", command.program, kill);
            }
            return Err(anyhow::Error::new(e)
                .context(format!("Failed to stream output of {}", command.program)));
        }
    };
    drop(stdout);

    let status = child
        .wait()
        .await
        .with_context(|| format!("Failed to wait for {}", command.program))?;
    let stderr = stderr_task.await.unwrap_or_default();

    if !status.success() {
        anyhow::bail!(
            "{} failed with exit code {:?}: {}",
            command.program,
            status.code(),
            stderr.trim()
        );
    }

    Ok(copied)
}

/// Run a tool with `source` fed to its stdin.
///
/// With `skip_empty` set, an empty source does not start the tool at all.
pub async fn feed_command_input(
    command: &ToolCommand,
    source: &mut (dyn AsyncRead + Send + Unpin),
    skip_empty: bool,
) -> Result<u64> {
    let mut first = vec![0u8; 64 * 1024];
    let n = source.read(&mut first).await.context("Failed to read restore stream")?;
    if n == 0 && skip_empty {
        debug!("Empty input, not running {}", command.program);
        return Ok(0);
    }
    first.truncate(n);

    debug!("Feeding input to: {}", command.display());

    let mut cmd = command.build();
    cmd.stdin(Stdio::piped()).stdout(Stdio::null()).stderr(Stdio::piped());
    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {}", command.program))?;

    let stderr_task = collect_stderr(&mut child);
    let mut stdin = child.stdin.take().context("Failed to open stdin")?;

    let fed = async {
        stdin.write_all(&first).await?;
        let rest = tokio::io::copy(source, &mut stdin).await?;
        stdin.shutdown().await?;
        drop(stdin);
        Ok::<u64, std::io::Error>(n as u64 + rest)
    }
    .await
    .with_context(|| format!("Failed to feed input to {}", command.program));

    let status = child
        .wait()
        .await
        .with_context(|| format!("Failed to wait for {}", command.program))?;
    let stderr = stderr_task.await.unwrap_or_default();

    if !status.success() {
        anyhow::bail!(
            "{} failed with exit code {:?}: {}",
            command.program,
            status.code(),
            stderr.trim()
        );
    }

    fed
}

fn collect_stderr(child: &mut Child) -> tokio::task::JoinHandle<String> {
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        let mut buffer = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut buffer).await;
        }
        buffer
    })
}
