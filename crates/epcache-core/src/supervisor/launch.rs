//! Spawning a worker process and following it until it exits.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::commit::cached_record;
use super::marker::MarkerDir;
use crate::control::TERMINATE_COMMAND;
use crate::detail::ContentDetail;
use crate::error::LaunchError;
use crate::protocol::{WorkerJob, WorkerMessage};
use crate::scheduler::next_run_millis;
use crate::store::{now_millis, Task, TaskDb};

/// Program and leading arguments used to start a worker.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// This executable's hidden `worker` subcommand.
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe().context("locate current executable")?;
        Ok(Self::new(exe, vec!["worker".to_string()]))
    }
}

/// Registry entry for one task. The worker is told to stop through `stop`.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub stop: CancellationToken,
    pub pid: Option<u32>,
    pub started_at: i64,
}

impl WorkerHandle {
    pub(crate) fn reserved() -> Self {
        Self {
            stop: CancellationToken::new(),
            pid: None,
            started_at: now_millis(),
        }
    }
}

pub(crate) type Registry = Arc<Mutex<HashMap<String, WorkerHandle>>>;

/// Everything the monitor needs once the worker is running.
pub(crate) struct MonitorCtx {
    pub task: Task,
    pub detail: ContentDetail,
    pub base: PathBuf,
    pub db: TaskDb,
    pub registry: Registry,
    pub markers: MarkerDir,
    pub stop_grace: Duration,
}

/// Starts the worker and hands it the job on its first stdin line.
pub(crate) async fn spawn_worker(cmd: &WorkerCommand, job: &WorkerJob) -> Result<(Child, ChildStdin, ChildStdout), LaunchError> {
    let mut child = Command::new(&cmd.program)
        .args(&cmd.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(LaunchError::ProcessLaunch)?;

    let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        let _ = child.start_kill();
        return Err(LaunchError::ProcessLaunch(std::io::Error::other("worker pipes unavailable")));
    };

    let line = serde_json::to_string(job).map_err(|e| LaunchError::JobHandoff(e.into()))?;
    let handoff = async {
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    }
    .await;
    if let Err(e) = handoff {
        let _ = child.start_kill();
        return Err(LaunchError::JobHandoff(e));
    }
    Ok((child, stdin, stdout))
}

/// Reads worker messages in order until stdout closes, then reaps the
/// process. A cancelled `stop` sends `terminate` and kills the worker if it
/// is still alive after the grace window. The registry entry and marker are
/// removed on exit.
pub(crate) async fn monitor(ctx: MonitorCtx, mut child: Child, stdin: ChildStdin, stdout: ChildStdout, stop: CancellationToken) {
    let task_id = ctx.task.id.clone();
    let mut stdin = Some(stdin);
    let mut lines = BufReader::new(stdout).lines();
    let mut stdout_open = true;
    let mut kill_at: Option<Instant> = None;
    let mut killed = false;

    let status: Option<ExitStatus> = loop {
        let deadline = kill_at;
        let kill_deadline = async move {
            match deadline {
                Some(t) => tokio::time::sleep_until(t).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            line = lines.next_line(), if stdout_open => match line {
                Ok(Some(line)) => handle_line(&ctx, &line).await,
                Ok(None) => stdout_open = false,
                Err(e) => {
                    tracing::warn!(task_id = %task_id, "worker stdout: {}", e);
                    stdout_open = false;
                }
            },
            _ = stop.cancelled(), if kill_at.is_none() => {
                tracing::info!(task_id = %task_id, "sending terminate to worker");
                send_terminate(&mut stdin).await;
                kill_at = Some(Instant::now() + ctx.stop_grace);
            }
            _ = kill_deadline, if !killed => {
                tracing::warn!(task_id = %task_id, "worker still running after grace period, killing");
                let _ = child.start_kill();
                killed = true;
            }
            res = child.wait(), if !stdout_open || killed => match res {
                Ok(s) => break Some(s),
                Err(e) => {
                    tracing::error!(task_id = %task_id, "wait for worker: {}", e);
                    break None;
                }
            },
        }
    };

    match status {
        Some(s) if s.success() => tracing::info!(task_id = %task_id, "worker exited: {}", s),
        Some(s) => tracing::warn!(task_id = %task_id, "worker exited: {}", s),
        None => {}
    }
    ctx.registry.lock().unwrap().remove(&task_id);
    if let Err(e) = ctx.markers.release(&task_id) {
        tracing::warn!(task_id = %task_id, "release running marker: {}", e);
    }
}

async fn send_terminate(stdin: &mut Option<ChildStdin>) {
    let Some(mut pipe) = stdin.take() else {
        return;
    };
    let line = format!("{}\n", TERMINATE_COMMAND);
    let res = async {
        pipe.write_all(line.as_bytes()).await?;
        pipe.flush().await
    }
    .await;
    if let Err(e) = res {
        tracing::debug!("terminate write failed: {}", e);
    }
    // Dropping the pipe closes the worker's stdin as well.
}

async fn handle_line(ctx: &MonitorCtx, line: &str) {
    let id = ctx.task.id.as_str();
    let msg = match WorkerMessage::from_line(line) {
        Ok(m) => m,
        Err(_) => {
            tracing::debug!(task_id = %id, "worker: {}", line);
            return;
        }
    };
    match msg {
        WorkerMessage::Info(text) => tracing::info!(task_id = %id, "{}", text),
        WorkerMessage::Warn(text) => tracing::warn!(task_id = %id, "{}", text),
        WorkerMessage::Error(text) => tracing::error!(task_id = %id, "{}", text),
        WorkerMessage::Debug(text) => tracing::debug!(task_id = %id, "{}", text),
        WorkerMessage::DownloadComplete(done) => {
            tracing::info!(
                task_id = %id,
                episode = done.episode_number,
                path = %done.file_path.display(),
                "episode downloaded"
            );
            let record = cached_record(&ctx.task, &ctx.detail, &ctx.base, &done);
            let committed = ctx
                .db
                .commit_episode(&record, |t| Some(next_run_millis(&t.cron_expression, now_millis())))
                .await;
            match committed {
                Ok(Some(task)) => tracing::debug!(
                    task_id = %id,
                    start_episode = task.start_episode,
                    enabled = task.enabled,
                    "resume pointer updated"
                ),
                Ok(None) => tracing::warn!(task_id = %id, "task removed while running; cache record kept"),
                Err(e) => tracing::error!(task_id = %id, "commit episode {}: {:#}", done.episode_number, e),
            }
        }
        WorkerMessage::DownloadError(failed) => {
            tracing::warn!(task_id = %id, episode = failed.episode_number, "episode download failed");
        }
    }
}
