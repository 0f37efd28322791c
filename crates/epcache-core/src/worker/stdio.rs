//! Worker process entry: job on the first stdin line, messages on stdout.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use super::run_job;
use crate::control::is_terminate_line;
use crate::protocol::{WorkerJob, WorkerMessage};
use crate::report::Reporter;

/// Runs the worker protocol on this process's stdin/stdout and returns the exit code.
///
/// `terminate` (or stdin closing, which means the supervisor is gone) cancels
/// the job; if the job has not wound down after the grace period the process
/// exits on its own.
pub async fn run_stdio() -> Result<i32> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let first = lines
        .next_line()
        .await
        .context("read job descriptor")?
        .context("stdin closed before job descriptor")?;
    let job: WorkerJob = serde_json::from_str(&first).context("parse job descriptor")?;
    tracing::info!(task_id = %job.task_id, episodes = job.episodes.len(), "worker started");

    let cancel = CancellationToken::new();
    let completed = Arc::new(AtomicUsize::new(0));
    let (reporter, mut rx) = Reporter::channel();

    let written = Arc::clone(&completed);
    let writer = tokio::spawn(async move {
        let mut out = tokio::io::stdout();
        while let Some(msg) = rx.recv().await {
            if matches!(msg, WorkerMessage::DownloadComplete(_)) {
                written.fetch_add(1, Ordering::SeqCst);
            }
            let line = match msg.to_line() {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!("failed to encode worker message: {}", e);
                    continue;
                }
            };
            let res = async {
                out.write_all(line.as_bytes()).await?;
                out.write_all(b"\n").await?;
                out.flush().await
            }
            .await;
            if let Err(e) = res {
                tracing::warn!("stdout closed: {}", e);
                break;
            }
        }
    });

    let grace = job.settings.terminate_grace();
    spawn_control_reader(lines, cancel.clone(), Arc::clone(&completed), grace);

    let summary = run_job(&job, &reporter, &cancel).await;
    drop(reporter);
    let _ = writer.await;
    tracing::info!(
        task_id = %job.task_id,
        completed = summary.completed.len(),
        failed = summary.failed.len(),
        terminated = summary.terminated,
        "worker finished"
    );
    Ok(summary.exit_code())
}

fn spawn_control_reader<R>(
    mut lines: tokio::io::Lines<R>,
    cancel: CancellationToken,
    completed: Arc<AtomicUsize>,
    grace: Duration,
) where
    R: tokio::io::AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if is_terminate_line(&line) => {
                    tracing::warn!("terminate received, stopping");
                    break;
                }
                Ok(Some(line)) => {
                    tracing::debug!("ignoring control line {:?}", line);
                }
                Ok(None) | Err(_) => {
                    tracing::warn!("control channel closed, stopping");
                    break;
                }
            }
        }
        cancel.cancel();
        tokio::time::sleep(grace).await;
        let code = if completed.load(Ordering::SeqCst) > 0 { 0 } else { 1 };
        tracing::warn!("grace period elapsed, exiting with {}", code);
        std::process::exit(code);
    });
}
