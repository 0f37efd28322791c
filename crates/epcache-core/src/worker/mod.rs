//! Task worker: processes a job's episodes one after another and reports
//! each outcome as a protocol message.
//!
//! [`run_job`] is the in-process engine; [`stdio::run_stdio`] wraps it in the
//! process protocol used by the supervisor.

mod episode;
pub mod stdio;

pub use stdio::run_stdio;

use tokio_util::sync::CancellationToken;

use crate::protocol::WorkerJob;
use crate::report::Reporter;

/// Where the worker is in its job. Logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    ResolvingManifest(u32),
    Downloading(u32),
    Merging(u32),
    Done,
    Terminated,
}

impl WorkerState {
    fn enter(&mut self, next: WorkerState) {
        tracing::debug!(from = ?*self, to = ?next, "worker state");
        *self = next;
    }
}

/// Per-job outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub completed: Vec<u32>,
    pub failed: Vec<u32>,
    pub terminated: bool,
}

impl WorkerSummary {
    /// 0 when at least one episode completed.
    pub fn exit_code(&self) -> i32 {
        if self.completed.is_empty() {
            1
        } else {
            0
        }
    }
}

/// Runs every episode of `job` in order, stopping early once `cancel` fires.
pub async fn run_job(job: &WorkerJob, reporter: &Reporter, cancel: &CancellationToken) -> WorkerSummary {
    let mut state = WorkerState::Idle;
    let mut summary = WorkerSummary::default();
    reporter.info(format!(
        "task {} ({}): {} episode(s) into {}",
        job.task_title,
        job.task_id,
        job.episodes.len(),
        job.download_dir.display()
    ));

    for ep in &job.episodes {
        if cancel.is_cancelled() {
            summary.terminated = true;
            break;
        }
        match episode::download_episode(job, ep, cancel, reporter, &mut state).await {
            Ok(path) => {
                reporter.info(format!("episode {} saved to {}", ep.episode_number, path.display()));
                reporter.complete(ep.episode_number, path, &job.task_title);
                summary.completed.push(ep.episode_number);
            }
            Err(e) if cancel.is_cancelled() && e.is_aborted() => {
                reporter.warn(format!("episode {} interrupted by termination", ep.episode_number));
                summary.terminated = true;
                break;
            }
            Err(e) => {
                reporter.error(format!("episode {} failed: {}", ep.episode_number, e));
                reporter.failed(ep.episode_number, &job.task_title);
                summary.failed.push(ep.episode_number);
            }
        }
    }

    state.enter(if summary.terminated {
        WorkerState::Terminated
    } else {
        WorkerState::Done
    });
    reporter.info(format!(
        "task finished: {} succeeded, {} failed",
        summary.completed.len(),
        summary.failed.len()
    ));
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EpisodeSource, WorkerMessage, WorkerSettings};

    fn job(dir: &std::path::Path, episodes: Vec<EpisodeSource>) -> WorkerJob {
        WorkerJob {
            task_id: "t1".into(),
            task_title: "Show".into(),
            download_dir: dir.to_path_buf(),
            timeout_secs: 5,
            episodes,
            settings: WorkerSettings {
                retries: 0,
                retry_delay_ms: 0,
                ..WorkerSettings::default()
            },
        }
    }

    #[test]
    fn exit_code_reflects_completions() {
        let mut s = WorkerSummary::default();
        assert_eq!(s.exit_code(), 1);
        s.failed.push(1);
        assert_eq!(s.exit_code(), 1);
        s.completed.push(2);
        assert_eq!(s.exit_code(), 0);
    }

    #[tokio::test]
    async fn already_cancelled_job_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let j = job(
            dir.path(),
            vec![EpisodeSource {
                episode_number: 1,
                url: "http://127.0.0.1:9/ep1.mp4".into(),
            }],
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = run_job(&j, &Reporter::silent(), &cancel).await;
        assert!(summary.terminated);
        assert!(summary.completed.is_empty() && summary.failed.is_empty());
    }

    #[tokio::test]
    async fn existing_file_completes_without_network() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Show_E01.mp4"), b"done").unwrap();
        let j = job(
            dir.path(),
            vec![EpisodeSource {
                episode_number: 1,
                url: "http://127.0.0.1:9/ep1.mp4".into(),
            }],
        );
        let (reporter, mut rx) = Reporter::channel();
        let summary = run_job(&j, &reporter, &CancellationToken::new()).await;
        assert_eq!(summary.completed, vec![1]);
        drop(reporter);
        let mut saw_complete = false;
        while let Some(msg) = rx.recv().await {
            if let WorkerMessage::DownloadComplete(c) = msg {
                assert_eq!(c.episode_number, 1);
                assert_eq!(c.file_path, dir.path().join("Show_E01.mp4"));
                saw_complete = true;
            }
        }
        assert!(saw_complete);
    }

    #[tokio::test]
    async fn unreachable_episode_reports_error_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Show_E02.mp4"), b"done").unwrap();
        let j = job(
            dir.path(),
            vec![
                EpisodeSource {
                    episode_number: 1,
                    url: "http://127.0.0.1:9/ep1.mp4".into(),
                },
                EpisodeSource {
                    episode_number: 2,
                    url: "http://127.0.0.1:9/ep2.mp4".into(),
                },
            ],
        );
        let summary = run_job(&j, &Reporter::silent(), &CancellationToken::new()).await;
        assert_eq!(summary.failed, vec![1]);
        assert_eq!(summary.completed, vec![2]);
        assert_eq!(summary.exit_code(), 0);
    }
}
