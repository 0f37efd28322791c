//! Task supervisor: owns the worker registry and the running markers,
//! launches one worker process per due task and commits its results.

mod commit;
mod launch;
pub mod marker;

pub use commit::cached_record;
pub use launch::{WorkerCommand, WorkerHandle};
pub use marker::{MarkerDir, MarkerRecord};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;

use crate::config::EpcacheConfig;
use crate::detail::DetailClient;
use crate::error::LaunchError;
use crate::paths::resolve_destination;
use crate::protocol::{WorkerJob, WorkerSettings};
use crate::scheduler::next_run_millis;
use crate::store::{now_millis, Task, TaskDb};
use launch::{monitor, spawn_worker, MonitorCtx, Registry};

/// Result of one launch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Launched { pid: Option<u32>, episodes: usize },
    NotFound,
    AlreadyRunning,
    /// Range exhausted; the task was disabled.
    Finished,
    AtCapacity,
    /// Another live process holds the running marker.
    MarkerHeld,
    /// Nothing new to download; `next_run` was moved to the next cron slot.
    NothingPending { next_run: i64 },
}

pub struct Supervisor {
    db: TaskDb,
    settings: WorkerSettings,
    base: PathBuf,
    max_concurrent: usize,
    stop_grace: Duration,
    markers: MarkerDir,
    detail: DetailClient,
    worker: WorkerCommand,
    registry: Registry,
}

impl Supervisor {
    pub fn new(db: TaskDb, cfg: &EpcacheConfig, state_dir: &Path, worker: WorkerCommand) -> Self {
        Self {
            db,
            settings: WorkerSettings::from_config(cfg),
            base: cfg.download_base(),
            max_concurrent: cfg.max_concurrent_tasks.max(1),
            stop_grace: cfg.stop_grace(),
            markers: MarkerDir::new(state_dir),
            detail: DetailClient::from_config(cfg),
            worker,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replaces the detail provider client.
    pub fn with_detail_client(mut self, detail: DetailClient) -> Self {
        self.detail = detail;
        self
    }

    pub fn db(&self) -> &TaskDb {
        &self.db
    }

    pub fn markers(&self) -> &MarkerDir {
        &self.markers
    }

    pub fn running_task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.registry.lock().unwrap().contains_key(task_id)
    }

    /// Runs the launch sequence for one task.
    pub async fn execute_task(&self, task_id: &str) -> Result<LaunchOutcome, LaunchError> {
        let Some(mut task) = self.db.get_task(task_id).await? else {
            return Ok(LaunchOutcome::NotFound);
        };
        if self.is_running(task_id) {
            return Ok(LaunchOutcome::AlreadyRunning);
        }
        if task.is_finished() {
            task.enabled = false;
            self.db.save_task(&task).await?;
            tracing::info!(task_id, "episode range exhausted, task disabled");
            return Ok(LaunchOutcome::Finished);
        }

        {
            let mut registry = self.registry.lock().unwrap();
            if registry.contains_key(task_id) {
                return Ok(LaunchOutcome::AlreadyRunning);
            }
            if registry.len() >= self.max_concurrent {
                return Ok(LaunchOutcome::AtCapacity);
            }
            registry.insert(task_id.to_string(), WorkerHandle::reserved());
        }

        match self.markers.acquire(task_id) {
            Ok(true) => {}
            Ok(false) => {
                self.unreserve(task_id);
                return Ok(LaunchOutcome::MarkerHeld);
            }
            Err(e) => {
                self.unreserve(task_id);
                return Err(LaunchError::Marker(e));
            }
        }

        let outcome = self.prepare_and_spawn(task).await;
        if !matches!(outcome, Ok(LaunchOutcome::Launched { .. })) {
            self.unreserve(task_id);
            if let Err(e) = self.markers.release(task_id) {
                tracing::warn!(task_id, "release running marker: {}", e);
            }
        }
        outcome
    }

    async fn prepare_and_spawn(&self, mut task: Task) -> Result<LaunchOutcome, LaunchError> {
        let detail = self
            .detail
            .fetch(&task.source, &task.source_id)
            .await
            .map_err(|e| LaunchError::Detail(format!("{:#}", e)))?;
        let dir = resolve_destination(&self.base, Path::new(&task.download_path));
        let cached = self.db.cached_episode_numbers(&task.id).await?;
        let pending = detail.pending_episodes(&task, &cached);

        if pending.is_empty() {
            let next_run = next_run_millis(&task.cron_expression, now_millis());
            task.next_run = Some(next_run);
            self.db.save_task(&task).await?;
            tracing::info!(task_id = %task.id, next_run, "no pending episodes");
            return Ok(LaunchOutcome::NothingPending { next_run });
        }

        let job = WorkerJob {
            task_id: task.id.clone(),
            task_title: task.title.clone(),
            download_dir: dir,
            timeout_secs: task.download_timeout,
            episodes: pending,
            settings: self.settings.clone(),
        };
        let episodes = job.episodes.len();
        let (child, stdin, stdout) = spawn_worker(&self.worker, &job).await?;
        let pid = child.id();
        if let Some(pid) = pid {
            if let Err(e) = self.markers.set_worker_pid(&task.id, pid) {
                tracing::warn!(task_id = %task.id, "record worker pid: {}", e);
            }
        }

        let stop = {
            let mut registry = self.registry.lock().unwrap();
            let handle = registry
                .entry(task.id.clone())
                .or_insert_with(WorkerHandle::reserved);
            handle.pid = pid;
            handle.stop.clone()
        };
        tracing::info!(task_id = %task.id, pid = ?pid, episodes, "worker launched");

        let ctx = MonitorCtx {
            task,
            detail,
            base: self.base.clone(),
            db: self.db.clone(),
            registry: Arc::clone(&self.registry),
            markers: self.markers.clone(),
            stop_grace: self.stop_grace,
        };
        tokio::spawn(monitor(ctx, child, stdin, stdout, stop));
        Ok(LaunchOutcome::Launched { pid, episodes })
    }

    fn unreserve(&self, task_id: &str) {
        self.registry.lock().unwrap().remove(task_id);
    }

    /// Stops a running task: marker removed, `terminate` sent, kill after the
    /// grace window. Returns false when the task was not running.
    pub fn stop_task(&self, task_id: &str) -> bool {
        let handle = self.registry.lock().unwrap().get(task_id).cloned();
        let Some(handle) = handle else {
            return false;
        };
        if let Err(e) = self.markers.release(task_id) {
            tracing::warn!(task_id, "release running marker: {}", e);
        }
        handle.stop.cancel();
        tracing::info!(task_id, "stop requested");
        true
    }

    /// Stops every worker and waits (bounded) for the registry to drain.
    pub async fn shutdown(&self, wait: Duration) {
        for id in self.running_task_ids() {
            self.stop_task(&id);
        }
        let deadline = tokio::time::Instant::now() + wait;
        while !self.registry.lock().unwrap().is_empty() {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!("workers still running at shutdown: {:?}", self.running_task_ids());
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Launches every due task. Over-capacity tasks are skipped this cycle.
    pub async fn run_due_tasks(&self) -> Result<Vec<(String, LaunchOutcome)>> {
        self.reconcile_markers();
        let due = self.db.due_tasks(now_millis()).await?;
        let mut outcomes = Vec::with_capacity(due.len());
        for task in due {
            match self.execute_task(&task.id).await {
                Ok(outcome) => {
                    if outcome == LaunchOutcome::AtCapacity {
                        tracing::debug!(task_id = %task.id, "at capacity, skipped this cycle");
                    }
                    outcomes.push((task.id, outcome));
                }
                Err(e) => tracing::error!(task_id = %task.id, "launch failed: {}", e),
            }
        }
        Ok(outcomes)
    }

    /// Removes stale markers, and markers this process owns without a
    /// matching registry entry.
    pub fn reconcile_markers(&self) {
        match self.markers.reclaim_stale() {
            Ok(ids) => {
                for id in ids {
                    tracing::info!(task_id = %id, "removed stale running marker");
                }
            }
            Err(e) => tracing::warn!("scan running markers: {}", e),
        }
        let Ok(entries) = std::fs::read_dir(self.markers.dir()) else {
            return;
        };
        let me = std::process::id();
        for entry in entries.flatten() {
            let Some(id) = entry
                .path()
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.strip_prefix("task-"))
                .map(str::to_string)
            else {
                continue;
            };
            let Some(record) = self.markers.read(&id) else {
                continue;
            };
            if record.owner_pid == me && !self.is_running(&record.task_id) {
                tracing::info!(task_id = %record.task_id, "removing orphaned running marker");
                let _ = self.markers.release(&record.task_id);
            }
        }
    }
}
