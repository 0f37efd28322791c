//! Supervisor/worker wire format.
//!
//! Worker stdout carries one JSON object per line, `{"type": ..., "data": ...}`.
//! Worker stdin carries the job descriptor on its first line and control
//! commands afterwards.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::EpcacheConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeComplete {
    pub episode_number: u32,
    pub file_path: PathBuf,
    pub task_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeFailed {
    pub episode_number: u32,
    pub task_title: String,
}

/// One line of worker output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WorkerMessage {
    Info(String),
    Warn(String),
    Error(String),
    Debug(String),
    DownloadComplete(EpisodeComplete),
    DownloadError(EpisodeFailed),
}

impl WorkerMessage {
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

/// One episode handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeSource {
    pub episode_number: u32,
    pub url: String,
}

/// Download tuning passed from the supervisor's config to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSettings {
    pub user_agent: String,
    pub ffmpeg_path: String,
    pub segment_concurrency: usize,
    /// Cap on whole-file fetches in flight (direct episodes, raw merge fallback).
    pub file_concurrency: usize,
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub segment_timeout_secs: u64,
    pub progress_interval_secs: u64,
    pub terminate_grace_secs: u64,
    pub allow_partial_merge: bool,
}

impl WorkerSettings {
    pub fn from_config(cfg: &EpcacheConfig) -> Self {
        let dl = cfg.download();
        Self {
            user_agent: cfg.user_agent.clone(),
            ffmpeg_path: cfg.ffmpeg_path.clone(),
            segment_concurrency: dl.segment_concurrency.max(1),
            file_concurrency: dl.file_concurrency.max(1),
            retries: dl.retries,
            retry_delay_ms: dl.retry_delay_ms,
            segment_timeout_secs: dl.segment_timeout_secs,
            progress_interval_secs: cfg.progress_interval_secs,
            terminate_grace_secs: cfg.terminate_grace_secs,
            allow_partial_merge: cfg.allow_partial_merge,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn segment_timeout(&self) -> Duration {
        Duration::from_secs(self.segment_timeout_secs.max(1))
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&EpcacheConfig::default())
    }
}

/// Job descriptor: first line on worker stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerJob {
    pub task_id: String,
    pub task_title: String,
    pub download_dir: PathBuf,
    /// Per-task budget for whole-file downloads and each merge attempt.
    pub timeout_secs: u64,
    pub episodes: Vec<EpisodeSource>,
    pub settings: WorkerSettings,
}

impl WorkerJob {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}
