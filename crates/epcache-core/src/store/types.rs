//! Records stored in the task database.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

fn default_start() -> u32 {
    1
}

fn default_total() -> u32 {
    9999
}

fn default_timeout() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

/// A scheduled, resumable multi-episode download.
///
/// Serialized in camelCase so legacy task files import unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub poster: String,
    /// Content source identifier passed to the detail provider.
    pub source: String,
    /// Content id within the source.
    pub source_id: String,
    /// Resume pointer: the lowest episode not yet downloaded.
    #[serde(default = "default_start")]
    pub start_episode: u32,
    #[serde(default = "default_total")]
    pub total_episodes: u32,
    /// Absolute, or relative to the base download path. Empty means the base.
    #[serde(default)]
    pub download_path: String,
    pub cron_expression: String,
    /// Seconds allowed per episode download and per merge attempt.
    #[serde(default = "default_timeout")]
    pub download_timeout: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    /// Epoch millis of the next eligible run; absent means due now.
    #[serde(default)]
    pub next_run: Option<i64>,
}

impl Task {
    pub fn new(id: String, title: String, source: String, source_id: String, cron_expression: String) -> Self {
        Self {
            id,
            title,
            poster: String::new(),
            source,
            source_id,
            start_episode: default_start(),
            total_episodes: default_total(),
            download_path: String::new(),
            cron_expression,
            download_timeout: default_timeout(),
            enabled: true,
            created_at: 0,
            updated_at: 0,
            next_run: None,
        }
    }

    /// Enforces the range invariant: a task whose resume pointer is past its
    /// last episode cannot stay enabled.
    pub fn normalize(&mut self) {
        if self.start_episode == 0 {
            self.start_episode = 1;
        }
        if self.download_timeout == 0 {
            self.download_timeout = default_timeout();
        }
        if self.is_finished() {
            self.enabled = false;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.start_episode > self.total_episodes
    }

    pub fn in_range(&self, episode_number: u32) -> bool {
        episode_number >= self.start_episode && episode_number <= self.total_episodes
    }

    /// Enabled and `next_run` absent or not in the future.
    pub fn is_due(&self, now_ms: i64) -> bool {
        self.enabled && self.next_run.unwrap_or(0) <= now_ms
    }
}

/// A downloaded episode recorded in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEpisode {
    /// `"{task id}_{episode number}"`.
    pub unique_key: String,
    pub task_id: String,
    pub episode_number: u32,
    /// Relative to the base download path.
    pub episode_path: String,
    pub title: String,
    #[serde(default)]
    pub poster: String,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub type_name: String,
    /// Episode count reported by the detail provider.
    #[serde(default)]
    pub total_episodes: u32,
    #[serde(default)]
    pub origin_source: String,
    #[serde(default)]
    pub origin_id: String,
    pub downloaded_at: i64,
}

impl CachedEpisode {
    pub fn unique_key_for(task_id: &str, episode_number: u32) -> String {
        format!("{}_{}", task_id, episode_number)
    }
}

/// Lowest episode `>= start` that is not in `cached`, capped at `total + 1`.
pub fn next_resume_pointer(start: u32, total: u32, cached: &BTreeSet<u32>) -> u32 {
    let mut p = start.max(1);
    while p <= total && cached.contains(&p) {
        p += 1;
    }
    p.min(total.saturating_add(1))
}
