//! Import of legacy flat JSON files (task array and cached-video array).

use anyhow::{Context, Result};
use serde::Deserialize;

use super::db::{now_millis, TaskDb};
use super::tasks::write_task;
use super::types::{CachedEpisode, Task};

/// Cached-video record as written by the JSON-file store.
#[derive(Debug, Deserialize)]
struct LegacyCachedVideo {
    id: String,
    episode_number: u32,
    episode_path: String,
    title: String,
    #[serde(default)]
    poster: String,
    #[serde(default)]
    year: String,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    type_name: Option<String>,
    #[serde(default)]
    org_source: String,
    #[serde(default)]
    org_source_id: String,
    #[serde(default)]
    download_time: i64,
}

impl From<LegacyCachedVideo> for CachedEpisode {
    fn from(v: LegacyCachedVideo) -> Self {
        CachedEpisode {
            unique_key: CachedEpisode::unique_key_for(&v.id, v.episode_number),
            task_id: v.id,
            episode_number: v.episode_number,
            episode_path: v.episode_path,
            title: v.title,
            poster: v.poster,
            year: v.year,
            description: v.desc.unwrap_or_default(),
            category: v.class.unwrap_or_default(),
            type_name: v.type_name.unwrap_or_default(),
            total_episodes: 0,
            origin_source: v.org_source,
            origin_id: v.org_source_id,
            downloaded_at: v.download_time,
        }
    }
}

impl TaskDb {
    /// Upserts every task of a JSON task array in one transaction. Existing
    /// timestamps are preserved; missing ones are stamped now.
    pub async fn import_tasks_json(&self, json: &str) -> Result<usize> {
        let tasks: Vec<Task> = serde_json::from_str(json).context("parse task array")?;
        let now = now_millis();
        let mut tx = self.pool.begin().await?;
        for mut task in tasks.iter().cloned() {
            task.normalize();
            if task.created_at == 0 {
                task.created_at = now;
            }
            if task.updated_at == 0 {
                task.updated_at = now;
            }
            write_task(&mut *tx, &task)
                .await
                .with_context(|| format!("import task {}", task.id))?;
        }
        tx.commit().await?;
        Ok(tasks.len())
    }

    /// Upserts every record of a JSON cached-video array.
    pub async fn import_cached_json(&self, json: &str) -> Result<usize> {
        let videos: Vec<LegacyCachedVideo> = serde_json::from_str(json).context("parse cached video array")?;
        let count = videos.len();
        for v in videos {
            self.save_cached(&CachedEpisode::from(v)).await?;
        }
        Ok(count)
    }
}
