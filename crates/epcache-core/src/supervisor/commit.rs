//! Turning a worker's `download_complete` into a cache record.

use std::path::Path;

use crate::detail::ContentDetail;
use crate::paths::relative_to_base;
use crate::protocol::EpisodeComplete;
use crate::store::{now_millis, CachedEpisode, Task};

/// Builds the cache record for a completed episode. The stored path is
/// relative to `base`.
pub fn cached_record(task: &Task, detail: &ContentDetail, base: &Path, done: &EpisodeComplete) -> CachedEpisode {
    let relative = relative_to_base(base, &done.file_path);
    CachedEpisode {
        unique_key: CachedEpisode::unique_key_for(&task.id, done.episode_number),
        task_id: task.id.clone(),
        episode_number: done.episode_number,
        episode_path: relative.to_string_lossy().into_owned(),
        title: task.title.clone(),
        poster: if detail.poster.is_empty() {
            task.poster.clone()
        } else {
            detail.poster.clone()
        },
        year: detail.year.clone(),
        description: detail.description.clone().unwrap_or_default(),
        category: detail.category.clone().unwrap_or_default(),
        type_name: detail.type_name.clone().unwrap_or_default(),
        total_episodes: detail.episodes.len() as u32,
        origin_source: if detail.source.is_empty() {
            task.source.clone()
        } else {
            detail.source.clone()
        },
        origin_id: if detail.id.is_empty() {
            task.source_id.clone()
        } else {
            detail.id.clone()
        },
        downloaded_at: now_millis(),
    }
}
