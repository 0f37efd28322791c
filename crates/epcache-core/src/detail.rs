//! Content detail provider client.
//!
//! The provider returns the episode URL list and descriptive metadata for a
//! `(source, id)` pair. The supervisor fetches it before every launch.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::config::EpcacheConfig;
use crate::control::CancellationToken;
use crate::downloader::{fetch_text, FetchOptions};
use crate::protocol::EpisodeSource;
use crate::store::Task;

fn string_or_number<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        S(String),
        N(serde_json::Number),
        Null,
    }
    Ok(match Raw::deserialize(de)? {
        Raw::S(s) => s,
        Raw::N(n) => n.to_string(),
        Raw::Null => String::new(),
    })
}

/// Provider response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ContentDetail {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub poster: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub year: String,
    #[serde(default, rename = "desc")]
    pub description: Option<String>,
    #[serde(default, rename = "class")]
    pub category: Option<String>,
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub episodes: Vec<String>,
    #[serde(default)]
    pub episode_numbers: Option<Vec<u32>>,
}

impl ContentDetail {
    /// `(episode number, url)` pairs. Episode `i` is `episode_numbers[i]` when
    /// present and non-zero, else `i + 1`.
    pub fn episode_list(&self) -> Vec<EpisodeSource> {
        let len = match &self.episode_numbers {
            Some(nums) => nums.len().min(self.episodes.len()),
            None => self.episodes.len(),
        };
        (0..len)
            .map(|i| {
                let number = self
                    .episode_numbers
                    .as_ref()
                    .and_then(|n| n.get(i).copied())
                    .filter(|n| *n > 0)
                    .unwrap_or(i as u32 + 1);
                EpisodeSource {
                    episode_number: number,
                    url: self.episodes[i].clone(),
                }
            })
            .collect()
    }

    /// Episodes inside the task's range that are not cached yet, in list order.
    pub fn pending_episodes(&self, task: &Task, cached: &BTreeSet<u32>) -> Vec<EpisodeSource> {
        self.episode_list()
            .into_iter()
            .filter(|e| task.in_range(e.episode_number) && !cached.contains(&e.episode_number))
            .collect()
    }
}

/// HTTP client for the detail provider.
#[derive(Debug, Clone)]
pub struct DetailClient {
    url_template: String,
    opts: FetchOptions,
}

impl DetailClient {
    pub fn new(url_template: impl Into<String>, opts: FetchOptions) -> Self {
        Self {
            url_template: url_template.into(),
            opts,
        }
    }

    pub fn from_config(cfg: &EpcacheConfig) -> Self {
        let opts = FetchOptions {
            user_agent: cfg.user_agent.clone(),
            timeout: Duration::from_secs(30),
            ..FetchOptions::default()
        };
        Self::new(cfg.detail_url.clone(), opts)
    }

    /// Fills `{source}` and `{id}` (URL-encoded) into the template.
    pub fn detail_url(&self, source: &str, id: &str) -> String {
        let enc = |s: &str| url::form_urlencoded::byte_serialize(s.as_bytes()).collect::<String>();
        self.url_template
            .replace("{source}", &enc(source))
            .replace("{id}", &enc(id))
    }

    pub async fn fetch(&self, source: &str, id: &str) -> Result<ContentDetail> {
        let url = self.detail_url(source, id);
        let opts = self.opts.clone();
        let target = url.clone();
        let body = tokio::task::spawn_blocking(move || fetch_text(&target, &opts, &CancellationToken::new()))
            .await
            .context("detail fetch task")?
            .with_context(|| format!("GET {}", url))?;
        let detail: ContentDetail =
            serde_json::from_str(&body).with_context(|| format!("parse content detail from {}", url))?;
        Ok(detail)
    }
}
