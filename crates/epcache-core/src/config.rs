use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Download tuning (optional `[download]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum in-flight segment fetches per manifest.
    pub segment_concurrency: usize,
    /// Maximum in-flight whole-file fetches (kept low to avoid remote throttling).
    pub file_concurrency: usize,
    /// Retries after the first failed attempt.
    pub retries: u32,
    /// Fixed delay between attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Per-segment transfer timeout in seconds.
    pub segment_timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            segment_concurrency: 5,
            file_concurrency: 2,
            retries: 3,
            retry_delay_ms: 2000,
            segment_timeout_secs: 300,
        }
    }
}

/// Global configuration loaded from `~/.config/epcache/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpcacheConfig {
    /// Base directory under which task destinations are resolved.
    pub download_path: PathBuf,
    /// Overrides the XDG state dir (database, markers, control socket, log).
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    /// Maximum number of task workers running at once.
    pub max_concurrent_tasks: usize,
    /// Seconds between scheduler ticks.
    pub tick_interval_secs: u64,
    /// Content detail endpoint; `{source}` and `{id}` are substituted.
    pub detail_url: String,
    /// External muxing tool used by the merge pipeline.
    pub ffmpeg_path: String,
    /// User-Agent sent with every request.
    pub user_agent: String,
    /// Seconds to wait after `terminate` before killing a worker.
    pub stop_grace_secs: u64,
    /// Seconds a terminating worker may spend on cleanup before it exits on its own.
    pub terminate_grace_secs: u64,
    /// Minimum seconds between progress notifications of one transfer.
    pub progress_interval_secs: u64,
    /// Merge an episode even when some segments failed.
    #[serde(default)]
    pub allow_partial_merge: bool,
    /// Optional download tuning; built-in defaults are used when missing.
    #[serde(default)]
    pub download: Option<DownloadConfig>,
}

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

impl Default for EpcacheConfig {
    fn default() -> Self {
        Self {
            download_path: PathBuf::from("downloads"),
            state_dir: None,
            max_concurrent_tasks: 2,
            tick_interval_secs: 300,
            detail_url: "http://127.0.0.1:3000/api/detail?source={source}&id={id}".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            stop_grace_secs: 2,
            terminate_grace_secs: 10,
            progress_interval_secs: 60,
            allow_partial_merge: false,
            download: None,
        }
    }
}

impl EpcacheConfig {
    pub fn download(&self) -> DownloadConfig {
        self.download.clone().unwrap_or_default()
    }

    /// State directory: the configured override, else `~/.local/state/epcache`.
    pub fn state_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.state_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("epcache")?;
        Ok(xdg_dirs.get_state_home())
    }

    /// `download_path` anchored at the current directory when relative.
    pub fn download_base(&self) -> PathBuf {
        absolute_path(&self.download_path)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Apply `EPCACHE_DOWNLOAD_PATH` if set.
    pub fn apply_env(&mut self) {
        if let Some(path) = std::env::var_os("EPCACHE_DOWNLOAD_PATH") {
            if !path.is_empty() {
                self.download_path = PathBuf::from(path);
            }
        }
    }
}

/// Absolute form of `path`; unchanged if the current directory is unavailable.
pub fn absolute_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("epcache")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<EpcacheConfig> {
    let path = config_path()?;
    let mut cfg = if !path.exists() {
        let default_cfg = EpcacheConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        default_cfg
    } else {
        let data = fs::read_to_string(&path)?;
        toml::from_str(&data)?
    };
    cfg.apply_env();
    cfg.download_path = cfg.download_base();
    Ok(cfg)
}
