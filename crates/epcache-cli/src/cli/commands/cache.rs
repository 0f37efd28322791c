//! `epcache cache` and `epcache uncache` – inspect and prune cached episodes.

use anyhow::{bail, Context, Result};
use epcache_core::manifest::LOCAL_MANIFEST;
use std::path::Path;

use super::format_millis;
use crate::cli::CliContext;

pub async fn run_cache(ctx: &CliContext, task: Option<&str>, json: bool) -> Result<()> {
    let cached = ctx.db.list_cached(task).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&cached)?);
        return Ok(());
    }
    if cached.is_empty() {
        println!("No cached episodes.");
        return Ok(());
    }
    println!("{:<22} {:<4} {:<16} {:<24} {}", "KEY", "EP", "DOWNLOADED", "TITLE", "PATH");
    for c in cached {
        println!(
            "{:<22} {:<4} {:<16} {:<24} {}",
            c.unique_key,
            c.episode_number,
            format_millis(Some(c.downloaded_at)),
            c.title,
            c.episode_path
        );
    }
    Ok(())
}

pub async fn run_uncache(ctx: &CliContext, key: &str, delete_files: bool) -> Result<()> {
    let Some(record) = ctx.db.delete_cached(key).await? else {
        bail!("no cached episode {}", key);
    };
    println!("Removed cache record {}", record.unique_key);
    if delete_files {
        let file = ctx.cfg.download_path.join(&record.episode_path);
        remove_episode_files(&file)?;
        println!("Deleted {}", file.display());
    }
    Ok(())
}

/// Removes an episode file. An unmerged playlist takes its segment directory with it.
fn remove_episode_files(file: &Path) -> Result<()> {
    let is_playlist = file.file_name().and_then(|n| n.to_str()) == Some(LOCAL_MANIFEST);
    match (is_playlist, file.parent()) {
        (true, Some(dir)) if dir.exists() => {
            std::fs::remove_dir_all(dir).with_context(|| format!("remove {}", dir.display()))
        }
        _ => match std::fs::remove_file(file) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(e).with_context(|| format!("remove {}", file.display()))
            }
            _ => Ok(()),
        },
    }
}
