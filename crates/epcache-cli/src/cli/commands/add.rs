//! `epcache add` – create a scheduled download task.

use anyhow::{bail, Result};
use clap::Args;
use epcache_core::scheduler::Schedule;
use epcache_core::store::{now_millis, Task};

use crate::cli::CliContext;

#[derive(Debug, Clone, Args)]
pub struct AddArgs {
    /// Display title; also used for episode file names.
    #[arg(long)]
    pub title: String,
    /// Content source identifier at the detail provider.
    #[arg(long)]
    pub source: String,
    /// Content id within the source.
    #[arg(long = "id", value_name = "ID")]
    pub source_id: String,
    /// Five-field cron expression.
    #[arg(long, default_value = "0 2 * * *")]
    pub cron: String,
    /// First episode to download.
    #[arg(long, default_value_t = 1)]
    pub start: u32,
    /// Last episode to download.
    #[arg(long, default_value_t = 9999)]
    pub total: u32,
    /// Destination, absolute or relative to the download path.
    #[arg(long, default_value = "")]
    pub path: String,
    /// Seconds allowed per episode download and per merge attempt.
    #[arg(long, default_value_t = 3600)]
    pub timeout: u64,
    /// Poster URL shown in the cache listing.
    #[arg(long, default_value = "")]
    pub poster: String,
    /// Create the task disabled.
    #[arg(long)]
    pub disabled: bool,
}

impl AddArgs {
    pub fn into_task(self, id: String) -> Task {
        let mut task = Task::new(id, self.title, self.source, self.source_id, self.cron);
        task.poster = self.poster;
        task.start_episode = self.start;
        task.total_episodes = self.total;
        task.download_path = self.path;
        task.download_timeout = self.timeout;
        task.enabled = !self.disabled;
        task
    }
}

pub async fn run_add(ctx: &CliContext, args: AddArgs) -> Result<()> {
    if args.title.trim().is_empty() {
        bail!("title must not be empty");
    }
    if Schedule::parse(&args.cron).is_none() {
        bail!("invalid cron expression {:?} (expected five fields; minute and hour accept *, N or */N)", args.cron);
    }
    let id = now_millis().to_string();
    let task = ctx.db.save_task(&args.into_task(id)).await?;
    println!("Added task {} ({})", task.id, task.title);
    if !task.enabled {
        println!("Task is disabled; enable it with `epcache enable {}`", task.id);
    }
    Ok(())
}
