//! `epcache enable|disable <id>`.

use anyhow::{bail, Result};

use crate::cli::CliContext;

pub async fn run_enable(ctx: &CliContext, id: &str, enabled: bool) -> Result<()> {
    let Some(task) = ctx.db.set_enabled(id, enabled).await? else {
        bail!("no task {}", id);
    };
    if enabled && !task.enabled {
        println!(
            "Task {} stays disabled: episode {} is past the last episode ({})",
            id, task.start_episode, task.total_episodes
        );
    } else {
        println!("Task {} {}", id, if task.enabled { "enabled" } else { "disabled" });
    }
    Ok(())
}
