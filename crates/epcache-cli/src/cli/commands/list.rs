//! `epcache list` – show all tasks.

use anyhow::Result;
use epcache_core::supervisor::MarkerDir;

use super::format_millis;
use crate::cli::CliContext;

pub async fn run_list(ctx: &CliContext, json: bool) -> Result<()> {
    let tasks = ctx.db.list_tasks().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }
    if tasks.is_empty() {
        println!("No tasks in database.");
        return Ok(());
    }
    let markers = MarkerDir::new(&ctx.state_dir);
    println!(
        "{:<15} {:<9} {:<11} {:<16} {:<12} {}",
        "ID", "STATE", "EPISODES", "NEXT RUN", "CRON", "TITLE"
    );
    for t in tasks {
        let state = if markers.is_held(&t.id) {
            "running"
        } else if t.enabled {
            "enabled"
        } else {
            "disabled"
        };
        println!(
            "{:<15} {:<9} {:<11} {:<16} {:<12} {}",
            t.id,
            state,
            format!("{}-{}", t.start_episode, t.total_episodes),
            format_millis(t.next_run),
            t.cron_expression,
            t.title
        );
    }
    Ok(())
}
