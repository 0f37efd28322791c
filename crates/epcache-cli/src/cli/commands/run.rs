//! `epcache run <id>` – launch a task now.
//!
//! Goes through the running supervisor when its control socket answers;
//! otherwise supervises the worker in the foreground until it exits.

use anyhow::Result;
use epcache_core::control::{default_control_socket_path, ControlCommand};
use epcache_core::supervisor::{LaunchOutcome, Supervisor, WorkerCommand};
use std::time::Duration;

use crate::cli::control_socket::{self, describe_outcome};
use crate::cli::CliContext;

pub async fn run_start(ctx: &CliContext, id: &str) -> Result<()> {
    let socket = default_control_socket_path(&ctx.state_dir);
    match control_socket::send_command(&socket, &ControlCommand::Run(id.to_string())).await {
        Ok(Some(reply)) => {
            println!("{}", reply);
            return Ok(());
        }
        Ok(None) => {}
        Err(e) => tracing::debug!("control socket: {}", e),
    }

    let supervisor = Supervisor::new(ctx.db.clone(), &ctx.cfg, &ctx.state_dir, WorkerCommand::current_exe()?);
    supervisor.reconcile_markers();
    let outcome = supervisor.execute_task(id).await?;
    println!("{}", describe_outcome(id, &outcome));
    if !matches!(outcome, LaunchOutcome::Launched { .. }) {
        return Ok(());
    }

    let mut stopping = false;
    while supervisor.is_running(id) {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !stopping => {
                println!("stopping {} ...", id);
                supervisor.stop_task(id);
                stopping = true;
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
        }
    }

    if let Some(task) = ctx.db.get_task(id).await? {
        println!(
            "{}: next episode {}, {}",
            id,
            task.start_episode,
            if task.enabled { "enabled" } else { "disabled" }
        );
    }
    Ok(())
}
