//! `epcache remove <id>` – delete a task. A running worker is stopped first.

use anyhow::{bail, Result};
use epcache_core::control::{default_control_socket_path, ControlCommand};

use crate::cli::control_socket;
use crate::cli::CliContext;

pub async fn run_remove(ctx: &CliContext, id: &str) -> Result<()> {
    let socket = default_control_socket_path(&ctx.state_dir);
    if let Ok(Some(reply)) = control_socket::send_command(&socket, &ControlCommand::Stop(id.to_string())).await {
        tracing::debug!("stop before remove: {}", reply);
    }
    if !ctx.db.delete_task(id).await? {
        bail!("no task {}", id);
    }
    println!("Removed task {}", id);
    Ok(())
}
