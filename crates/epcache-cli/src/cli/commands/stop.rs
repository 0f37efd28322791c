//! `epcache stop <id>` – ask the running supervisor to stop a task.

use anyhow::{bail, Result};
use epcache_core::control::{default_control_socket_path, ControlCommand};

use crate::cli::control_socket;
use crate::cli::CliContext;

pub async fn run_stop(ctx: &CliContext, id: &str) -> Result<()> {
    let socket = default_control_socket_path(&ctx.state_dir);
    match control_socket::send_command(&socket, &ControlCommand::Stop(id.to_string())).await? {
        Some(reply) => {
            println!("{}", reply);
            Ok(())
        }
        None => bail!("no supervisor is running (socket {} unavailable)", socket.display()),
    }
}
