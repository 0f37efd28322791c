//! Task control: cancellation tokens, control-line parsing and the socket path.
//!
//! The supervisor stops a worker by writing `terminate` on its stdin; the
//! worker turns that into a cancelled token that every loop and fetch checks.
//! The operator reaches the supervisor through the control socket with
//! `stop <id>` / `run <id>` lines.

use std::path::{Path, PathBuf};

pub use tokio_util::sync::CancellationToken;

/// Control line asking a worker to stop gracefully.
pub const TERMINATE_COMMAND: &str = "terminate";

/// A command accepted on the supervisor control socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Stop a running task (marker removed, worker terminated).
    Stop(String),
    /// Launch a task now, outside its schedule.
    Run(String),
}

impl ControlCommand {
    /// Parses one control-socket line (`stop <id>` or `run <id>`).
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts.next()?;
        let id = parts.next()?.to_string();
        if parts.next().is_some() {
            return None;
        }
        match verb {
            "stop" => Some(ControlCommand::Stop(id)),
            "run" => Some(ControlCommand::Run(id)),
            _ => None,
        }
    }

    pub fn to_line(&self) -> String {
        match self {
            ControlCommand::Stop(id) => format!("stop {}", id),
            ControlCommand::Run(id) => format!("run {}", id),
        }
    }
}

/// True when a worker stdin line asks for termination.
pub fn is_terminate_line(line: &str) -> bool {
    line.trim() == TERMINATE_COMMAND
}

/// Path of the control socket inside the state dir.
pub fn default_control_socket_path(state_dir: &Path) -> PathBuf {
    state_dir.join("control.sock")
}
