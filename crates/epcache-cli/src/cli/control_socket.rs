//! Control socket: server (during `epcache serve`) and client (for `epcache
//! run` / `epcache stop`).
//! Protocol: one line per command, `stop <id>` or `run <id>`; the server
//! answers each with one status line.

use anyhow::Result;
use epcache_core::control::ControlCommand;
use epcache_core::supervisor::{LaunchOutcome, Supervisor};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Binds `path` and serves control commands against `supervisor`. Malformed
/// lines get an error reply and are otherwise ignored.
pub fn spawn_control_listener(
    supervisor: Arc<Supervisor>,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let supervisor = Arc::clone(&supervisor);
                    tokio::spawn(serve_connection(supervisor, stream));
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn serve_connection(supervisor: Arc<Supervisor>, stream: UnixStream) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        let reply = match ControlCommand::parse(&line) {
            Some(cmd) => {
                tracing::info!("control: {}", cmd.to_line());
                handle_command(&supervisor, cmd).await
            }
            None => format!("error: unknown command {:?}", line.trim()),
        };
        if write.write_all(format!("{}\n", reply).as_bytes()).await.is_err() {
            break;
        }
    }
}

async fn handle_command(supervisor: &Supervisor, cmd: ControlCommand) -> String {
    match cmd {
        ControlCommand::Stop(id) => {
            if supervisor.stop_task(&id) {
                format!("stopping {}", id)
            } else {
                format!("{} is not running", id)
            }
        }
        ControlCommand::Run(id) => match supervisor.execute_task(&id).await {
            Ok(outcome) => describe_outcome(&id, &outcome),
            Err(e) => format!("error: {}", e),
        },
    }
}

/// One-line description of a launch outcome, shared with the foreground runner.
pub fn describe_outcome(id: &str, outcome: &LaunchOutcome) -> String {
    match outcome {
        LaunchOutcome::Launched { pid, episodes } => match pid {
            Some(pid) => format!("launched {} (pid {}, {} episode(s))", id, pid, episodes),
            None => format!("launched {} ({} episode(s))", id, episodes),
        },
        LaunchOutcome::NotFound => format!("no task {}", id),
        LaunchOutcome::AlreadyRunning => format!("{} is already running", id),
        LaunchOutcome::Finished => format!("{} has no episodes left in range; disabled", id),
        LaunchOutcome::AtCapacity => format!("{} skipped: too many tasks running", id),
        LaunchOutcome::MarkerHeld => format!("{} is running in another process", id),
        LaunchOutcome::NothingPending { next_run } => {
            format!("{}: nothing to download; next run {}", id, super::commands::format_millis(Some(*next_run)))
        }
    }
}

/// Sends one command and returns the server's reply. `Ok(None)` when no
/// supervisor is listening.
pub async fn send_command(socket_path: &Path, cmd: &ControlCommand) -> Result<Option<String>> {
    if !socket_path.exists() {
        return Ok(None);
    }
    let mut stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let msg = format!("{}\n", cmd.to_line());
    stream.write_all(msg.as_bytes()).await?;
    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply).await?;
    Ok(Some(reply.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_socket_means_no_supervisor() {
        let tmp = tempfile::tempdir().unwrap();
        let reply = send_command(&tmp.path().join("control.sock"), &ControlCommand::Stop("1".into()))
            .await
            .unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn server_answers_stop_and_run() {
        use epcache_core::config::EpcacheConfig;
        use epcache_core::store::TaskDb;
        use epcache_core::supervisor::WorkerCommand;

        let tmp = tempfile::tempdir().unwrap();
        let db = TaskDb::open_memory().await.unwrap();
        let supervisor = Arc::new(Supervisor::new(
            db,
            &EpcacheConfig::default(),
            tmp.path(),
            WorkerCommand::new("true", vec![]),
        ));
        let socket = tmp.path().join("control.sock");
        let _server = spawn_control_listener(supervisor, &socket).unwrap();

        let reply = send_command(&socket, &ControlCommand::Stop("1".into())).await.unwrap();
        assert_eq!(reply.as_deref(), Some("1 is not running"));
        let reply = send_command(&socket, &ControlCommand::Run("nope".into())).await.unwrap();
        assert_eq!(reply.as_deref(), Some("no task nope"));
    }

    #[test]
    fn outcomes_read_naturally() {
        assert_eq!(
            describe_outcome("7", &LaunchOutcome::Launched { pid: Some(99), episodes: 3 }),
            "launched 7 (pid 99, 3 episode(s))"
        );
        assert_eq!(describe_outcome("7", &LaunchOutcome::NotFound), "no task 7");
    }
}
