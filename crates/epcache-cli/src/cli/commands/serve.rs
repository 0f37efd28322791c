//! `epcache serve` – long-lived supervisor: scheduler tick, workers and the
//! control socket.

use anyhow::Result;
use epcache_core::control::{default_control_socket_path, CancellationToken};
use epcache_core::scheduler::run_tick_loop;
use epcache_core::supervisor::{Supervisor, WorkerCommand};
use std::sync::Arc;
use std::time::Duration;

use crate::cli::control_socket;
use crate::cli::CliContext;

pub async fn run_serve(ctx: &CliContext) -> Result<()> {
    let supervisor = Arc::new(Supervisor::new(
        ctx.db.clone(),
        &ctx.cfg,
        &ctx.state_dir,
        WorkerCommand::current_exe()?,
    ));
    supervisor.reconcile_markers();

    let socket_path = default_control_socket_path(&ctx.state_dir);
    let listener = match control_socket::spawn_control_listener(Arc::clone(&supervisor), &socket_path) {
        Ok(handle) => {
            tracing::debug!(path = %socket_path.display(), "control socket listening");
            Some(handle)
        }
        Err(e) => {
            tracing::warn!(path = %socket_path.display(), "control socket bind: {}", e);
            None
        }
    };

    let shutdown = CancellationToken::new();
    let ticker = tokio::spawn(run_tick_loop(
        Arc::clone(&supervisor),
        ctx.cfg.tick_interval(),
        shutdown.clone(),
    ));
    println!(
        "epcache supervisor running: downloads in {}, state in {}",
        ctx.cfg.download_path.display(),
        ctx.state_dir.display()
    );

    wait_for_shutdown_signal().await;
    tracing::info!("shutting down");
    shutdown.cancel();
    let _ = ticker.await;
    supervisor
        .shutdown(ctx.cfg.stop_grace() + Duration::from_secs(3))
        .await;
    if let Some(handle) = listener {
        handle.abort();
    }
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("SIGTERM handler unavailable: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
