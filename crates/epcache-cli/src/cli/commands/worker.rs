//! `epcache worker` – hidden entry point the supervisor spawns per task.

use anyhow::Result;

pub async fn run_worker() -> Result<i32> {
    epcache_core::worker::run_stdio().await
}
