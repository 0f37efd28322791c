//! `epcache import <json>` – load legacy task or cached-video arrays.

use anyhow::{Context, Result};
use std::path::Path;

use crate::cli::CliContext;

pub async fn run_import(ctx: &CliContext, path: &Path, cached: bool) -> Result<()> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    if cached {
        let n = ctx.db.import_cached_json(&json).await?;
        println!("Imported {} cached episode(s) from {}", n, path.display());
    } else {
        let n = ctx.db.import_tasks_json(&json).await?;
        println!("Imported {} task(s) from {}", n, path.display());
    }
    Ok(())
}
