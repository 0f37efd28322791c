//! `epcache next-run <expr>` – evaluate a cron expression.

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDateTime};
use epcache_core::scheduler::{next_run_after, Schedule};

pub fn run_next_run(expr: &str, from: Option<&str>) -> Result<()> {
    let reference = match from {
        Some(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
            .with_context(|| format!("parse --from {:?} (expected YYYY-MM-DDTHH:MM)", s))?,
        None => Local::now().naive_local(),
    };
    if Schedule::parse(expr).is_none() {
        bail!("invalid cron expression {:?}", expr);
    }
    println!("{}", next_run_after(expr, reference).format("%Y-%m-%dT%H:%M"));
    Ok(())
}
