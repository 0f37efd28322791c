//! CLI command handlers. Each command is in its own file.

mod add;
mod cache;
mod docs;
mod enable;
mod import;
mod list;
mod next_run;
mod remove;
mod run;
mod serve;
mod stop;
mod worker;

pub use add::{run_add, AddArgs};
pub use cache::{run_cache, run_uncache};
pub use docs::{run_completions, run_man};
pub use enable::run_enable;
pub use import::run_import;
pub use list::run_list;
pub use next_run::run_next_run;
pub use remove::run_remove;
pub use run::run_start;
pub use serve::run_serve;
pub use stop::run_stop;
pub use worker::run_worker;

use chrono::{Local, TimeZone};

/// Local time for an epoch-millis timestamp, `-` when absent.
pub fn format_millis(ms: Option<i64>) -> String {
    match ms.and_then(|ms| Local.timestamp_millis_opt(ms).single()) {
        Some(t) => t.format("%Y-%m-%d %H:%M").to_string(),
        None => "-".to_string(),
    }
}
