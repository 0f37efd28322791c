//! Recurring schedule: cron evaluation and the supervisor tick loop.

mod cron;
mod tick;

pub use cron::{next_run_after, next_run_millis, Schedule};
pub use tick::{run_tick_loop, tick_once};
