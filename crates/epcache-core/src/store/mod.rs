//! Persistent task and cache store (SQLite via sqlx).
//!
//! Holds scheduled tasks and the cache records of downloaded episodes. Every
//! mutation is a single statement or a transaction, so concurrent commits for
//! different tasks never lose updates.

mod cache;
mod db;
mod import;
mod tasks;
pub mod types;

pub use db::{now_millis, TaskDb};
pub use types::*;
