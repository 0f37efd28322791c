//! CLI for epcache: task and cache management plus the supervisor and
//! worker entry points.

mod commands;
mod control_socket;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use epcache_core::config::{self, EpcacheConfig};
use epcache_core::logging;
use epcache_core::store::TaskDb;
use std::path::PathBuf;

use commands::{
    run_add, run_cache, run_completions, run_enable, run_import, run_list, run_man, run_next_run, run_remove,
    run_serve, run_start, run_stop, run_uncache, run_worker, AddArgs,
};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "epcache")]
#[command(about = "epcache: scheduled, resumable episode downloads into a local cache", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the supervisor: scheduler tick, task workers and the control socket.
    Serve,

    /// Worker process entry point (spawned by the supervisor).
    #[command(hide = true)]
    Worker,

    /// Add a scheduled download task.
    Add(AddArgs),

    /// List tasks.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Launch a task now. Uses the running supervisor if there is one,
    /// otherwise runs the task in the foreground.
    Run {
        /// Task identifier.
        id: String,
    },

    /// Stop a running task.
    Stop {
        /// Task identifier.
        id: String,
    },

    /// Enable a task.
    Enable {
        /// Task identifier.
        id: String,
    },

    /// Disable a task.
    Disable {
        /// Task identifier.
        id: String,
    },

    /// Remove a task. Cached episodes are kept.
    Remove {
        /// Task identifier.
        id: String,
    },

    /// List cached episodes.
    Cache {
        /// Only episodes of this task.
        #[arg(long, value_name = "ID")]
        task: Option<String>,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Delete a cached episode record by its unique key.
    Uncache {
        /// Unique key (`{task id}_{episode number}`).
        key: String,
        /// Also delete the episode file from the download directory.
        #[arg(long)]
        delete_files: bool,
    },

    /// Import a legacy JSON array of tasks (or cached videos with --cached).
    Import {
        /// Path to the JSON file.
        path: PathBuf,
        /// The file holds cached video records instead of tasks.
        #[arg(long)]
        cached: bool,
    },

    /// Print the next run time of a cron expression.
    NextRun {
        /// Five-field expression, e.g. "0 2 * * *".
        expr: String,
        /// Reference time (local, `YYYY-MM-DDTHH:MM`); defaults to now.
        #[arg(long, value_name = "TIME")]
        from: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Render the man page to stdout.
    Man,
}

impl CliCommand {
    /// Parses arguments, initializes logging and dispatches. Returns the
    /// process exit code.
    pub async fn run_from_args() -> Result<i32> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Worker => {
                logging::init_logging_stderr();
                return run_worker().await;
            }
            CliCommand::Completions { shell } => run_completions(shell)?,
            CliCommand::Man => run_man()?,
            CliCommand::NextRun { expr, from } => run_next_run(&expr, from.as_deref())?,
            CliCommand::Serve => run_serve(&CliContext::load().await?).await?,
            CliCommand::Add(args) => run_add(&CliContext::load().await?, args).await?,
            CliCommand::List { json } => run_list(&CliContext::load().await?, json).await?,
            CliCommand::Run { id } => run_start(&CliContext::load().await?, &id).await?,
            CliCommand::Stop { id } => run_stop(&CliContext::load().await?, &id).await?,
            CliCommand::Enable { id } => run_enable(&CliContext::load().await?, &id, true).await?,
            CliCommand::Disable { id } => run_enable(&CliContext::load().await?, &id, false).await?,
            CliCommand::Remove { id } => run_remove(&CliContext::load().await?, &id).await?,
            CliCommand::Cache { task, json } => {
                run_cache(&CliContext::load().await?, task.as_deref(), json).await?
            }
            CliCommand::Uncache { key, delete_files } => {
                run_uncache(&CliContext::load().await?, &key, delete_files).await?
            }
            CliCommand::Import { path, cached } => run_import(&CliContext::load().await?, &path, cached).await?,
        }
        Ok(0)
    }
}

/// Loaded configuration, state dir and database shared by command handlers.
pub struct CliContext {
    pub cfg: EpcacheConfig,
    pub state_dir: PathBuf,
    pub db: TaskDb,
}

impl CliContext {
    /// Loads config, starts file logging (stderr on failure) and opens the database.
    pub async fn load() -> Result<Self> {
        let cfg = config::load_or_init()?;
        let state_dir = cfg.state_dir()?;
        if let Err(e) = logging::init_logging(&state_dir) {
            logging::init_logging_stderr();
            tracing::warn!("file logging unavailable ({}), using stderr", e);
        }
        tracing::debug!("loaded config: {:?}", cfg);
        let db = TaskDb::open_default(&state_dir)
            .await
            .with_context(|| format!("open task database in {}", state_dir.display()))?;
        Ok(Self { cfg, state_dir, db })
    }
}

#[cfg(test)]
mod tests;
