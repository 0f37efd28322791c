//! Connection, migrations and timestamp helpers. CRUD lives in `tasks` and `cache`.

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Handle to the task database, `<state_dir>/epcache.db`.
#[derive(Clone)]
pub struct TaskDb {
    pub(crate) pool: Pool<Sqlite>,
}

impl TaskDb {
    /// Open (or create) the database inside the state dir.
    pub async fn open_default(state_dir: &Path) -> Result<Self> {
        Self::open_at(state_dir.join("epcache.db")).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await?;
        let db = TaskDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// In-memory database; single connection so every query sees the same data.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = TaskDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                poster TEXT NOT NULL DEFAULT '',
                source TEXT NOT NULL,
                source_id TEXT NOT NULL,
                start_episode INTEGER NOT NULL,
                total_episodes INTEGER NOT NULL,
                download_path TEXT NOT NULL DEFAULT '',
                cron_expression TEXT NOT NULL,
                download_timeout INTEGER NOT NULL,
                enabled INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                next_run INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cached_episodes (
                unique_key TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                episode_number INTEGER NOT NULL,
                episode_path TEXT NOT NULL,
                title TEXT NOT NULL,
                poster TEXT NOT NULL DEFAULT '',
                year TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL DEFAULT '',
                type_name TEXT NOT NULL DEFAULT '',
                total_episodes INTEGER NOT NULL DEFAULT 0,
                origin_source TEXT NOT NULL DEFAULT '',
                origin_id TEXT NOT NULL DEFAULT '',
                downloaded_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS cached_episodes_task ON cached_episodes (task_id, episode_number)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Current time as Unix epoch milliseconds (task and cache timestamps).
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
