//! Task read/write operations.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite};

use super::db::{now_millis, TaskDb};
use super::types::Task;

pub(super) fn task_from_row(row: &SqliteRow) -> Task {
    Task {
        id: row.get("id"),
        title: row.get("title"),
        poster: row.get("poster"),
        source: row.get("source"),
        source_id: row.get("source_id"),
        start_episode: row.get::<i64, _>("start_episode") as u32,
        total_episodes: row.get::<i64, _>("total_episodes") as u32,
        download_path: row.get("download_path"),
        cron_expression: row.get("cron_expression"),
        download_timeout: row.get::<i64, _>("download_timeout") as u64,
        enabled: row.get("enabled"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        next_run: row.get("next_run"),
    }
}

/// Upsert without touching timestamps (callers set them).
pub(super) async fn write_task<'e, E>(executor: E, task: &Task) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO tasks (
            id, title, poster, source, source_id, start_episode, total_episodes,
            download_path, cron_expression, download_timeout, enabled,
            created_at, updated_at, next_run
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            poster = excluded.poster,
            source = excluded.source,
            source_id = excluded.source_id,
            start_episode = excluded.start_episode,
            total_episodes = excluded.total_episodes,
            download_path = excluded.download_path,
            cron_expression = excluded.cron_expression,
            download_timeout = excluded.download_timeout,
            enabled = excluded.enabled,
            updated_at = excluded.updated_at,
            next_run = excluded.next_run
        "#,
    )
    .bind(&task.id)
    .bind(&task.title)
    .bind(&task.poster)
    .bind(&task.source)
    .bind(&task.source_id)
    .bind(task.start_episode as i64)
    .bind(task.total_episodes as i64)
    .bind(&task.download_path)
    .bind(&task.cron_expression)
    .bind(task.download_timeout as i64)
    .bind(task.enabled)
    .bind(task.created_at)
    .bind(task.updated_at)
    .bind(task.next_run)
    .execute(executor)
    .await?;
    Ok(())
}

impl TaskDb {
    pub async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(task_from_row))
    }

    /// All tasks, oldest first.
    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY created_at ASC, id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(task_from_row).collect())
    }

    /// Enabled tasks whose `next_run` is absent or not after `now_ms`.
    pub async fn due_tasks(&self, now_ms: i64) -> Result<Vec<Task>> {
        Ok(self
            .list_tasks()
            .await?
            .into_iter()
            .filter(|t| t.is_due(now_ms))
            .collect())
    }

    /// Normalizes, stamps and upserts a task. Returns what was stored.
    pub async fn save_task(&self, task: &Task) -> Result<Task> {
        let mut task = task.clone();
        task.normalize();
        let now = now_millis();
        if task.created_at == 0 {
            task.created_at = now;
        }
        task.updated_at = now;
        write_task(&self.pool, &task).await?;
        Ok(task)
    }

    /// Returns true if a task was removed. Cache records are kept.
    pub async fn delete_task(&self, id: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM tasks WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Enables or disables a task; enabling a finished task has no effect.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<Option<Task>> {
        let Some(mut task) = self.get_task(id).await? else {
            return Ok(None);
        };
        task.enabled = enabled;
        Ok(Some(self.save_task(&task).await?))
    }
}
