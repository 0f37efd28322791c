//! Cache records and the resume-pointer commit.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite};
use std::collections::BTreeSet;

use super::db::{now_millis, TaskDb};
use super::tasks::{task_from_row, write_task};
use super::types::{next_resume_pointer, CachedEpisode, Task};

fn cached_from_row(row: &SqliteRow) -> CachedEpisode {
    CachedEpisode {
        unique_key: row.get("unique_key"),
        task_id: row.get("task_id"),
        episode_number: row.get::<i64, _>("episode_number") as u32,
        episode_path: row.get("episode_path"),
        title: row.get("title"),
        poster: row.get("poster"),
        year: row.get("year"),
        description: row.get("description"),
        category: row.get("category"),
        type_name: row.get("type_name"),
        total_episodes: row.get::<i64, _>("total_episodes") as u32,
        origin_source: row.get("origin_source"),
        origin_id: row.get("origin_id"),
        downloaded_at: row.get("downloaded_at"),
    }
}

async fn write_cached<'e, E>(executor: E, c: &CachedEpisode) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO cached_episodes (
            unique_key, task_id, episode_number, episode_path, title, poster, year,
            description, category, type_name, total_episodes, origin_source, origin_id,
            downloaded_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        ON CONFLICT(unique_key) DO UPDATE SET
            task_id = excluded.task_id,
            episode_number = excluded.episode_number,
            episode_path = excluded.episode_path,
            title = excluded.title,
            poster = excluded.poster,
            year = excluded.year,
            description = excluded.description,
            category = excluded.category,
            type_name = excluded.type_name,
            total_episodes = excluded.total_episodes,
            origin_source = excluded.origin_source,
            origin_id = excluded.origin_id,
            downloaded_at = excluded.downloaded_at
        "#,
    )
    .bind(&c.unique_key)
    .bind(&c.task_id)
    .bind(c.episode_number as i64)
    .bind(&c.episode_path)
    .bind(&c.title)
    .bind(&c.poster)
    .bind(&c.year)
    .bind(&c.description)
    .bind(&c.category)
    .bind(&c.type_name)
    .bind(c.total_episodes as i64)
    .bind(&c.origin_source)
    .bind(&c.origin_id)
    .bind(c.downloaded_at)
    .execute(executor)
    .await?;
    Ok(())
}

impl TaskDb {
    /// Cache records, optionally for one task, ordered by task then episode.
    pub async fn list_cached(&self, task_id: Option<&str>) -> Result<Vec<CachedEpisode>> {
        let rows = match task_id {
            Some(id) => {
                sqlx::query("SELECT * FROM cached_episodes WHERE task_id = ?1 ORDER BY episode_number ASC")
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM cached_episodes ORDER BY task_id ASC, episode_number ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows.iter().map(cached_from_row).collect())
    }

    /// Episode numbers already downloaded for a task.
    pub async fn cached_episode_numbers(&self, task_id: &str) -> Result<BTreeSet<u32>> {
        let rows = sqlx::query("SELECT episode_number FROM cached_episodes WHERE task_id = ?1")
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| r.get::<i64, _>("episode_number") as u32)
            .collect())
    }

    /// Upsert by unique key.
    pub async fn save_cached(&self, cached: &CachedEpisode) -> Result<()> {
        write_cached(&self.pool, cached).await
    }

    /// Removes a cache record and returns it (so callers can delete files).
    pub async fn delete_cached(&self, unique_key: &str) -> Result<Option<CachedEpisode>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT * FROM cached_episodes WHERE unique_key = ?1")
            .bind(unique_key)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let record = cached_from_row(&row);
        sqlx::query("DELETE FROM cached_episodes WHERE unique_key = ?1")
            .bind(unique_key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(record))
    }

    /// Writes `cached` and advances the owning task's resume pointer in one
    /// transaction.
    ///
    /// The pointer becomes the lowest episode `>= start_episode` that is not
    /// cached. When it passes `total_episodes`, `next_run` is replaced by
    /// `reschedule(&task)`. Returns the updated task, or `None` when the task
    /// no longer exists (the record is still written).
    pub async fn commit_episode<F>(&self, cached: &CachedEpisode, reschedule: F) -> Result<Option<Task>>
    where
        F: FnOnce(&Task) -> Option<i64>,
    {
        let mut tx = self.pool.begin().await?;
        write_cached(&mut *tx, cached).await.context("write cache record")?;

        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?1")
            .bind(&cached.task_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let mut task = task_from_row(&row);

        let rows = sqlx::query("SELECT episode_number FROM cached_episodes WHERE task_id = ?1")
            .bind(&task.id)
            .fetch_all(&mut *tx)
            .await?;
        let numbers: BTreeSet<u32> = rows
            .iter()
            .map(|r| r.get::<i64, _>("episode_number") as u32)
            .collect();

        let pointer = next_resume_pointer(task.start_episode, task.total_episodes, &numbers);
        if pointer != task.start_episode || pointer > task.total_episodes {
            task.start_episode = pointer;
            if task.is_finished() {
                task.next_run = reschedule(&task);
            }
            task.normalize();
            task.updated_at = now_millis();
            write_task(&mut *tx, &task).await.context("advance resume pointer")?;
        }
        tx.commit().await?;
        Ok(Some(task))
    }
}
