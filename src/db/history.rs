//! Ledger writes and history queries.

use crate::notify::HistoryLedger;
use crate::types::{Status, Task};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};

use super::{Database, HistoryEntry, HistoryQuery, HistoryRow, HistorySort};

const HISTORY_COLUMNS: &str = "id, task_id, url, title, platform, format_id, output_format, \
     format_ext, filesize_bytes, save_path, started_at, finished_at, status, error_message, \
     audio_extracted, include_audio, has_audio, has_video";

/// Normalize a URL (or a bare platform name) into a short platform label
///
/// `youtube`, `x` and `bilibili` are recognized; anything else yields the
/// lowercase host without a leading `www.` / `m.`.
///
/// ```
/// use media_dl::db::normalize_platform;
///
/// assert_eq!(normalize_platform("https://youtu.be/abc"), "youtube");
/// assert_eq!(normalize_platform("https://twitter.com/a/status/1"), "x");
/// assert_eq!(normalize_platform("https://www.vimeo.com/1"), "vimeo.com");
/// ```
pub fn normalize_platform(source: &str) -> String {
    let source = source.trim();
    if source.is_empty() {
        return String::new();
    }

    let host = match url::Url::parse(source) {
        Ok(url) => url.host_str().unwrap_or_default().to_ascii_lowercase(),
        Err(_) => source.to_ascii_lowercase(),
    };
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .unwrap_or(&host)
        .to_string();

    if host.contains("youtube") || host == "youtu.be" {
        "youtube".to_string()
    } else if host.contains("twitter") || host == "x.com" || host == "x" {
        "x".to_string()
    } else if host.contains("bilibili") || host == "b23.tv" || host == "bili" || host == "b" {
        "bilibili".to_string()
    } else {
        host
    }
}

fn flag(value: bool) -> i32 {
    i32::from(value)
}

fn save_path(task: &Task) -> Option<String> {
    task.output_path
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
}

/// Final size: reported total first, then the file on disk
async fn final_size(task: &Task) -> Option<i64> {
    if task.progress.total_bytes > 0 {
        return Some(task.progress.total_bytes as i64);
    }
    let path = task.output_path.as_ref()?;
    tokio::fs::metadata(path).await.ok().map(|m| m.len() as i64)
}

impl Database {
    /// Record that `task` started; returns the history record id
    ///
    /// With `task.history_id` set, that record is reset to an unfinished state;
    /// otherwise the record is upserted by task id.
    pub async fn record_task_start(&self, task: &Task) -> Result<i64> {
        let platform = normalize_platform(&task.url);

        if let Some(history_id) = task.history_id {
            let result = sqlx::query(
                r#"
                UPDATE download_history
                SET task_id = ?, url = ?, title = ?, platform = ?, format_id = ?,
                    output_format = ?, format_ext = ?, save_path = ?,
                    started_at = COALESCE(started_at, ?), finished_at = NULL,
                    status = ?, error_message = NULL, audio_extracted = ?,
                    include_audio = ?, has_audio = ?, has_video = ?
                WHERE id = ?
                "#,
            )
            .bind(task.id.as_str())
            .bind(&task.url)
            .bind(&task.title)
            .bind(&platform)
            .bind(&task.format_id)
            .bind(&task.output_format)
            .bind(&task.format_ext)
            .bind(save_path(task))
            .bind(Utc::now().timestamp())
            .bind(task.status.as_str())
            .bind(flag(task.audio_path.is_some()))
            .bind(flag(task.include_audio))
            .bind(flag(task.has_audio))
            .bind(flag(task.has_video))
            .bind(history_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

            if result.rows_affected() > 0 {
                return Ok(history_id);
            }
        }

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO download_history (
                task_id, url, title, platform, format_id, output_format, format_ext,
                save_path, started_at, status, audio_extracted, include_audio,
                has_audio, has_video
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(task_id) DO UPDATE SET
                title = excluded.title,
                platform = excluded.platform,
                format_id = excluded.format_id,
                output_format = excluded.output_format,
                format_ext = excluded.format_ext,
                save_path = excluded.save_path,
                started_at = COALESCE(download_history.started_at, excluded.started_at),
                finished_at = NULL,
                status = excluded.status,
                error_message = NULL
            RETURNING id
            "#,
        )
        .bind(task.id.as_str())
        .bind(&task.url)
        .bind(&task.title)
        .bind(&platform)
        .bind(&task.format_id)
        .bind(&task.output_format)
        .bind(&task.format_ext)
        .bind(save_path(task))
        .bind(Utc::now().timestamp())
        .bind(task.status.as_str())
        .bind(flag(task.audio_path.is_some()))
        .bind(flag(task.include_audio))
        .bind(flag(task.has_audio))
        .bind(flag(task.has_video))
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(id)
    }

    /// Record `task`'s final state, inserting the record if it is missing
    pub async fn record_task_finish(&self, task: &Task) -> Result<()> {
        let platform = normalize_platform(&task.url);
        let filesize = final_size(task).await;
        let finished_at = task.completed_at.unwrap_or_else(Utc::now).timestamp();
        let error_message = (!task.error_message.is_empty()).then_some(task.error_message.as_str());

        // A stale history_id falls back to the task_id match, then to an insert
        let updated = sqlx::query(
            r#"
            UPDATE download_history
            SET title = ?, platform = ?, format_id = ?, output_format = ?,
                format_ext = ?, filesize_bytes = ?, save_path = ?, finished_at = ?,
                status = ?, error_message = ?, audio_extracted = ?,
                include_audio = ?, has_audio = ?, has_video = ?
            WHERE id = COALESCE(
                (SELECT id FROM download_history WHERE id = ?),
                (SELECT id FROM download_history WHERE task_id = ?)
            )
            "#,
        )
        .bind(&task.title)
        .bind(&platform)
        .bind(&task.format_id)
        .bind(&task.output_format)
        .bind(&task.format_ext)
        .bind(filesize)
        .bind(save_path(task))
        .bind(finished_at)
        .bind(task.status.as_str())
        .bind(error_message)
        .bind(flag(task.audio_path.is_some()))
        .bind(flag(task.include_audio))
        .bind(flag(task.has_audio))
        .bind(flag(task.has_video))
        .bind(task.history_id)
        .bind(task.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        if updated.rows_affected() > 0 {
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO download_history (
                task_id, url, title, platform, format_id, output_format, format_ext,
                filesize_bytes, save_path, started_at, finished_at, status, error_message,
                audio_extracted, include_audio, has_audio, has_video
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(task_id) DO UPDATE SET
                filesize_bytes = excluded.filesize_bytes,
                finished_at = excluded.finished_at,
                status = excluded.status,
                error_message = excluded.error_message
            "#,
        )
        .bind(task.id.as_str())
        .bind(&task.url)
        .bind(&task.title)
        .bind(&platform)
        .bind(&task.format_id)
        .bind(&task.output_format)
        .bind(&task.format_ext)
        .bind(filesize)
        .bind(save_path(task))
        .bind(task.created_at.timestamp())
        .bind(finished_at)
        .bind(task.status.as_str())
        .bind(error_message)
        .bind(flag(task.audio_path.is_some()))
        .bind(flag(task.include_audio))
        .bind(flag(task.has_audio))
        .bind(flag(task.has_video))
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(())
    }

    /// Get the history entry of a task
    pub async fn get_history_by_task(&self, task_id: &str) -> Result<Option<HistoryEntry>> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM download_history WHERE task_id = ?"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(row.map(HistoryEntry::from))
    }

    /// Get a single history entry by ID
    pub async fn get_history_entry(&self, id: i64) -> Result<Option<HistoryEntry>> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM download_history WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(row.map(HistoryEntry::from))
    }

    /// Query history with filters and pagination
    pub async fn query_history(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {HISTORY_COLUMNS} FROM download_history"));
        push_filters(&mut builder, query);

        builder.push(match query.sort {
            HistorySort::Newest => " ORDER BY started_at DESC, id DESC",
            HistorySort::Oldest => " ORDER BY started_at ASC, id ASC",
        });
        builder.push(" LIMIT ");
        builder.push_bind(query.limit as i64);
        builder.push(" OFFSET ");
        builder.push_bind(query.offset as i64);

        let rows = builder
            .build_query_as::<HistoryRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(rows.into_iter().map(HistoryEntry::from).collect())
    }

    /// Count history entries (optionally filtered by status)
    pub async fn count_history(&self, status_filter: Option<Status>) -> Result<i64> {
        let count = if let Some(status) = status_filter {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM download_history WHERE status = ?")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Sqlx)?
        } else {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM download_history")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Sqlx)?
        };

        Ok(count)
    }

    /// Delete one history entry; returns whether it existed
    pub async fn delete_history(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM download_history WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    /// Clear all history
    ///
    /// Returns the number of records deleted.
    pub async fn clear_history(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM download_history")
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(result.rows_affected())
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &HistoryQuery) {
    builder.push(" WHERE 1 = 1");

    if let Some(status) = query.status {
        builder.push(" AND status = ");
        builder.push_bind(status.as_str());
    }
    if let Some(platform) = query.platform.as_deref().filter(|p| !p.trim().is_empty()) {
        builder.push(" AND platform = ");
        builder.push_bind(normalize_platform(platform));
    }
    if let Some(keyword) = query.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        let pattern = format!("%{keyword}%");
        builder.push(" AND (title LIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR url LIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
}

#[async_trait]
impl HistoryLedger for Database {
    async fn record_start(&self, task: &Task) -> Result<Option<i64>> {
        self.record_task_start(task).await.map(Some)
    }

    async fn record_finish(&self, task: &Task) -> Result<()> {
        self.record_task_finish(task).await
    }
}
