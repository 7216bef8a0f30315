use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row};

use nurture_core::domain::lead::LeadId;
use nurture_core::domain::task::{FollowUpTask, FollowUpTaskId, TaskStatus, TaskType};

use super::{FollowUpRepository, RepositoryError};
use crate::DbPool;

const TASK_COLUMNS: &str = "id,
                lead_id,
                task_type,
                scheduled_at,
                priority,
                status,
                attempt_count,
                max_attempts,
                last_attempt_at,
                next_retry_at,
                error_reason,
                claimed_by,
                claimed_at,
                created_at,
                updated_at";

pub struct SqlFollowUpRepository {
    pool: DbPool,
}

impl SqlFollowUpRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl FollowUpRepository for SqlFollowUpRepository {
    async fn schedule(&self, task: FollowUpTask) -> Result<FollowUpTask, RepositoryError> {
        // Conflict target is the one-pending-per-(lead, type) partial index.
        // The no-op DO UPDATE makes RETURNING yield the existing row, so the
        // caller always sees the task that is actually queued.
        let row = sqlx::query(&format!(
            "INSERT INTO follow_up_tasks (
                id, lead_id, task_type, scheduled_at, priority, status,
                attempt_count, max_attempts, last_attempt_at, next_retry_at,
                error_reason, claimed_by, claimed_at, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(lead_id, task_type) WHERE status = 'pending'
                DO UPDATE SET updated_at = follow_up_tasks.updated_at
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(&task.id.0)
        .bind(&task.lead_id.0)
        .bind(task.task_type.as_str())
        .bind(task.scheduled_at.to_rfc3339())
        .bind(i64::from(task.priority))
        .bind(task.status.as_str())
        .bind(i64::from(task.attempt_count))
        .bind(i64::from(task.max_attempts))
        .bind(task.last_attempt_at.map(|value| value.to_rfc3339()))
        .bind(task.next_retry_at.map(|value| value.to_rfc3339()))
        .bind(task.error_reason.as_deref())
        .bind(task.claimed_by.as_deref())
        .bind(task.claimed_at.map(|value| value.to_rfc3339()))
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        task_from_row(row)
    }

    async fn cancel_pending(
        &self,
        lead_id: &LeadId,
        task_types: &[TaskType],
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        if task_types.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::new("UPDATE follow_up_tasks SET status = 'cancelled', updated_at = ");
        builder.push_bind(now.to_rfc3339());
        builder.push(" WHERE lead_id = ");
        builder.push_bind(&lead_id.0);
        builder.push(" AND status = 'pending' AND task_type IN (");
        let mut separated = builder.separated(", ");
        for task_type in task_types {
            separated.push_bind(task_type.as_str());
        }
        builder.push(")");

        let result = builder.build().execute(&self.pool).await?;

        Ok(result.rows_affected())
    }

    async fn due_tasks(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<FollowUpTask>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS}
             FROM follow_up_tasks
             WHERE status = 'pending' AND datetime(scheduled_at) <= datetime(?)
             ORDER BY priority DESC, datetime(scheduled_at) ASC, rowid ASC
             LIMIT ?"
        ))
        .bind(now.to_rfc3339())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(task_from_row).collect()
    }

    async fn try_begin_execution(
        &self,
        id: &FollowUpTaskId,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE follow_up_tasks SET
                status = 'executing',
                claimed_by = ?,
                claimed_at = ?,
                attempt_count = attempt_count + 1,
                last_attempt_at = ?,
                updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(worker_id)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_executed(
        &self,
        id: &FollowUpTaskId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE follow_up_tasks SET
                status = 'executed',
                error_reason = NULL,
                updated_at = ?
             WHERE id = ? AND status = 'executing'",
        )
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_retry(
        &self,
        id: &FollowUpTaskId,
        next_retry_at: DateTime<Utc>,
        error_reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE follow_up_tasks SET
                status = 'pending',
                scheduled_at = ?,
                next_retry_at = ?,
                error_reason = ?,
                claimed_by = NULL,
                claimed_at = NULL,
                updated_at = ?
             WHERE id = ? AND status = 'executing'",
        )
        .bind(next_retry_at.to_rfc3339())
        .bind(next_retry_at.to_rfc3339())
        .bind(error_reason)
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(
        &self,
        id: &FollowUpTaskId,
        error_reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE follow_up_tasks SET
                status = 'failed',
                error_reason = ?,
                updated_at = ?
             WHERE id = ? AND status = 'executing'",
        )
        .bind(error_reason)
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reclaim_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE follow_up_tasks SET
                status = 'pending',
                claimed_by = NULL,
                claimed_at = NULL,
                updated_at = ?
             WHERE status = 'executing' AND datetime(claimed_at) <= datetime(?)",
        )
        .bind(now.to_rfc3339())
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_by_id(
        &self,
        id: &FollowUpTaskId,
    ) -> Result<Option<FollowUpTask>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM follow_up_tasks WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(task_from_row).transpose()
    }
}

fn task_from_row(row: SqliteRow) -> Result<FollowUpTask, RepositoryError> {
    let task_type_raw = row.try_get::<String, _>("task_type")?;
    let task_type = TaskType::parse(&task_type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown task type `{task_type_raw}`")))?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = TaskStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown task status `{status_raw}`")))?;

    Ok(FollowUpTask {
        id: FollowUpTaskId(row.try_get("id")?),
        lead_id: LeadId(row.try_get("lead_id")?),
        task_type,
        scheduled_at: parse_timestamp("scheduled_at", row.try_get("scheduled_at")?)?,
        priority: parse_u32("priority", row.try_get("priority")?)?,
        status,
        attempt_count: parse_u32("attempt_count", row.try_get("attempt_count")?)?,
        max_attempts: parse_u32("max_attempts", row.try_get("max_attempts")?)?,
        last_attempt_at: parse_optional_timestamp(
            "last_attempt_at",
            row.try_get("last_attempt_at")?,
        )?,
        next_retry_at: parse_optional_timestamp("next_retry_at", row.try_get("next_retry_at")?)?,
        error_reason: row.try_get("error_reason")?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: parse_optional_timestamp("claimed_at", row.try_get("claimed_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}
