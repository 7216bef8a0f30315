use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use nurture_core::domain::lead::LeadId;
use nurture_core::domain::mirror::{ExternalStage, MirrorSyncStatus, StageMirrorRecord};
use nurture_core::flows::ConversationStage;

use super::{MirrorRepository, RepositoryError};
use crate::DbPool;

const MIRROR_COLUMNS: &str = "lead_id,
                internal_stage,
                external_stage,
                status,
                attempts,
                last_error,
                next_retry_at,
                last_synced_at,
                updated_at";

pub struct SqlMirrorRepository {
    pool: DbPool,
}

impl SqlMirrorRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MirrorRepository for SqlMirrorRepository {
    async fn upsert_pending(
        &self,
        lead_id: &LeadId,
        internal_stage: ConversationStage,
        external_stage: ExternalStage,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        // A new stage supersedes whatever sync state the previous one was in;
        // only last_synced_at survives as history.
        sqlx::query(
            "INSERT INTO stage_mirror (
                lead_id, internal_stage, external_stage, status, attempts,
                last_error, next_retry_at, last_synced_at, updated_at
             ) VALUES (?, ?, ?, 'pending', 0, NULL, NULL, NULL, ?)
             ON CONFLICT(lead_id) DO UPDATE SET
                internal_stage = excluded.internal_stage,
                external_stage = excluded.external_stage,
                status = 'pending',
                attempts = 0,
                last_error = NULL,
                next_retry_at = NULL,
                updated_at = excluded.updated_at",
        )
        .bind(&lead_id.0)
        .bind(internal_stage.as_str())
        .bind(external_stage.as_str())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_synced(
        &self,
        lead_id: &LeadId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE stage_mirror SET
                status = 'synced',
                last_error = NULL,
                next_retry_at = NULL,
                last_synced_at = ?,
                updated_at = ?
             WHERE lead_id = ?",
        )
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(&lead_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_retry(
        &self,
        lead_id: &LeadId,
        attempts: u32,
        error: &str,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE stage_mirror SET
                status = 'pending',
                attempts = ?,
                last_error = ?,
                next_retry_at = ?,
                updated_at = ?
             WHERE lead_id = ?",
        )
        .bind(i64::from(attempts))
        .bind(error)
        .bind(next_retry_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(&lead_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        lead_id: &LeadId,
        attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE stage_mirror SET
                status = 'failed',
                attempts = ?,
                last_error = ?,
                next_retry_at = NULL,
                updated_at = ?
             WHERE lead_id = ?",
        )
        .bind(i64::from(attempts))
        .bind(error)
        .bind(now.to_rfc3339())
        .bind(&lead_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_for_lead(
        &self,
        lead_id: &LeadId,
    ) -> Result<Option<StageMirrorRecord>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {MIRROR_COLUMNS} FROM stage_mirror WHERE lead_id = ?"))
                .bind(&lead_id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.map(mirror_from_row).transpose()
    }

    async fn due_pending(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StageMirrorRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {MIRROR_COLUMNS}
             FROM stage_mirror
             WHERE status = 'pending'
               AND (next_retry_at IS NULL OR datetime(next_retry_at) <= datetime(?))
             ORDER BY datetime(updated_at) ASC
             LIMIT ?"
        ))
        .bind(now.to_rfc3339())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(mirror_from_row).collect()
    }
}

fn mirror_from_row(row: SqliteRow) -> Result<StageMirrorRecord, RepositoryError> {
    let internal_raw = row.try_get::<String, _>("internal_stage")?;
    let internal_stage = ConversationStage::parse(&internal_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown conversation stage `{internal_raw}`"))
    })?;

    let external_raw = row.try_get::<String, _>("external_stage")?;
    let external_stage = ExternalStage::parse(&external_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown external stage `{external_raw}`"))
    })?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = MirrorSyncStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown mirror status `{status_raw}`")))?;

    Ok(StageMirrorRecord {
        lead_id: LeadId(row.try_get("lead_id")?),
        internal_stage,
        external_stage,
        status,
        attempts: parse_u32("attempts", row.try_get("attempts")?)?,
        last_error: row.try_get("last_error")?,
        next_retry_at: parse_optional_timestamp("next_retry_at", row.try_get("next_retry_at")?)?,
        last_synced_at: parse_optional_timestamp(
            "last_synced_at",
            row.try_get("last_synced_at")?,
        )?,
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
