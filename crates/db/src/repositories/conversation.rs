use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use nurture_core::domain::conversation::{Conversation, ConversationId};
use nurture_core::domain::lead::LeadId;
use nurture_core::flows::{initial_stage, ConversationStage};

use super::{ConversationRepository, RepositoryError};
use crate::DbPool;

const CONVERSATION_COLUMNS: &str = "id,
                lead_id,
                stage,
                sentiment,
                active,
                inbound_count,
                outbound_count,
                started_at,
                last_message_at,
                ended_at,
                created_at,
                updated_at";

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn get_or_create_active(
        &self,
        lead_id: &LeadId,
        now: DateTime<Utc>,
    ) -> Result<Conversation, RepositoryError> {
        // Conflict target is the one-active-per-lead partial index, so two
        // racing flushes cannot open two threads for the same lead.
        let row = sqlx::query(&format!(
            "INSERT INTO conversations (
                id, lead_id, stage, active, inbound_count, outbound_count,
                started_at, created_at, updated_at
             ) VALUES (?, ?, ?, 1, 0, 0, ?, ?, ?)
             ON CONFLICT(lead_id) WHERE active = 1
                DO UPDATE SET updated_at = conversations.updated_at
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(&lead_id.0)
        .bind(initial_stage().as_str())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        conversation_from_row(row)
    }

    async fn find_active(&self, lead_id: &LeadId) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE lead_id = ? AND active = 1"
        ))
        .bind(&lead_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn update_stage(
        &self,
        id: &ConversationId,
        stage: ConversationStage,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE conversations SET stage = ?, updated_at = ? WHERE id = ?")
            .bind(stage.as_str())
            .bind(now.to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn update_sentiment(
        &self,
        id: &ConversationId,
        sentiment: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE conversations SET sentiment = ?, updated_at = ? WHERE id = ?")
            .bind(sentiment)
            .bind(now.to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn record_inbound_batch(
        &self,
        id: &ConversationId,
        message_count: u32,
        last_message_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE conversations SET
                inbound_count = inbound_count + ?,
                last_message_at = ?,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(i64::from(message_count))
        .bind(last_message_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_outbound(
        &self,
        id: &ConversationId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE conversations SET
                outbound_count = outbound_count + 1,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn end_active(
        &self,
        lead_id: &LeadId,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE conversations SET active = 0, ended_at = ?, updated_at = ?
             WHERE lead_id = ? AND active = 1",
        )
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(&lead_id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, RepositoryError> {
    let stage_raw = row.try_get::<String, _>("stage")?;
    let stage = ConversationStage::parse(&stage_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown conversation stage `{stage_raw}`"))
    })?;

    Ok(Conversation {
        id: ConversationId(row.try_get("id")?),
        lead_id: LeadId(row.try_get("lead_id")?),
        stage,
        sentiment: row.try_get("sentiment")?,
        active: row.try_get("active")?,
        inbound_count: parse_u32("inbound_count", row.try_get("inbound_count")?)?,
        outbound_count: parse_u32("outbound_count", row.try_get("outbound_count")?)?,
        started_at: parse_timestamp("started_at", row.try_get("started_at")?)?,
        last_message_at: parse_optional_timestamp(
            "last_message_at",
            row.try_get("last_message_at")?,
        )?,
        ended_at: parse_optional_timestamp("ended_at", row.try_get("ended_at")?)?,
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
