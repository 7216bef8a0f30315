use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row};

use nurture_core::domain::conversation::ConversationId;
use nurture_core::domain::lead::LeadId;
use nurture_core::domain::message::{ContentType, Message, MessageDirection, MessageId};

use super::{MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn record_inbound(&self, message: &Message) -> Result<bool, RepositoryError> {
        // The channel delivery id is the primary key; a redelivered message
        // collides and affects zero rows.
        let result = sqlx::query(
            "INSERT INTO messages (
                id, lead_id, conversation_id, direction, content, content_type,
                received_at, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&message.id.0)
        .bind(&message.lead_id.0)
        .bind(message.conversation_id.as_ref().map(|id| id.0.as_str()))
        .bind(message.direction.as_str())
        .bind(&message.content)
        .bind(message.content_type.as_str())
        .bind(message.received_at.to_rfc3339())
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_outbound(&self, message: &Message) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO messages (
                id, lead_id, conversation_id, direction, content, content_type,
                received_at, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id.0)
        .bind(&message.lead_id.0)
        .bind(message.conversation_id.as_ref().map(|id| id.0.as_str()))
        .bind(message.direction.as_str())
        .bind(&message.content)
        .bind(message.content_type.as_str())
        .bind(message.received_at.to_rfc3339())
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn attach_to_conversation(
        &self,
        ids: &[MessageId],
        conversation_id: &ConversationId,
    ) -> Result<(), RepositoryError> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut builder = QueryBuilder::new("UPDATE messages SET conversation_id = ");
        builder.push_bind(&conversation_id.0);
        builder.push(" WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(&id.0);
        }
        builder.push(")");

        builder.build().execute(&self.pool).await?;

        Ok(())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError> {
        // datetime() truncates to whole seconds, so rowid breaks ties in
        // arrival order.
        let rows = sqlx::query(
            "SELECT
                id,
                lead_id,
                conversation_id,
                direction,
                content,
                content_type,
                received_at,
                created_at
             FROM messages
             WHERE conversation_id = ?
             ORDER BY datetime(received_at) ASC, rowid ASC",
        )
        .bind(&conversation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let direction_raw = row.try_get::<String, _>("direction")?;
    let direction = MessageDirection::parse(&direction_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown message direction `{direction_raw}`"))
    })?;

    let content_type_raw = row.try_get::<String, _>("content_type")?;
    let content_type = ContentType::parse(&content_type_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown content type `{content_type_raw}`"))
    })?;

    Ok(Message {
        id: MessageId(row.try_get("id")?),
        lead_id: LeadId(row.try_get("lead_id")?),
        conversation_id: row.try_get::<Option<String>, _>("conversation_id")?.map(ConversationId),
        direction,
        content: row.try_get("content")?,
        content_type,
        received_at: parse_timestamp("received_at", row.try_get("received_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
