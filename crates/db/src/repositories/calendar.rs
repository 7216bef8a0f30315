use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use nurture_core::domain::calendar::{CalendarEvent, CalendarEventId, ReminderSlot};
use nurture_core::domain::lead::LeadId;

use super::{CalendarRepository, RepositoryError};
use crate::DbPool;

const EVENT_COLUMNS: &str = "id,
                lead_id,
                external_ref,
                title,
                start_time,
                end_time,
                reminder_24h_sent,
                reminder_2h_sent,
                created_at,
                updated_at";

pub struct SqlCalendarRepository {
    pool: DbPool,
}

impl SqlCalendarRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CalendarRepository for SqlCalendarRepository {
    async fn save_event(&self, event: &CalendarEvent) -> Result<(), RepositoryError> {
        // Reminder flags move only through the check-and-set below; a rebook
        // of the same event must not resurrect an already-sent reminder.
        sqlx::query(
            "INSERT INTO calendar_events (
                id, lead_id, external_ref, title, start_time, end_time,
                reminder_24h_sent, reminder_2h_sent, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                external_ref = excluded.external_ref,
                title = excluded.title,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                updated_at = excluded.updated_at",
        )
        .bind(&event.id.0)
        .bind(&event.lead_id.0)
        .bind(event.external_ref.as_deref())
        .bind(&event.title)
        .bind(event.start_time.to_rfc3339())
        .bind(event.end_time.to_rfc3339())
        .bind(event.reminder_24h_sent)
        .bind(event.reminder_2h_sent)
        .bind(event.created_at.to_rfc3339())
        .bind(event.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &CalendarEventId,
    ) -> Result<Option<CalendarEvent>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM calendar_events WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(event_from_row).transpose()
    }

    async fn latest_for_lead(
        &self,
        lead_id: &LeadId,
    ) -> Result<Option<CalendarEvent>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS}
             FROM calendar_events
             WHERE lead_id = ?
             ORDER BY datetime(created_at) DESC, rowid DESC
             LIMIT 1"
        ))
        .bind(&lead_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(event_from_row).transpose()
    }

    async fn try_mark_reminder_sent(
        &self,
        id: &CalendarEventId,
        slot: ReminderSlot,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let column = match slot {
            ReminderSlot::DayBefore => "reminder_24h_sent",
            ReminderSlot::TwoHoursBefore => "reminder_2h_sent",
        };

        let statement = format!(
            "UPDATE calendar_events SET {column} = 1, updated_at = ?
             WHERE id = ? AND {column} = 0"
        );
        let result = sqlx::query(&statement)
            .bind(now.to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn event_from_row(row: SqliteRow) -> Result<CalendarEvent, RepositoryError> {
    Ok(CalendarEvent {
        id: CalendarEventId(row.try_get("id")?),
        lead_id: LeadId(row.try_get("lead_id")?),
        external_ref: row.try_get("external_ref")?,
        title: row.try_get("title")?,
        start_time: parse_timestamp("start_time", row.try_get("start_time")?)?,
        end_time: parse_timestamp("end_time", row.try_get("end_time")?)?,
        reminder_24h_sent: row.try_get("reminder_24h_sent")?,
        reminder_2h_sent: row.try_get("reminder_2h_sent")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
