use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::lead::LeadId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalendarEventId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: CalendarEventId,
    pub lead_id: LeadId,
    /// Identifier assigned by the external calendar, absent when event
    /// creation failed and the booking is tracked locally only.
    pub external_ref: Option<String>,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Once set these flags never go back to false; the check-and-set on
    /// them is what makes reminder sends idempotent.
    pub reminder_24h_sent: bool,
    pub reminder_2h_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which of the two reminder flags a send accounts against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReminderSlot {
    DayBefore,
    TwoHoursBefore,
}

/// A free slot offered to a lead during scheduling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}
