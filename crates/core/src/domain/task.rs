use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::lead::LeadId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FollowUpTaskId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "reengagement_30m")]
    Reengagement30m,
    #[serde(rename = "reengagement_24h")]
    Reengagement24h,
    #[serde(rename = "meeting_reminder_24h")]
    MeetingReminder24h,
    #[serde(rename = "meeting_reminder_2h")]
    MeetingReminder2h,
    #[serde(rename = "custom")]
    Custom,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reengagement30m => "reengagement_30m",
            Self::Reengagement24h => "reengagement_24h",
            Self::MeetingReminder24h => "meeting_reminder_24h",
            Self::MeetingReminder2h => "meeting_reminder_2h",
            Self::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reengagement_30m" => Some(Self::Reengagement30m),
            "reengagement_24h" => Some(Self::Reengagement24h),
            "meeting_reminder_24h" => Some(Self::MeetingReminder24h),
            "meeting_reminder_2h" => Some(Self::MeetingReminder2h),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Inbound activity cancels reengagement nudges but must leave meeting
    /// reminders standing; the two families are separate cancellation
    /// domains.
    pub fn is_reengagement(&self) -> bool {
        matches!(self, Self::Reengagement30m | Self::Reengagement24h)
    }

    pub fn is_meeting_reminder(&self) -> bool {
        matches!(self, Self::MeetingReminder24h | Self::MeetingReminder2h)
    }

    /// Higher runs first when several tasks are due in the same tick.
    pub fn default_priority(&self) -> u32 {
        match self {
            Self::MeetingReminder2h => 100,
            Self::MeetingReminder24h => 90,
            Self::Reengagement30m => 50,
            Self::Reengagement24h => 40,
            Self::Custom => 10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Executing,
    Executed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "executing" => Some(Self::Executing),
            "executed" => Some(Self::Executed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUpTask {
    pub id: FollowUpTaskId,
    pub lead_id: LeadId,
    pub task_type: TaskType,
    pub scheduled_at: DateTime<Utc>,
    pub priority: u32,
    pub status: TaskStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_reason: Option<String>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
