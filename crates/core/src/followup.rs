use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::lead::LeadId;
use crate::domain::task::{FollowUpTask, FollowUpTaskId, TaskStatus, TaskType};

pub const REENGAGEMENT_SHORT_DELAY_MINUTES: i64 = 30;
pub const REENGAGEMENT_LONG_DELAY_HOURS: i64 = 24;
pub const MEETING_REMINDER_LONG_OFFSET_HOURS: i64 = 24;
pub const MEETING_REMINDER_SHORT_OFFSET_HOURS: i64 = 2;

/// Retry schedule for failing task executions: exponential delay growth
/// from `base_delay_secs`, capped at `max_delay_secs`, for at most
/// `max_attempts` attempts overall.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_delay_secs: i64,
    pub multiplier: u32,
    pub max_delay_secs: i64,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base_delay_secs: 60, multiplier: 2, max_delay_secs: 3600, max_attempts: 3 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay_secs: i64 },
    GiveUp,
}

impl BackoffPolicy {
    /// Delay before the next attempt, given how many attempts have already
    /// run. The first retry waits the base delay; each further retry
    /// multiplies it, capped at the maximum.
    pub fn delay_for(&self, attempts_made: u32) -> i64 {
        let exponent = attempts_made.saturating_sub(1).min(16);
        let factor = i64::from(self.multiplier).saturating_pow(exponent);
        self.base_delay_secs.saturating_mul(factor).min(self.max_delay_secs)
    }

    pub fn decide(&self, attempts_made: u32) -> RetryDecision {
        if attempts_made >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry { delay_secs: self.delay_for(attempts_made) }
    }

    pub fn next_retry_at(&self, attempts_made: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.delay_for(attempts_made))
    }
}

/// Inactivity nudge half an hour after the last exchange.
pub fn reengagement_short(lead_id: &LeadId, now: DateTime<Utc>, max_attempts: u32) -> FollowUpTask {
    new_task(
        lead_id,
        TaskType::Reengagement30m,
        now + Duration::minutes(REENGAGEMENT_SHORT_DELAY_MINUTES),
        now,
        max_attempts,
    )
}

/// Escalation nudge a day after the short one ran without a reply.
pub fn reengagement_long(lead_id: &LeadId, now: DateTime<Utc>, max_attempts: u32) -> FollowUpTask {
    new_task(
        lead_id,
        TaskType::Reengagement24h,
        now + Duration::hours(REENGAGEMENT_LONG_DELAY_HOURS),
        now,
        max_attempts,
    )
}

/// Reminders at fixed offsets before the meeting. A reminder whose send
/// time is already in the past is not planned at all.
pub fn meeting_reminders(
    lead_id: &LeadId,
    meeting_start: DateTime<Utc>,
    now: DateTime<Utc>,
    max_attempts: u32,
) -> Vec<FollowUpTask> {
    let offsets = [
        (TaskType::MeetingReminder24h, Duration::hours(MEETING_REMINDER_LONG_OFFSET_HOURS)),
        (TaskType::MeetingReminder2h, Duration::hours(MEETING_REMINDER_SHORT_OFFSET_HOURS)),
    ];

    offsets
        .into_iter()
        .filter_map(|(task_type, offset)| {
            let run_at = meeting_start - offset;
            (run_at > now).then(|| new_task(lead_id, task_type, run_at, now, max_attempts))
        })
        .collect()
}

fn new_task(
    lead_id: &LeadId,
    task_type: TaskType,
    scheduled_at: DateTime<Utc>,
    now: DateTime<Utc>,
    max_attempts: u32,
) -> FollowUpTask {
    FollowUpTask {
        id: FollowUpTaskId(Uuid::new_v4().to_string()),
        lead_id: lead_id.clone(),
        task_type,
        scheduled_at,
        priority: task_type.default_priority(),
        status: TaskStatus::Pending,
        attempt_count: 0,
        max_attempts,
        last_attempt_at: None,
        next_retry_at: None,
        error_reason: None,
        claimed_by: None,
        claimed_at: None,
        created_at: now,
        updated_at: now,
    }
}

/// Legal task status moves. Storage enforces these with conditional
/// updates; this table is the reference the repository tests check
/// against. Same-state is allowed so redelivered outcomes stay idempotent.
pub fn validate_status_transition(from: TaskStatus, to: TaskStatus) -> bool {
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (TaskStatus::Pending, TaskStatus::Executing)
            | (TaskStatus::Pending, TaskStatus::Cancelled)
            | (TaskStatus::Executing, TaskStatus::Executed)
            | (TaskStatus::Executing, TaskStatus::Pending)
            | (TaskStatus::Executing, TaskStatus::Failed)
    )
}
