use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use nurture_core::domain::calendar::{CalendarEvent, CalendarEventId, ReminderSlot};
use nurture_core::domain::conversation::{Conversation, ConversationId};
use nurture_core::domain::lead::{Lead, LeadId, QualificationFlags};
use nurture_core::domain::message::{Message, MessageId};
use nurture_core::domain::mirror::{ExternalStage, StageMirrorRecord};
use nurture_core::domain::task::{FollowUpTask, FollowUpTaskId, TaskType};
use nurture_core::flows::ConversationStage;
use nurture_core::qualification::QualificationStatus;

pub mod calendar;
pub mod conversation;
pub mod follow_up;
pub mod lead;
pub mod message;
pub mod mirror;

pub use calendar::SqlCalendarRepository;
pub use conversation::SqlConversationRepository;
pub use follow_up::SqlFollowUpRepository;
pub use lead::SqlLeadRepository;
pub use message::SqlMessageRepository;
pub use mirror::SqlMirrorRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    /// Atomic insert-or-return keyed by the channel identity. Concurrent
    /// callers racing on the same `external_id` all land on the same row.
    async fn resolve_or_create(
        &self,
        external_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Lead, RepositoryError>;

    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError>;

    async fn find_by_external_id(&self, external_id: &str)
        -> Result<Option<Lead>, RepositoryError>;

    async fn find_by_crm_ref(&self, crm_ref: &str) -> Result<Option<Lead>, RepositoryError>;

    /// Persists extracted facts alongside the gate verdict derived from them.
    /// `display_name` only overwrites when present.
    async fn update_profile(
        &self,
        id: &LeadId,
        display_name: Option<&str>,
        flags: &QualificationFlags,
        qualification: QualificationStatus,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn set_crm_ref(
        &self,
        id: &LeadId,
        crm_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn set_human_pause(
        &self,
        id: &LeadId,
        pause_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn set_human_attended(
        &self,
        id: &LeadId,
        attended: bool,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Clears collected facts and drops the gate verdict back to pending.
    async fn reset_engagement(&self, id: &LeadId, now: DateTime<Utc>)
        -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Returns the lead's active thread, creating one at the opening stage
    /// when none exists. Concurrent callers converge on the same row.
    async fn get_or_create_active(
        &self,
        lead_id: &LeadId,
        now: DateTime<Utc>,
    ) -> Result<Conversation, RepositoryError>;

    async fn find_active(&self, lead_id: &LeadId) -> Result<Option<Conversation>, RepositoryError>;

    async fn find_by_id(&self, id: &ConversationId)
        -> Result<Option<Conversation>, RepositoryError>;

    async fn update_stage(
        &self,
        id: &ConversationId,
        stage: ConversationStage,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn update_sentiment(
        &self,
        id: &ConversationId,
        sentiment: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn record_inbound_batch(
        &self,
        id: &ConversationId,
        message_count: u32,
        last_message_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn record_outbound(
        &self,
        id: &ConversationId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Ends the active thread, if any. Returns the number of rows closed.
    async fn end_active(&self, lead_id: &LeadId, now: DateTime<Utc>)
        -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Persists an inbound message keyed by its channel delivery id.
    /// Returns `false` when that id was already recorded (redelivery).
    async fn record_inbound(&self, message: &Message) -> Result<bool, RepositoryError>;

    async fn record_outbound(&self, message: &Message) -> Result<(), RepositoryError>;

    async fn attach_to_conversation(
        &self,
        ids: &[MessageId],
        conversation_id: &ConversationId,
    ) -> Result<(), RepositoryError>;

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError>;
}

#[async_trait]
pub trait FollowUpRepository: Send + Sync {
    /// Inserts the task unless a pending row for its (lead, type) pair already
    /// exists, in which case the existing row comes back untouched.
    async fn schedule(&self, task: FollowUpTask) -> Result<FollowUpTask, RepositoryError>;

    /// Cancels pending rows of the listed types for the lead. Rows already
    /// claimed by a worker are left alone. Returns the number cancelled.
    async fn cancel_pending(
        &self,
        lead_id: &LeadId,
        task_types: &[TaskType],
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    /// Pending tasks whose time has come, highest priority first and oldest
    /// first within a priority.
    async fn due_tasks(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<FollowUpTask>, RepositoryError>;

    /// Conditional pending -> executing claim. Returns `false` when another
    /// worker (or a cancellation) got there first.
    async fn try_begin_execution(
        &self,
        id: &FollowUpTaskId,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn mark_executed(
        &self,
        id: &FollowUpTaskId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Returns the task to pending with a later due time after a transient
    /// execution failure.
    async fn mark_retry(
        &self,
        id: &FollowUpTaskId,
        next_retry_at: DateTime<Utc>,
        error_reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn mark_failed(
        &self,
        id: &FollowUpTaskId,
        error_reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Frees tasks stuck in executing since before `cutoff`, e.g. after a
    /// worker crash. Returns the number reclaimed.
    async fn reclaim_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;

    async fn find_by_id(&self, id: &FollowUpTaskId)
        -> Result<Option<FollowUpTask>, RepositoryError>;
}

#[async_trait]
pub trait CalendarRepository: Send + Sync {
    async fn save_event(&self, event: &CalendarEvent) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &CalendarEventId)
        -> Result<Option<CalendarEvent>, RepositoryError>;

    /// The lead's most recently created meeting, if any.
    async fn latest_for_lead(&self, lead_id: &LeadId)
        -> Result<Option<CalendarEvent>, RepositoryError>;

    /// Flips the reminder-sent flag for the slot. Returns `false` when the
    /// flag was already set, so a reminder goes out at most once.
    async fn try_mark_reminder_sent(
        &self,
        id: &CalendarEventId,
        slot: ReminderSlot,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait MirrorRepository: Send + Sync {
    /// Registers the lead's current stage pair as needing a push, resetting
    /// any retry bookkeeping from a previous stage.
    async fn upsert_pending(
        &self,
        lead_id: &LeadId,
        internal_stage: ConversationStage,
        external_stage: ExternalStage,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn mark_synced(&self, lead_id: &LeadId, now: DateTime<Utc>)
        -> Result<(), RepositoryError>;

    async fn mark_retry(
        &self,
        lead_id: &LeadId,
        attempts: u32,
        error: &str,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn mark_failed(
        &self,
        lead_id: &LeadId,
        attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn find_for_lead(
        &self,
        lead_id: &LeadId,
    ) -> Result<Option<StageMirrorRecord>, RepositoryError>;

    /// Pending records whose retry time has passed (or was never set).
    async fn due_pending(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StageMirrorRecord>, RepositoryError>;
}
