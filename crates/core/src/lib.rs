pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod followup;
pub mod qualification;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::calendar::{CalendarEvent, CalendarEventId, ReminderSlot, TimeWindow};
pub use domain::conversation::{Conversation, ConversationId};
pub use domain::lead::{Lead, LeadId, QualificationFlags};
pub use domain::message::{ContentType, Message, MessageDirection, MessageId};
pub use domain::mirror::{external_stage, ExternalStage, MirrorSyncStatus, StageMirrorRecord};
pub use domain::task::{FollowUpTask, FollowUpTaskId, TaskStatus, TaskType};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{
    initial_stage, transition, ConversationSignal, ConversationStage, EngagementAction,
    StageTransition, StageTransitionError,
};
pub use followup::{
    meeting_reminders, reengagement_long, reengagement_short, validate_status_transition,
    BackoffPolicy, RetryDecision,
};
pub use qualification::{evaluate, parse_bill_value, QualificationStatus};
