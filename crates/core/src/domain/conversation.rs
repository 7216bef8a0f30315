use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::lead::LeadId;
use crate::flows::ConversationStage;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

/// One engagement thread with a lead. At most one conversation per lead is
/// active at a time; a reset ends the active thread and the next inbound
/// message starts a fresh one at the initial stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub lead_id: LeadId,
    pub stage: ConversationStage,
    /// Opaque sentiment tag reported by the reply composer.
    pub sentiment: Option<String>,
    pub active: bool,
    pub inbound_count: u32,
    pub outbound_count: u32,
    pub started_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
