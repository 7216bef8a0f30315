use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::lead::LeadId;
use crate::flows::ConversationStage;

/// Stages of the external CRM pipeline. Closed on purpose: an internal
/// stage without a mapping is a compile error, and inbound values outside
/// this set are refused instead of defaulted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalStage {
    NewLead,
    Identifying,
    Discovery,
    Qualifying,
    Scheduling,
    MeetingScheduled,
    Qualified,
    NotInterested,
}

impl ExternalStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewLead => "new_lead",
            Self::Identifying => "identifying",
            Self::Discovery => "discovery",
            Self::Qualifying => "qualifying",
            Self::Scheduling => "scheduling",
            Self::MeetingScheduled => "meeting_scheduled",
            Self::Qualified => "qualified",
            Self::NotInterested => "not_interested",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new_lead" => Some(Self::NewLead),
            "identifying" => Some(Self::Identifying),
            "discovery" => Some(Self::Discovery),
            "qualifying" => Some(Self::Qualifying),
            "scheduling" => Some(Self::Scheduling),
            "meeting_scheduled" => Some(Self::MeetingScheduled),
            "qualified" => Some(Self::Qualified),
            "not_interested" => Some(Self::NotInterested),
            _ => None,
        }
    }
}

/// Internal stage to CRM pipeline stage. The internal side is
/// authoritative; this table is the only place the two vocabularies meet.
pub fn external_stage(stage: ConversationStage) -> ExternalStage {
    match stage {
        ConversationStage::InitialContact => ExternalStage::NewLead,
        ConversationStage::Identification => ExternalStage::Identifying,
        ConversationStage::Discovery => ExternalStage::Discovery,
        ConversationStage::Qualification => ExternalStage::Qualifying,
        ConversationStage::Scheduling => ExternalStage::Scheduling,
        ConversationStage::MeetingConfirmed => ExternalStage::MeetingScheduled,
        ConversationStage::Qualified => ExternalStage::Qualified,
        ConversationStage::NotInterested => ExternalStage::NotInterested,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorSyncStatus {
    Pending,
    Synced,
    Failed,
}

impl MirrorSyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "synced" => Some(Self::Synced),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Bookkeeping row for the outbound stage mirror, one per lead. Tracks the
/// latest stage pushed (or owed) to the CRM and the retry state when the
/// push is failing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMirrorRecord {
    pub lead_id: LeadId,
    pub internal_stage: ConversationStage,
    pub external_stage: ExternalStage,
    pub status: MirrorSyncStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
