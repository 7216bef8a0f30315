use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Funnel stage of a conversation. Movement is forward-only; the single
/// sanctioned backward edge is the reset command, which returns the thread
/// to `InitialContact`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStage {
    InitialContact,
    Identification,
    Discovery,
    Qualification,
    Scheduling,
    Qualified,
    MeetingConfirmed,
    NotInterested,
}

impl ConversationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialContact => "initial_contact",
            Self::Identification => "identification",
            Self::Discovery => "discovery",
            Self::Qualification => "qualification",
            Self::Scheduling => "scheduling",
            Self::Qualified => "qualified",
            Self::MeetingConfirmed => "meeting_confirmed",
            Self::NotInterested => "not_interested",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "initial_contact" => Some(Self::InitialContact),
            "identification" => Some(Self::Identification),
            "discovery" => Some(Self::Discovery),
            "qualification" => Some(Self::Qualification),
            "scheduling" => Some(Self::Scheduling),
            "qualified" => Some(Self::Qualified),
            "meeting_confirmed" => Some(Self::MeetingConfirmed),
            "not_interested" => Some(Self::NotInterested),
            _ => None,
        }
    }

    /// Position in the funnel. Every transition except reset must strictly
    /// increase this value.
    pub fn funnel_order(&self) -> u8 {
        match self {
            Self::InitialContact => 0,
            Self::Identification => 1,
            Self::Discovery => 2,
            Self::Qualification => 3,
            Self::Scheduling => 4,
            Self::Qualified => 5,
            Self::MeetingConfirmed => 6,
            Self::NotInterested => 7,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MeetingConfirmed | Self::NotInterested)
    }

    /// Whether inactivity nudges still make sense at this stage.
    pub fn accepts_reengagement(&self) -> bool {
        !self.is_terminal()
    }
}

/// Enumerated triggers the stage machine consumes. Free-text understanding
/// lives in the reply composer; by the time a signal reaches the machine it
/// is one of these.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationSignal {
    Greeted,
    IdentityProvided,
    NeedsDescribed,
    SchedulingRequested,
    MeetingBooked { start: DateTime<Utc>, end: DateTime<Utc> },
    DisinterestExpressed,
    GateQualified,
    GateDisqualified,
    ResetRequested,
}

/// Side effects a transition asks the pipeline to perform. The machine
/// stays pure; executing these is the caller's job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementAction {
    CheckAvailability,
    ScheduleMeetingReminders { start: DateTime<Utc> },
    CancelReengagement,
    CancelAllFollowUps,
    ClearConversation,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: ConversationStage,
    pub to: ConversationStage,
    pub signal: ConversationSignal,
    pub actions: Vec<EngagementAction>,
}

#[cfg(test)]
mod tests {
    use super::ConversationStage;

    #[test]
    fn stage_round_trips_from_storage_encoding() {
        let cases = [
            ConversationStage::InitialContact,
            ConversationStage::Identification,
            ConversationStage::Discovery,
            ConversationStage::Qualification,
            ConversationStage::Scheduling,
            ConversationStage::Qualified,
            ConversationStage::MeetingConfirmed,
            ConversationStage::NotInterested,
        ];

        for stage in cases {
            assert_eq!(ConversationStage::parse(stage.as_str()), Some(stage));
        }
    }

    #[test]
    fn funnel_orders_are_distinct() {
        let stages = [
            ConversationStage::InitialContact,
            ConversationStage::Identification,
            ConversationStage::Discovery,
            ConversationStage::Qualification,
            ConversationStage::Scheduling,
            ConversationStage::Qualified,
            ConversationStage::MeetingConfirmed,
            ConversationStage::NotInterested,
        ];

        let mut orders: Vec<u8> = stages.iter().map(ConversationStage::funnel_order).collect();
        orders.sort_unstable();
        orders.dedup();
        assert_eq!(orders.len(), stages.len());
    }

    #[test]
    fn terminal_stages_do_not_accept_reengagement() {
        assert!(!ConversationStage::MeetingConfirmed.accepts_reengagement());
        assert!(!ConversationStage::NotInterested.accepts_reengagement());
        assert!(ConversationStage::Qualified.accepts_reengagement());
    }
}
