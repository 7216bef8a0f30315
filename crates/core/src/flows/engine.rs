use thiserror::Error;

use super::stages::{ConversationSignal, ConversationStage, EngagementAction, StageTransition};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StageTransitionError {
    #[error("signal {signal:?} does not apply in stage {stage:?}")]
    InvalidTransition { stage: ConversationStage, signal: ConversationSignal },
}

pub fn initial_stage() -> ConversationStage {
    ConversationStage::InitialContact
}

/// Applies one signal to the current stage. Pure: same inputs, same
/// outcome, no side effects. Callers execute the returned actions and
/// persist the new stage; on `InvalidTransition` the conversation stays
/// where it is.
pub fn transition(
    current: ConversationStage,
    signal: ConversationSignal,
) -> Result<StageTransition, StageTransitionError> {
    use ConversationSignal as Signal;
    use ConversationStage as Stage;
    use EngagementAction as Action;

    let (to, actions) = match (current, &signal) {
        (Stage::InitialContact, Signal::Greeted) => (Stage::Identification, vec![]),
        (Stage::Identification, Signal::IdentityProvided) => (Stage::Discovery, vec![]),
        (Stage::Discovery, Signal::NeedsDescribed) => (Stage::Qualification, vec![]),
        (Stage::Qualification, Signal::SchedulingRequested) => {
            (Stage::Scheduling, vec![Action::CheckAvailability])
        }
        (Stage::Qualification | Stage::Scheduling, Signal::GateQualified) => {
            (Stage::Qualified, vec![])
        }
        (Stage::Qualification | Stage::Scheduling, Signal::GateDisqualified) => {
            (Stage::NotInterested, vec![Action::CancelReengagement])
        }
        (Stage::Scheduling | Stage::Qualified, Signal::MeetingBooked { start, .. }) => (
            Stage::MeetingConfirmed,
            vec![Action::ScheduleMeetingReminders { start: *start }, Action::CancelReengagement],
        ),
        (stage, Signal::DisinterestExpressed) if !stage.is_terminal() => {
            (Stage::NotInterested, vec![Action::CancelReengagement])
        }
        (_, Signal::ResetRequested) => {
            (Stage::InitialContact, vec![Action::CancelAllFollowUps, Action::ClearConversation])
        }
        _ => return Err(StageTransitionError::InvalidTransition { stage: current, signal }),
    };

    Ok(StageTransition { from: current, to, signal, actions })
}
