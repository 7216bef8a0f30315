pub mod engine;
pub mod stages;

pub use engine::{initial_stage, transition, StageTransitionError};
pub use stages::{ConversationSignal, ConversationStage, EngagementAction, StageTransition};
