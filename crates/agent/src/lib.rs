//! Conversational Agent - language understanding and reply composition
//!
//! This crate is the language boundary of the nurture system - everything
//! that turns free text into structured engagement data lives here:
//! - Extracts qualification facts and funnel cues from debounced batches
//! - Maps cues to the enumerated signals the stage machine consumes
//! - Composes the outbound reply for the conversation's current stage
//!
//! # Architecture
//!
//! Composition is a single constrained pass over one debounced batch:
//! 1. **Cue Extraction** (`signals`) - Parse text → `MessageCues` + `FactUpdates`
//! 2. **Signal Mapping** (`composer`) - Cues → `ConversationSignal`s in funnel order
//! 3. **Reply Selection** (`composer`) - Stage + collected facts → outbound text
//!
//! # Key Types
//!
//! - `SignalExtractor` - Deterministic keyword extraction (see `signals`)
//! - `ReplyComposer` - Pluggable trait for rule-based or LLM-backed composers
//! - `ComposedReply` - Outbound text plus the facts and signals behind it
//!
//! # Safety Principle
//!
//! The composer is strictly a translator. It NEVER decides stage movement,
//! qualification verdicts, or follow-up timing. Those are deterministic
//! decisions made by the engagement core.

pub mod composer;
pub mod signals;
