use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nurture_core::{
    evaluate, ConversationSignal, ConversationStage, QualificationFlags, QualificationStatus,
    TimeWindow,
};
use rust_decimal::Decimal;

use crate::signals::{FactUpdates, MessageCues, SignalExtractor};

/// Everything the composer may look at for one debounced batch.
#[derive(Clone, Debug)]
pub struct ComposeContext {
    pub stage: ConversationStage,
    pub display_name: Option<String>,
    pub flags: QualificationFlags,
    /// Verdict stored from the previous flush, before this batch's answers.
    pub qualification: QualificationStatus,
    pub min_bill_value: Decimal,
    /// Inbound texts of the batch, in arrival order.
    pub messages: Vec<String>,
    /// Open slots the pipeline fetched ahead of composing. Populated while
    /// the conversation sits in a scheduling stage; `None` elsewhere.
    pub availability: Option<Vec<TimeWindow>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposedReply {
    pub text: String,
    pub facts: FactUpdates,
    /// Candidate signals in funnel order. The caller feeds them through the
    /// stage machine one at a time and drops whichever come back as invalid
    /// for the current stage.
    pub signals: Vec<ConversationSignal>,
    pub sentiment: Option<String>,
}

/// Turns one batch of inbound text into a reply. Implementations translate
/// language; they never move stages, issue verdicts, or schedule work.
#[async_trait]
pub trait ReplyComposer: Send + Sync {
    async fn compose(&self, context: &ComposeContext) -> Result<ComposedReply>;
}

/// Deterministic composer used when no language model is wired in. It runs
/// the keyword extractor over the batch and answers with stage-appropriate
/// canned text. An LLM-backed implementation slots in behind the same trait
/// without touching the pipeline.
#[derive(Clone, Debug, Default)]
pub struct RuleBasedComposer {
    extractor: SignalExtractor,
}

impl RuleBasedComposer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReplyComposer for RuleBasedComposer {
    async fn compose(&self, context: &ComposeContext) -> Result<ComposedReply> {
        let joined = context.messages.join("\n");
        let cues = self.extractor.extract(&joined);
        let facts = FactUpdates::from_cues(&cues);
        let signals = funnel_signals(context, &cues);
        let text = reply_text(context, &cues, &signals);
        let sentiment = Some(sentiment_label(&cues).to_string());

        Ok(ComposedReply { text, facts, signals, sentiment })
    }
}

/// Formats open slots as the numbered list the extractor's window picks
/// refer back to. Public because the pipeline also appends it when an
/// availability check lands after the text was composed.
pub fn offer_windows(windows: &[TimeWindow]) -> String {
    let mut lines = vec!["Here are the times I have open:".to_string()];
    for (index, window) in windows.iter().take(3).enumerate() {
        lines.push(format!("{}) {}", index + 1, format_slot(&window.start)));
    }
    lines.push("Reply with the number that suits you.".to_string());
    lines.join("\n")
}

fn funnel_signals(context: &ComposeContext, cues: &MessageCues) -> Vec<ConversationSignal> {
    if cues.interest == Some(false) {
        return vec![ConversationSignal::DisinterestExpressed];
    }

    let mut signals = Vec::new();
    if context.stage == ConversationStage::InitialContact {
        // Any opener counts as a greeting; leads who skip the pleasantries
        // still enter the funnel.
        signals.push(ConversationSignal::Greeted);
    }
    if cues.stated_name.is_some()
        || (context.stage == ConversationStage::Identification && context.display_name.is_some())
    {
        signals.push(ConversationSignal::IdentityProvided);
    }
    if cues.needs_described {
        signals.push(ConversationSignal::NeedsDescribed);
    }
    if cues.scheduling_request {
        signals.push(ConversationSignal::SchedulingRequested);
    }
    if let Some(window) = chosen_window(context, cues) {
        signals.push(ConversationSignal::MeetingBooked { start: window.start, end: window.end });
    }
    signals
}

fn chosen_window<'a>(context: &'a ComposeContext, cues: &MessageCues) -> Option<&'a TimeWindow> {
    let windows = context.availability.as_deref()?;
    if windows.is_empty() {
        return None;
    }
    if let Some(choice) = cues.window_choice {
        return windows.get(choice).or_else(|| windows.first());
    }
    if cues.affirmation {
        return windows.first();
    }
    None
}

fn reply_text(context: &ComposeContext, cues: &MessageCues, signals: &[ConversationSignal]) -> String {
    if cues.interest == Some(false) {
        return "No problem, I will stop here. If anything changes, just send me a message."
            .to_string();
    }

    if let Some(start) = booked_start(signals) {
        return format!(
            "Perfect{}, you are booked for {}. I will remind you the day before and again two hours ahead.",
            name_suffix(context, cues),
            format_slot(&start),
        );
    }

    if let Some(windows) = context.availability.as_deref() {
        if windows.is_empty() {
            return "I could not find an open slot right now. I will check with the team and get back to you."
                .to_string();
        }
        return offer_windows(windows);
    }

    if context.display_name.is_none() && cues.stated_name.is_none() {
        return if context.stage == ConversationStage::InitialContact {
            "Hi! I help people cut their energy bill with solar. Who do I have the pleasure of talking to?"
                .to_string()
        } else {
            "Before we go on, what is your name?".to_string()
        };
    }

    let mut flags = context.flags.clone();
    FactUpdates::from_cues(cues).apply_to(&mut flags);

    match evaluate(&flags, context.min_bill_value) {
        QualificationStatus::NotQualified => {
            "Thanks for the details! It does not look like a fit on our side right now, but I appreciate your time."
                .to_string()
        }
        QualificationStatus::Qualified => format!(
            "Great news{}: everything checks out on my side. Shall we book a quick call to go over your numbers?",
            name_suffix(context, cues),
        ),
        QualificationStatus::Pending => {
            format!("{}{}", acknowledgement(cues), next_question(&flags))
        }
    }
}

/// First unanswered gate question, in the order the gate checks them.
fn next_question(flags: &QualificationFlags) -> &'static str {
    if flags.bill_value.is_none() {
        return "Roughly how much is your monthly energy bill?";
    }
    if flags.is_decision_maker.is_none() {
        return "Are you the one who decides on energy matters at your place?";
    }
    // Mirrors the gate's settle rule for the system pair: either answer can
    // close the question, so only ask for the half that still matters.
    let open_to_new = match (flags.has_existing_system, flags.wants_new_system) {
        (_, Some(true)) => Some(true),
        (Some(false), _) => Some(true),
        (Some(true), Some(false)) => Some(false),
        _ => None,
    };
    if open_to_new.is_none() {
        return if flags.has_existing_system.is_none() {
            "Do you already have a solar system installed today?"
        } else {
            "Would you like to replace or expand the system you have?"
        };
    }
    if flags.has_active_competing_contract.is_none() {
        return "Are you tied to a contract with another energy provider at the moment?";
    }
    "Would you like to move ahead with a free savings estimate?"
}

fn acknowledgement(cues: &MessageCues) -> String {
    if let Some(name) = cues.stated_name.as_deref() {
        let first = name.split_whitespace().next().unwrap_or(name);
        return format!("Nice to meet you, {first}! ");
    }
    if !FactUpdates::from_cues(cues).is_empty() {
        return "Got it. ".to_string();
    }
    String::new()
}

fn name_suffix(context: &ComposeContext, cues: &MessageCues) -> String {
    match first_name(context, cues) {
        Some(name) => format!(", {name}"),
        None => String::new(),
    }
}

fn first_name<'a>(context: &'a ComposeContext, cues: &'a MessageCues) -> Option<&'a str> {
    cues.stated_name
        .as_deref()
        .or(context.display_name.as_deref())
        .and_then(|name| name.split_whitespace().next())
}

fn booked_start(signals: &[ConversationSignal]) -> Option<DateTime<Utc>> {
    signals.iter().find_map(|signal| match signal {
        ConversationSignal::MeetingBooked { start, .. } => Some(*start),
        _ => None,
    })
}

fn format_slot(start: &DateTime<Utc>) -> String {
    start.format("%A, %B %-d at %H:%M UTC").to_string()
}

fn sentiment_label(cues: &MessageCues) -> &'static str {
    match cues.interest {
        Some(false) => "negative",
        Some(true) => "positive",
        None if cues.affirmation => "positive",
        None => "neutral",
    }
}
