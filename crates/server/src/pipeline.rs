//! The engagement pipeline. Ingress persists and dedups every inbound
//! message, then buffers it behind the debounce window; the flush side
//! runs one lead at a time under the single-flight claim: reset check,
//! suppression check, compose, stage machine, side effects, reply.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use nurture_agent::composer::{offer_windows, ComposeContext, ReplyComposer};
use nurture_channel::debounce::{
    BatchFlushHandler, FlushDisposition, FlushError, MessageDebouncer,
};
use nurture_channel::events::{
    is_reset_command, InboundMessage, IngressError, IngressHandler, IngressOutcome, MessageSender,
};
use nurture_channel::single_flight::{FlightDecision, SingleFlight};
use nurture_core::{
    evaluate, meeting_reminders, reengagement_short, transition, CalendarEvent, CalendarEventId,
    ContentType, ConversationId, ConversationSignal, ConversationStage, EngagementAction, Lead,
    Message, MessageDirection, MessageId, QualificationStatus, StageTransition,
    StageTransitionError, TaskType, TimeWindow,
};
use nurture_db::repositories::{
    CalendarRepository, ConversationRepository, FollowUpRepository, LeadRepository,
    MessageRepository, RepositoryError,
};

use crate::gateways::CalendarGateway;
use crate::mirror::StageMirror;

const ALL_TASK_TYPES: [TaskType; 5] = [
    TaskType::Reengagement30m,
    TaskType::Reengagement24h,
    TaskType::MeetingReminder24h,
    TaskType::MeetingReminder2h,
    TaskType::Custom,
];

const REENGAGEMENT_TYPES: [TaskType; 2] =
    [TaskType::Reengagement30m, TaskType::Reengagement24h];

const RESET_CONFIRMATION: &str =
    "All clear! I wiped our conversation history. Say hi whenever you want to start over.";

const MEETING_FALLBACK_MINUTES: i64 = 30;

/// Transport-facing half of the pipeline: persists and dedups inbound
/// messages, then hands them to the debouncer.
pub struct ChannelIngress {
    leads: Arc<dyn LeadRepository>,
    messages: Arc<dyn MessageRepository>,
    debouncer: MessageDebouncer,
    reset_command: String,
}

impl ChannelIngress {
    pub fn new(
        leads: Arc<dyn LeadRepository>,
        messages: Arc<dyn MessageRepository>,
        debouncer: MessageDebouncer,
        reset_command: String,
    ) -> Self {
        Self { leads, messages, debouncer, reset_command }
    }
}

#[async_trait]
impl IngressHandler for ChannelIngress {
    async fn accept(&self, message: InboundMessage) -> Result<IngressOutcome, IngressError> {
        let now = Utc::now();
        let lead = self
            .leads
            .resolve_or_create(&message.external_id, now)
            .await
            .map_err(processing_error)?;

        let record = Message {
            id: message.message_id.clone(),
            lead_id: lead.id.clone(),
            conversation_id: None,
            direction: MessageDirection::Inbound,
            content: message.content.clone(),
            content_type: message.content_type.clone(),
            received_at: message.received_at,
            created_at: now,
        };
        if !self.messages.record_inbound(&record).await.map_err(processing_error)? {
            debug!(
                event_name = "engage.pipeline.duplicate_dropped",
                external_id = %message.external_id,
                message_id = %message.message_id.0,
                "redelivered message id; dropped without effect"
            );
            return Ok(IngressOutcome::Duplicate);
        }

        if is_reset_command(&message.content, &self.reset_command) {
            debug!(
                event_name = "engage.pipeline.reset_queued",
                external_id = %message.external_id,
                "reset sentinel received; takes effect when the batch flushes"
            );
        }

        self.debouncer.enqueue(message).await;
        Ok(IngressOutcome::Buffered)
    }
}

fn processing_error(repository_error: RepositoryError) -> IngressError {
    IngressError::Processing(repository_error.to_string())
}

/// Storage and outbound handles the flush path works with.
pub struct PipelineServices {
    pub leads: Arc<dyn LeadRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub follow_ups: Arc<dyn FollowUpRepository>,
    pub calendar_events: Arc<dyn CalendarRepository>,
    pub composer: Arc<dyn ReplyComposer>,
    pub sender: Arc<dyn MessageSender>,
    pub calendar: Arc<dyn CalendarGateway>,
    pub mirror: Arc<StageMirror>,
}

/// Tunables the flush path reads per batch.
pub struct PipelinePolicy {
    pub reset_command: String,
    pub min_bill_value: Decimal,
    pub max_task_attempts: u32,
}

/// Flush side of the pipeline. One instance is shared between the
/// debouncer and the server; the single-flight registry inside guarantees
/// at most one batch per lead is processed at a time.
pub struct EngagementPipeline {
    services: PipelineServices,
    policy: PipelinePolicy,
    flight: Arc<SingleFlight>,
}

impl EngagementPipeline {
    pub fn new(
        services: PipelineServices,
        policy: PipelinePolicy,
        flight: Arc<SingleFlight>,
    ) -> Self {
        Self { services, policy, flight }
    }
}

#[async_trait]
impl BatchFlushHandler for EngagementPipeline {
    async fn flush(
        &self,
        key: &str,
        batch: Vec<InboundMessage>,
    ) -> Result<FlushDisposition, FlushError> {
        if batch.is_empty() {
            return Ok(FlushDisposition::Completed);
        }

        let guard = match self.flight.begin(key, Utc::now()) {
            FlightDecision::Acquired(guard) => guard,
            FlightDecision::Busy => {
                debug!(
                    event_name = "engage.pipeline.flight_busy",
                    external_id = %key,
                    batch_len = batch.len(),
                    "previous flush still in flight; deferring batch"
                );
                return Ok(FlushDisposition::Deferred(batch));
            }
        };

        let result = self.process_batch(key, &batch).await;
        drop(guard);

        match result {
            Ok(()) => Ok(FlushDisposition::Completed),
            Err(error) => Err(FlushError::Handler(error.to_string())),
        }
    }
}

impl EngagementPipeline {
    async fn process_batch(&self, key: &str, batch: &[InboundMessage]) -> anyhow::Result<()> {
        let now = Utc::now();
        let lead = self.services.leads.resolve_or_create(key, now).await?;

        let message_ids: Vec<MessageId> =
            batch.iter().map(|message| message.message_id.clone()).collect();
        let last_received = batch.last().map(|message| message.received_at).unwrap_or(now);

        if batch
            .iter()
            .any(|message| is_reset_command(&message.content, &self.policy.reset_command))
        {
            return self.reset_lead(&lead, &message_ids, now).await;
        }

        if lead.is_suppressed(now) {
            return self.attach_without_reply(&lead, &message_ids, last_received, now).await;
        }

        // Fresh inbound activity supersedes any scheduled nudge.
        self.services.follow_ups.cancel_pending(&lead.id, &REENGAGEMENT_TYPES, now).await?;

        let conversation = self.services.conversations.get_or_create_active(&lead.id, now).await?;
        self.services.messages.attach_to_conversation(&message_ids, &conversation.id).await?;
        self.services
            .conversations
            .record_inbound_batch(&conversation.id, batch.len() as u32, last_received, now)
            .await?;

        let availability = self.scheduling_availability(conversation.stage, now).await;
        let context = ComposeContext {
            stage: conversation.stage,
            display_name: lead.display_name.clone(),
            flags: lead.flags.clone(),
            qualification: lead.qualification,
            min_bill_value: self.policy.min_bill_value,
            messages: batch
                .iter()
                .map(|message| message.content.clone())
                .filter(|content| !content.is_empty())
                .collect(),
            availability,
        };
        let reply = self.services.composer.compose(&context).await?;

        // Facts land before the gate runs, so this batch's answers are in
        // the verdict that may advance the stage below.
        let mut flags = lead.flags.clone();
        reply.facts.apply_to(&mut flags);
        let verdict = evaluate(&flags, self.policy.min_bill_value);
        let display_name = reply
            .facts
            .display_name
            .clone()
            .or_else(|| batch.iter().rev().find_map(|message| message.display_name.clone()));
        self.services
            .leads
            .update_profile(&lead.id, display_name.as_deref(), &flags, verdict, now)
            .await?;
        let lead = match self.services.leads.find_by_id(&lead.id).await? {
            Some(updated) => updated,
            None => lead,
        };

        let mut signals = reply.signals.clone();
        if verdict != context.qualification {
            match verdict {
                QualificationStatus::Qualified => signals.push(ConversationSignal::GateQualified),
                QualificationStatus::NotQualified => {
                    signals.push(ConversationSignal::GateDisqualified)
                }
                QualificationStatus::Pending => {}
            }
        }

        let (stage, transitions) = drive_stage_machine(key, conversation.stage, signals);
        let reply_text = self.execute_actions(&lead, &transitions, reply.text, now).await?;

        if stage != conversation.stage {
            self.services.conversations.update_stage(&conversation.id, stage, now).await?;
            info!(
                event_name = "engage.pipeline.stage_advanced",
                external_id = %key,
                conversation_id = %conversation.id.0,
                from = conversation.stage.as_str(),
                to = stage.as_str(),
                "conversation stage advanced"
            );
        }
        self.services
            .conversations
            .update_sentiment(&conversation.id, reply.sentiment.as_deref(), now)
            .await?;

        self.deliver_reply(&lead, Some(&conversation.id), &reply_text, now).await?;

        if stage.accepts_reengagement() {
            self.services
                .follow_ups
                .schedule(reengagement_short(&lead.id, now, self.policy.max_task_attempts))
                .await?;
        }

        if stage != conversation.stage {
            if let Err(repository_error) = self.services.mirror.sync_stage(&lead, stage, now).await
            {
                warn!(
                    event_name = "engage.pipeline.mirror_bookkeeping_failed",
                    external_id = %key,
                    error = %repository_error,
                    "stage mirror bookkeeping failed; push will catch up on a later change"
                );
            }
        }

        info!(
            event_name = "engage.pipeline.batch_flushed",
            external_id = %key,
            lead_id = %lead.id.0,
            conversation_id = %conversation.id.0,
            batch_len = batch.len(),
            stage = stage.as_str(),
            "processed debounced batch"
        );
        Ok(())
    }

    /// Full wipe: every pending follow-up dies, the active thread ends,
    /// collected answers and verdict are cleared, and the CRM card goes
    /// back to the top of the funnel.
    async fn reset_lead(
        &self,
        lead: &Lead,
        message_ids: &[MessageId],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if let Some(conversation) = self.services.conversations.find_active(&lead.id).await? {
            self.services.messages.attach_to_conversation(message_ids, &conversation.id).await?;
        }

        let cancelled =
            self.services.follow_ups.cancel_pending(&lead.id, &ALL_TASK_TYPES, now).await?;
        let ended = self.services.conversations.end_active(&lead.id, now).await?;
        self.services.leads.reset_engagement(&lead.id, now).await?;

        if let Err(repository_error) =
            self.services.mirror.sync_stage(lead, ConversationStage::InitialContact, now).await
        {
            warn!(
                event_name = "engage.pipeline.mirror_bookkeeping_failed",
                external_id = %lead.external_id,
                error = %repository_error,
                "stage mirror bookkeeping failed during reset"
            );
        }

        self.deliver_reply(lead, None, RESET_CONFIRMATION, now).await?;

        info!(
            event_name = "engage.pipeline.reset_executed",
            external_id = %lead.external_id,
            lead_id = %lead.id.0,
            cancelled_tasks = cancelled,
            ended_conversations = ended,
            "reset sentinel processed; lead back at the top of the funnel"
        );
        Ok(())
    }

    /// A paused or human-attended lead still gets their messages recorded,
    /// but nothing is composed, scheduled, or sent.
    async fn attach_without_reply(
        &self,
        lead: &Lead,
        message_ids: &[MessageId],
        last_received: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if let Some(conversation) = self.services.conversations.find_active(&lead.id).await? {
            self.services.messages.attach_to_conversation(message_ids, &conversation.id).await?;
            self.services
                .conversations
                .record_inbound_batch(&conversation.id, message_ids.len() as u32, last_received, now)
                .await?;
        }

        info!(
            event_name = "engage.pipeline.suppressed",
            external_id = %lead.external_id,
            lead_id = %lead.id.0,
            batch_len = message_ids.len(),
            "lead under human pause or suppression; recorded without reply"
        );
        Ok(())
    }

    /// Open slots, fetched ahead of composing while the conversation sits
    /// where a booking can land, so numbered picks resolve against fresh
    /// windows.
    async fn scheduling_availability(
        &self,
        stage: ConversationStage,
        now: DateTime<Utc>,
    ) -> Option<Vec<TimeWindow>> {
        if !matches!(stage, ConversationStage::Scheduling | ConversationStage::Qualified) {
            return None;
        }
        match self.services.calendar.check_availability(now).await {
            Ok(windows) => Some(windows),
            Err(gateway_error) => {
                warn!(
                    event_name = "engage.pipeline.availability_failed",
                    error = %gateway_error,
                    "availability check failed; composing without slots"
                );
                Some(Vec::new())
            }
        }
    }

    async fn execute_actions(
        &self,
        lead: &Lead,
        transitions: &[StageTransition],
        reply_text: String,
        now: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        let mut text = reply_text;
        for outcome in transitions {
            for action in &outcome.actions {
                match action {
                    EngagementAction::CheckAvailability => {
                        match self.services.calendar.check_availability(now).await {
                            Ok(windows) if !windows.is_empty() => {
                                text = format!("{text}\n\n{}", offer_windows(&windows));
                            }
                            Ok(_) => debug!(
                                event_name = "engage.pipeline.no_open_slots",
                                external_id = %lead.external_id,
                                "availability check returned no open slots"
                            ),
                            Err(gateway_error) => warn!(
                                event_name = "engage.pipeline.availability_failed",
                                external_id = %lead.external_id,
                                error = %gateway_error,
                                "availability check failed; offering no slots"
                            ),
                        }
                    }
                    EngagementAction::ScheduleMeetingReminders { start } => {
                        self.book_meeting(lead, outcome, *start, now).await?;
                    }
                    EngagementAction::CancelReengagement => {
                        self.services
                            .follow_ups
                            .cancel_pending(&lead.id, &REENGAGEMENT_TYPES, now)
                            .await?;
                    }
                    EngagementAction::CancelAllFollowUps => {
                        self.services
                            .follow_ups
                            .cancel_pending(&lead.id, &ALL_TASK_TYPES, now)
                            .await?;
                    }
                    EngagementAction::ClearConversation => {
                        self.services.conversations.end_active(&lead.id, now).await?;
                    }
                }
            }
        }
        Ok(text)
    }

    /// Books the calendar event, persists it, and arms both reminders. A
    /// failing calendar provider downgrades to a locally tracked meeting.
    async fn book_meeting(
        &self,
        lead: &Lead,
        outcome: &StageTransition,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let end = match &outcome.signal {
            ConversationSignal::MeetingBooked { end, .. } => *end,
            _ => start + Duration::minutes(MEETING_FALLBACK_MINUTES),
        };
        let title = match lead.display_name.as_deref() {
            Some(name) => format!("Solar consultation with {name}"),
            None => format!("Solar consultation with {}", lead.external_id),
        };

        let external_ref = match self.services.calendar.create_event(&title, start, end).await {
            Ok(reference) => reference,
            Err(gateway_error) => {
                warn!(
                    event_name = "engage.pipeline.event_creation_failed",
                    external_id = %lead.external_id,
                    error = %gateway_error,
                    "calendar event creation failed; tracking the booking locally"
                );
                None
            }
        };

        let event = CalendarEvent {
            id: CalendarEventId(Uuid::new_v4().to_string()),
            lead_id: lead.id.clone(),
            external_ref,
            title,
            start_time: start,
            end_time: end,
            reminder_24h_sent: false,
            reminder_2h_sent: false,
            created_at: now,
            updated_at: now,
        };
        self.services.calendar_events.save_event(&event).await?;

        for task in meeting_reminders(&lead.id, start, now, self.policy.max_task_attempts) {
            self.services.follow_ups.schedule(task).await?;
        }

        self.services
            .mirror
            .annotate(lead, &format!("Meeting booked for {}", start.to_rfc3339()))
            .await;

        info!(
            event_name = "engage.pipeline.meeting_booked",
            external_id = %lead.external_id,
            lead_id = %lead.id.0,
            event_id = %event.id.0,
            start = %start,
            "meeting booked and reminders armed"
        );
        Ok(())
    }

    /// Sends the reply and records it on both the message log and the
    /// conversation counters. A failed delivery is logged and dropped; the
    /// state that was already persisted stands, and the reengagement nudge
    /// covers the gap.
    async fn deliver_reply(
        &self,
        lead: &Lead,
        conversation_id: Option<&ConversationId>,
        text: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }

        let receipt = match self.services.sender.send(&lead.external_id, text).await {
            Ok(receipt) => receipt,
            Err(delivery_error) => {
                warn!(
                    event_name = "engage.pipeline.send_failed",
                    external_id = %lead.external_id,
                    error = %delivery_error,
                    "outbound delivery failed; reply dropped"
                );
                return Ok(());
            }
        };

        let outbound = Message {
            id: MessageId(
                receipt
                    .provider_message_id
                    .unwrap_or_else(|| format!("out-{}", Uuid::new_v4().simple())),
            ),
            lead_id: lead.id.clone(),
            conversation_id: conversation_id.cloned(),
            direction: MessageDirection::Outbound,
            content: text.to_string(),
            content_type: ContentType::Text,
            received_at: now,
            created_at: now,
        };
        self.services.messages.record_outbound(&outbound).await?;
        if let Some(conversation_id) = conversation_id {
            self.services.conversations.record_outbound(conversation_id, now).await?;
        }
        Ok(())
    }
}

/// Feeds candidate signals through the stage machine in order. Signals
/// that do not apply at the current stage are dropped, not errors: the
/// composer speculates, the machine decides.
fn drive_stage_machine(
    key: &str,
    start: ConversationStage,
    signals: Vec<ConversationSignal>,
) -> (ConversationStage, Vec<StageTransition>) {
    let mut stage = start;
    let mut transitions = Vec::new();
    for signal in signals {
        match transition(stage, signal) {
            Ok(outcome) => {
                stage = outcome.to;
                transitions.push(outcome);
            }
            Err(StageTransitionError::InvalidTransition { stage: at, signal }) => {
                debug!(
                    event_name = "engage.pipeline.signal_dropped",
                    external_id = %key,
                    stage = at.as_str(),
                    signal = ?signal,
                    "signal does not apply at this stage; dropped"
                );
            }
        }
    }
    (stage, transitions)
}
