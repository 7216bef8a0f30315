//! Follow-up poller: an interval worker that reclaims crashed claims,
//! drains due tasks, and executes them with capped backoff. Safe to run
//! in several processes at once; the pending -> executing CAS is the only
//! claim there is.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use nurture_channel::events::MessageSender;
use nurture_core::{
    reengagement_long, BackoffPolicy, CalendarEvent, FollowUpTask, Lead, ReminderSlot,
    RetryDecision, TaskType,
};
use nurture_db::repositories::{
    CalendarRepository, FollowUpRepository, LeadRepository, RepositoryError,
};

const NUDGE_30M: &str =
    "Just checking in! Want to pick up where we left off? I can answer any question about going solar.";

const NUDGE_24H: &str =
    "I do not want to be a bother, so this is my last nudge. If cutting your energy bill is still on your mind, I am one message away.";

pub struct FollowUpPoller {
    follow_ups: Arc<dyn FollowUpRepository>,
    leads: Arc<dyn LeadRepository>,
    calendar_events: Arc<dyn CalendarRepository>,
    sender: Arc<dyn MessageSender>,
    worker_id: String,
    backoff: BackoffPolicy,
    claim_ttl: Duration,
    batch_limit: u32,
}

impl FollowUpPoller {
    pub fn new(
        follow_ups: Arc<dyn FollowUpRepository>,
        leads: Arc<dyn LeadRepository>,
        calendar_events: Arc<dyn CalendarRepository>,
        sender: Arc<dyn MessageSender>,
        backoff: BackoffPolicy,
        claim_ttl: Duration,
        batch_limit: u32,
    ) -> Self {
        Self {
            follow_ups,
            leads,
            calendar_events,
            sender,
            worker_id: format!("poller-{}", Uuid::new_v4().simple()),
            backoff,
            claim_ttl,
            batch_limit,
        }
    }

    pub fn spawn(self: Arc<Self>, tick: StdDuration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(repository_error) = self.tick_once(Utc::now()).await {
                    warn!(
                        event_name = "scheduler.poller.tick_failed",
                        error = %repository_error,
                        "poller tick failed; next tick will retry"
                    );
                }
            }
        })
    }

    /// One full pass: free stale claims, then drain due tasks. An error on
    /// one task never aborts the rest of the batch.
    pub async fn tick_once(&self, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        let reclaimed = self.follow_ups.reclaim_stale(now - self.claim_ttl, now).await?;
        if reclaimed > 0 {
            warn!(
                event_name = "scheduler.poller.stale_reclaimed",
                reclaimed, "returned stale executing tasks to pending"
            );
        }

        for task in self.follow_ups.due_tasks(now, self.batch_limit).await? {
            if let Err(repository_error) = self.process_task(&task, now).await {
                warn!(
                    event_name = "scheduler.poller.task_errored",
                    task_id = %task.id.0,
                    error = %repository_error,
                    "task processing hit a storage error; continuing with the rest"
                );
            }
        }
        Ok(())
    }

    async fn process_task(
        &self,
        task: &FollowUpTask,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let Some(lead) = self.leads.find_by_id(&task.lead_id).await? else {
            if self.follow_ups.try_begin_execution(&task.id, &self.worker_id, now).await? {
                self.follow_ups.mark_failed(&task.id, "lead row not found", now).await?;
            }
            return Ok(());
        };

        // Paused or human-attended leads keep their tasks pending: the
        // claim is never taken, so the task surfaces again once the pause
        // lifts.
        if lead.is_suppressed(now) {
            debug!(
                event_name = "scheduler.poller.suppressed_skip",
                task_id = %task.id.0,
                lead_id = %lead.id.0,
                "lead under human pause or suppression; task left pending"
            );
            return Ok(());
        }

        if !self.follow_ups.try_begin_execution(&task.id, &self.worker_id, now).await? {
            debug!(
                event_name = "scheduler.poller.claim_lost",
                task_id = %task.id.0,
                "another worker or a cancellation got the task first"
            );
            return Ok(());
        }

        let attempts_made = task.attempt_count + 1;
        match self.execute(task, &lead, now).await {
            Ok(()) => {
                self.follow_ups.mark_executed(&task.id, now).await?;
                info!(
                    event_name = "scheduler.poller.task_executed",
                    task_id = %task.id.0,
                    lead_id = %lead.id.0,
                    task_type = task.task_type.as_str(),
                    "follow-up task executed"
                );
            }
            Err(reason) => match self.backoff.decide(attempts_made) {
                RetryDecision::Retry { delay_secs } => {
                    let next_retry_at = now + Duration::seconds(delay_secs);
                    self.follow_ups.mark_retry(&task.id, next_retry_at, &reason, now).await?;
                    warn!(
                        event_name = "scheduler.poller.task_retry",
                        task_id = %task.id.0,
                        task_type = task.task_type.as_str(),
                        attempts = attempts_made,
                        delay_secs,
                        reason = %reason,
                        "task execution failed; retry scheduled"
                    );
                }
                RetryDecision::GiveUp => {
                    self.follow_ups.mark_failed(&task.id, &reason, now).await?;
                    error!(
                        event_name = "scheduler.poller.task_abandoned",
                        task_id = %task.id.0,
                        task_type = task.task_type.as_str(),
                        attempts = attempts_made,
                        reason = %reason,
                        "task execution failed permanently"
                    );
                }
            },
        }
        Ok(())
    }

    /// The side effect of one claimed task. `Err` carries a human-readable
    /// reason that feeds the retry bookkeeping.
    async fn execute(
        &self,
        task: &FollowUpTask,
        lead: &Lead,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        match task.task_type {
            TaskType::Reengagement30m => {
                self.send_nudge(lead, NUDGE_30M).await?;
                // The escalation arms only after the first nudge went out.
                self.follow_ups
                    .schedule(reengagement_long(&lead.id, now, self.backoff.max_attempts))
                    .await
                    .map_err(|repository_error| repository_error.to_string())?;
                Ok(())
            }
            TaskType::Reengagement24h => self.send_nudge(lead, NUDGE_24H).await,
            TaskType::MeetingReminder24h => {
                self.send_reminder(lead, ReminderSlot::DayBefore, now).await
            }
            TaskType::MeetingReminder2h => {
                self.send_reminder(lead, ReminderSlot::TwoHoursBefore, now).await
            }
            TaskType::Custom => {
                info!(
                    event_name = "scheduler.poller.custom_task",
                    task_id = %task.id.0,
                    lead_id = %lead.id.0,
                    "custom task acknowledged"
                );
                Ok(())
            }
        }
    }

    async fn send_nudge(&self, lead: &Lead, text: &str) -> Result<(), String> {
        self.sender
            .send(&lead.external_id, text)
            .await
            .map(|_| ())
            .map_err(|delivery_error| delivery_error.to_string())
    }

    /// The reminder flag is the at-most-once guard: it is claimed before
    /// the send, so a task retried after a crash cannot double-message the
    /// lead. A send that fails after the claim is not repeated.
    async fn send_reminder(
        &self,
        lead: &Lead,
        slot: ReminderSlot,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        let event = self
            .calendar_events
            .latest_for_lead(&lead.id)
            .await
            .map_err(|repository_error| repository_error.to_string())?
            .ok_or_else(|| "no calendar event on file for the reminder".to_string())?;

        let first_claim = self
            .calendar_events
            .try_mark_reminder_sent(&event.id, slot, now)
            .await
            .map_err(|repository_error| repository_error.to_string())?;
        if !first_claim {
            debug!(
                event_name = "scheduler.poller.reminder_already_sent",
                lead_id = %lead.id.0,
                event_id = %event.id.0,
                "reminder flag already set; skipping the send"
            );
            return Ok(());
        }

        self.send_nudge(lead, &reminder_text(&event, slot)).await
    }
}

fn reminder_text(event: &CalendarEvent, slot: ReminderSlot) -> String {
    let when = event.start_time.format("%A, %B %-d at %H:%M UTC");
    match slot {
        ReminderSlot::DayBefore => format!(
            "Quick reminder: our call about your solar savings is tomorrow, {when}. See you there!"
        ),
        ReminderSlot::TwoHoursBefore => {
            format!("See you soon! Our call starts at {when}, about two hours from now.")
        }
    }
}
