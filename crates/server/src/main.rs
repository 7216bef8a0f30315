mod bootstrap;
mod gateways;
mod health;
mod mirror;
mod pipeline;
mod poller;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use rust_decimal::Decimal;

use nurture_agent::composer::RuleBasedComposer;
use nurture_channel::debounce::MessageDebouncer;
use nurture_channel::events::{MessageSender, NoopMessageSender};
use nurture_channel::runner::{ChannelRunner, NoopChannelTransport, ReconnectPolicy};
use nurture_channel::single_flight::SingleFlight;
use nurture_core::config::{AppConfig, LoadOptions};
use nurture_core::BackoffPolicy;
use nurture_db::repositories::{
    CalendarRepository, ConversationRepository, FollowUpRepository, LeadRepository,
    MessageRepository, MirrorRepository, SqlCalendarRepository, SqlConversationRepository,
    SqlFollowUpRepository, SqlLeadRepository, SqlMessageRepository, SqlMirrorRepository,
};

use crate::gateways::{
    CalendarGateway, CrmGateway, HttpCalendarGateway, HttpCrmGateway, HttpMessageSender,
    LocalCalendarGateway, NoopCrmGateway,
};
use crate::mirror::{StageMirror, WebhookState};
use crate::pipeline::{ChannelIngress, EngagementPipeline, PipelinePolicy, PipelineServices};
use crate::poller::FollowUpPoller;

fn init_logging(config: &AppConfig) {
    use nurture_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let config = app.config;
    let db_pool = app.db_pool;

    let leads: Arc<dyn LeadRepository> = Arc::new(SqlLeadRepository::new(db_pool.clone()));
    let conversations: Arc<dyn ConversationRepository> =
        Arc::new(SqlConversationRepository::new(db_pool.clone()));
    let messages: Arc<dyn MessageRepository> =
        Arc::new(SqlMessageRepository::new(db_pool.clone()));
    let follow_ups: Arc<dyn FollowUpRepository> =
        Arc::new(SqlFollowUpRepository::new(db_pool.clone()));
    let calendar_events: Arc<dyn CalendarRepository> =
        Arc::new(SqlCalendarRepository::new(db_pool.clone()));
    let mirror_records: Arc<dyn MirrorRepository> =
        Arc::new(SqlMirrorRepository::new(db_pool.clone()));

    let sender = outbound_sender(&config);
    let mirror = Arc::new(StageMirror::new(
        mirror_records,
        leads.clone(),
        crm_gateway(&config),
        config.crm.enabled,
        BackoffPolicy {
            base_delay_secs: config.crm.base_retry_delay_secs as i64,
            multiplier: 2,
            max_delay_secs: config.crm.max_retry_delay_secs as i64,
            max_attempts: config.crm.max_sync_attempts,
        },
    ));

    let flight = Arc::new(SingleFlight::new(chrono::Duration::seconds(
        config.engagement.flight_ttl_secs as i64,
    )));
    let pipeline = Arc::new(EngagementPipeline::new(
        PipelineServices {
            leads: leads.clone(),
            conversations,
            messages: messages.clone(),
            follow_ups: follow_ups.clone(),
            calendar_events: calendar_events.clone(),
            composer: Arc::new(RuleBasedComposer::new()),
            sender: sender.clone(),
            calendar: calendar_gateway(&config),
            mirror: mirror.clone(),
        },
        PipelinePolicy {
            reset_command: config.channel.reset_command.clone(),
            min_bill_value: Decimal::from(config.engagement.min_bill_value),
            max_task_attempts: config.scheduler.max_attempts,
        },
        flight,
    ));

    let debouncer = MessageDebouncer::new(
        StdDuration::from_millis(config.engagement.debounce_window_ms),
        pipeline.clone(),
    );
    let ingress = Arc::new(ChannelIngress::new(
        leads.clone(),
        messages,
        debouncer,
        config.channel.reset_command.clone(),
    ));

    let webhook_state = WebhookState::new(
        leads.clone(),
        config.crm.enabled,
        config.crm.webhook_secret.clone(),
        config.crm.human_attended_stage.clone(),
        config.crm.handoff_pause_hours,
    );
    let app_router = health::router(db_pool.clone()).merge(mirror::webhook_router(webhook_state));
    health::spawn(&config.server.bind_address, config.server.port, app_router).await?;

    let tick = StdDuration::from_secs(config.scheduler.tick_interval_secs);
    let poller = Arc::new(FollowUpPoller::new(
        follow_ups,
        leads,
        calendar_events,
        sender,
        BackoffPolicy {
            base_delay_secs: config.scheduler.retry_base_delay_secs as i64,
            multiplier: config.scheduler.retry_backoff_multiplier,
            max_delay_secs: config.scheduler.retry_max_delay_secs as i64,
            max_attempts: config.scheduler.max_attempts,
        },
        chrono::Duration::seconds(config.scheduler.worker_claim_ttl_secs as i64),
        config.scheduler.batch_limit,
    ));
    poller.spawn(tick);
    mirror.spawn_worker(tick, config.scheduler.batch_limit);

    let runner =
        ChannelRunner::new(Arc::new(NoopChannelTransport), ingress, ReconnectPolicy::default());
    runner.start().await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        "nurture-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "nurture-server stopping"
    );

    Ok(())
}

/// Outbound delivery is live only when the channel gateway and its token
/// are both configured.
fn outbound_sender(config: &AppConfig) -> Arc<dyn MessageSender> {
    match (&config.channel.gateway_url, &config.channel.api_token) {
        (Some(url), Some(token)) => Arc::new(HttpMessageSender::new(url.clone(), token.clone())),
        _ => Arc::new(NoopMessageSender),
    }
}

fn crm_gateway(config: &AppConfig) -> Arc<dyn CrmGateway> {
    if config.crm.enabled {
        if let (Some(url), Some(token)) = (&config.crm.base_url, &config.crm.api_token) {
            return Arc::new(HttpCrmGateway::new(url.clone(), token.clone()));
        }
    }
    Arc::new(NoopCrmGateway)
}

fn calendar_gateway(config: &AppConfig) -> Arc<dyn CalendarGateway> {
    if config.calendar.enabled {
        if let Some(url) = &config.calendar.base_url {
            return Arc::new(HttpCalendarGateway::new(
                url.clone(),
                config.calendar.api_token.clone(),
            ));
        }
    }
    Arc::new(LocalCalendarGateway)
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
