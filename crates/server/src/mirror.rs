//! CRM stage mirror. Outbound: every internal stage change is pushed to
//! the CRM pipeline with capped, doubling retries; the internal stage is
//! authoritative and a failing mirror only ever lags, it never rolls the
//! conversation back. Inbound: CRM webhooks pause or suppress engagement
//! when a human takes the lead over.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use nurture_channel::events::normalize_external_id;
use nurture_core::{
    external_stage, BackoffPolicy, ConversationStage, ExternalStage, Lead, RetryDecision,
};
use nurture_db::repositories::{LeadRepository, MirrorRepository, RepositoryError};

use crate::gateways::CrmGateway;

pub const WEBHOOK_SECRET_HEADER: &str = "x-nurture-webhook-secret";

/// Owns the mirror bookkeeping and the retry schedule for failing pushes.
pub struct StageMirror {
    records: Arc<dyn MirrorRepository>,
    leads: Arc<dyn LeadRepository>,
    gateway: Arc<dyn CrmGateway>,
    enabled: bool,
    backoff: BackoffPolicy,
}

impl StageMirror {
    pub fn new(
        records: Arc<dyn MirrorRepository>,
        leads: Arc<dyn LeadRepository>,
        gateway: Arc<dyn CrmGateway>,
        enabled: bool,
        backoff: BackoffPolicy,
    ) -> Self {
        Self { records, leads, gateway, enabled, backoff }
    }

    /// Registers a stage change and attempts the push right away. Returns
    /// storage errors only; gateway failures become retry bookkeeping.
    pub async fn sync_stage(
        &self,
        lead: &Lead,
        stage: ConversationStage,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        if !self.enabled {
            debug!(
                event_name = "crm.mirror.disabled",
                lead_id = %lead.id.0,
                stage = stage.as_str(),
                "crm mirror disabled; stage change not pushed"
            );
            return Ok(());
        }

        let target = external_stage(stage);
        self.records.upsert_pending(&lead.id, stage, target, now).await?;
        self.attempt_push(lead, target, 0, now).await
    }

    /// Drains mirror rows whose retry timer has elapsed. Returns how many
    /// rows were attempted.
    pub async fn retry_due(&self, now: DateTime<Utc>, limit: u32) -> Result<u64, RepositoryError> {
        if !self.enabled {
            return Ok(0);
        }

        let due = self.records.due_pending(now, limit).await?;
        let mut attempted = 0;
        for record in due {
            let Some(lead) = self.leads.find_by_id(&record.lead_id).await? else {
                warn!(
                    event_name = "crm.mirror.lead_missing",
                    lead_id = %record.lead_id.0,
                    "mirror row references a missing lead; marking failed"
                );
                self.records
                    .mark_failed(&record.lead_id, record.attempts, "lead row not found", now)
                    .await?;
                continue;
            };
            self.attempt_push(&lead, record.external_stage, record.attempts, now).await?;
            attempted += 1;
        }
        Ok(attempted)
    }

    /// Best-effort note on the lead's CRM card. Failures are logged and
    /// swallowed; a note never gates the pipeline.
    pub async fn annotate(&self, lead: &Lead, text: &str) {
        if !self.enabled {
            return;
        }
        let Some(crm_ref) = lead.crm_ref.as_deref() else {
            debug!(
                event_name = "crm.mirror.note_skipped",
                lead_id = %lead.id.0,
                "no crm reference on lead yet; note skipped"
            );
            return;
        };
        if let Err(gateway_error) = self.gateway.add_note(crm_ref, text).await {
            warn!(
                event_name = "crm.mirror.note_failed",
                lead_id = %lead.id.0,
                error = %gateway_error,
                "crm note failed; continuing"
            );
        }
    }

    /// One push with `attempts_before` already burned on this stage pair.
    async fn attempt_push(
        &self,
        lead: &Lead,
        target: ExternalStage,
        attempts_before: u32,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let pushed =
            self.gateway.update_stage(&lead.external_id, lead.crm_ref.as_deref(), target).await;

        match pushed {
            Ok(returned_ref) => {
                if lead.crm_ref.is_none() {
                    if let Some(crm_ref) = returned_ref.as_deref() {
                        self.leads.set_crm_ref(&lead.id, crm_ref, now).await?;
                    }
                }
                self.records.mark_synced(&lead.id, now).await?;
                info!(
                    event_name = "crm.mirror.stage_pushed",
                    lead_id = %lead.id.0,
                    stage = target.as_str(),
                    "stage mirrored to crm"
                );
                Ok(())
            }
            Err(gateway_error) => {
                let attempts = attempts_before + 1;
                match self.backoff.decide(attempts) {
                    RetryDecision::Retry { delay_secs } => {
                        let next_retry_at = now + Duration::seconds(delay_secs);
                        self.records
                            .mark_retry(
                                &lead.id,
                                attempts,
                                &gateway_error.to_string(),
                                next_retry_at,
                                now,
                            )
                            .await?;
                        warn!(
                            event_name = "crm.mirror.push_retry",
                            lead_id = %lead.id.0,
                            stage = target.as_str(),
                            attempts,
                            delay_secs,
                            error = %gateway_error,
                            "crm stage push failed; retry scheduled"
                        );
                    }
                    RetryDecision::GiveUp => {
                        self.records
                            .mark_failed(&lead.id, attempts, &gateway_error.to_string(), now)
                            .await?;
                        error!(
                            event_name = "crm.mirror.push_abandoned",
                            lead_id = %lead.id.0,
                            stage = target.as_str(),
                            attempts,
                            error = %gateway_error,
                            "crm stage push failed permanently; internal stage stays authoritative"
                        );
                    }
                }
                Ok(())
            }
        }
    }

    /// Interval worker that drains due retry rows in the background.
    pub fn spawn_worker(
        self: &Arc<Self>,
        tick: StdDuration,
        limit: u32,
    ) -> tokio::task::JoinHandle<()> {
        let mirror = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match mirror.retry_due(Utc::now(), limit).await {
                    Ok(count) if count > 0 => {
                        debug!(
                            event_name = "crm.mirror.retries_drained",
                            count, "retried due mirror rows"
                        );
                    }
                    Ok(_) => {}
                    Err(repository_error) => {
                        warn!(
                            event_name = "crm.mirror.worker_error",
                            error = %repository_error,
                            "mirror retry pass failed; next tick will try again"
                        );
                    }
                }
            }
        })
    }
}

/// State behind the CRM webhook routes.
#[derive(Clone)]
pub struct WebhookState {
    leads: Arc<dyn LeadRepository>,
    enabled: bool,
    webhook_secret: Option<SecretString>,
    human_attended_stage: String,
    handoff_pause_hours: i64,
}

impl WebhookState {
    pub fn new(
        leads: Arc<dyn LeadRepository>,
        enabled: bool,
        webhook_secret: Option<SecretString>,
        human_attended_stage: String,
        handoff_pause_hours: u64,
    ) -> Self {
        Self {
            leads,
            enabled,
            webhook_secret,
            human_attended_stage,
            handoff_pause_hours: handoff_pause_hours as i64,
        }
    }
}

pub fn webhook_router(state: WebhookState) -> Router {
    Router::new().route("/webhooks/crm", post(webhook_ingest)).with_state(state)
}

#[derive(Clone, Debug, Serialize)]
pub struct WebhookAck {
    pub id: String,
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct WebhookError {
    pub error: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct WebhookFields {
    event_type: Option<String>,
    crm_ref: Option<String>,
    external_id: Option<String>,
    stage: Option<String>,
    note: Option<String>,
}

enum WebhookKind {
    Annotation,
    StageChange,
    Unknown,
}

/// Tolerant field extraction: CRMs disagree on payload shapes, so strings,
/// numbers and booleans all normalize to a trimmed string and anything
/// else reads as absent.
fn webhook_string_field(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key) {
        Some(Value::String(value)) => {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_owned())
        }
        Some(Value::Number(value)) => Some(value.to_string()),
        Some(Value::Bool(value)) => Some(value.to_string()),
        _ => None,
    }
}

fn normalize_webhook_payload(payload: &Value) -> WebhookFields {
    WebhookFields {
        event_type: webhook_string_field(payload, "event_type")
            .or_else(|| webhook_string_field(payload, "event")),
        crm_ref: webhook_string_field(payload, "crm_ref")
            .or_else(|| webhook_string_field(payload, "card_id")),
        external_id: webhook_string_field(payload, "external_id")
            .or_else(|| webhook_string_field(payload, "phone")),
        stage: webhook_string_field(payload, "stage")
            .or_else(|| webhook_string_field(payload, "pipeline_stage")),
        note: webhook_string_field(payload, "note")
            .or_else(|| webhook_string_field(payload, "annotation")),
    }
}

fn classify(fields: &WebhookFields) -> WebhookKind {
    match fields.event_type.as_deref() {
        Some("annotation") | Some("note_added") => WebhookKind::Annotation,
        Some("stage_change") | Some("stage_changed") => WebhookKind::StageChange,
        _ if fields.stage.is_some() => WebhookKind::StageChange,
        _ if fields.note.is_some() => WebhookKind::Annotation,
        _ => WebhookKind::Unknown,
    }
}

fn webhook_guard(
    headers: &HeaderMap,
    state: &WebhookState,
) -> Result<(), (StatusCode, Json<WebhookError>)> {
    if !state.enabled {
        return Err((
            StatusCode::FORBIDDEN,
            Json(WebhookError { error: "crm integration is disabled".to_string() }),
        ));
    }

    if let Some(secret) = state.webhook_secret.as_ref() {
        let presented = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if presented != secret.expose_secret() {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(WebhookError { error: "invalid webhook secret".to_string() }),
            ));
        }
    }

    Ok(())
}

async fn webhook_ingest(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<WebhookAck>), (StatusCode, Json<WebhookError>)> {
    webhook_guard(&headers, &state)?;

    let event_id = format!("CRMHK-{}", Uuid::new_v4().simple());
    let fields = normalize_webhook_payload(&payload);
    let now = Utc::now();

    let Some(lead) = resolve_lead(&state, &fields).await? else {
        info!(
            event_name = "crm.mirror.webhook_unmatched",
            webhook_id = %event_id,
            "webhook did not match a known lead; acknowledged without effect"
        );
        return Ok((
            StatusCode::OK,
            Json(WebhookAck {
                id: event_id,
                status: "ignored",
                detail: "no matching lead".to_string(),
            }),
        ));
    };

    match classify(&fields) {
        WebhookKind::Annotation => {
            let pause_until = now + Duration::hours(state.handoff_pause_hours);
            state
                .leads
                .set_human_pause(&lead.id, Some(pause_until), now)
                .await
                .map_err(storage_error)?;
            info!(
                event_name = "crm.mirror.handoff_pause",
                webhook_id = %event_id,
                lead_id = %lead.id.0,
                pause_until = %pause_until,
                "operator annotation received; engagement paused"
            );
            Ok((
                StatusCode::OK,
                Json(WebhookAck {
                    id: event_id,
                    status: "paused",
                    detail: format!("engagement paused until {pause_until}"),
                }),
            ))
        }
        WebhookKind::StageChange => {
            let Some(stage_raw) = fields.stage.as_deref() else {
                return Err((
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(WebhookError { error: "stage change without a stage value".to_string() }),
                ));
            };

            if stage_raw.eq_ignore_ascii_case(state.human_attended_stage.trim()) {
                state
                    .leads
                    .set_human_attended(&lead.id, true, now)
                    .await
                    .map_err(storage_error)?;
                info!(
                    event_name = "crm.mirror.human_attended",
                    webhook_id = %event_id,
                    lead_id = %lead.id.0,
                    "lead moved to the human-attended stage; automation suppressed"
                );
                return Ok((
                    StatusCode::OK,
                    Json(WebhookAck {
                        id: event_id,
                        status: "suppressed",
                        detail: "human-attended suppression engaged".to_string(),
                    }),
                ));
            }

            if ExternalStage::parse(stage_raw).is_some() {
                state
                    .leads
                    .set_human_attended(&lead.id, false, now)
                    .await
                    .map_err(storage_error)?;
                info!(
                    event_name = "crm.mirror.human_attended_cleared",
                    webhook_id = %event_id,
                    lead_id = %lead.id.0,
                    stage = stage_raw,
                    "lead moved out of the human-attended stage; automation resumed"
                );
                return Ok((
                    StatusCode::OK,
                    Json(WebhookAck {
                        id: event_id,
                        status: "resumed",
                        detail: format!("suppression cleared at stage `{stage_raw}`"),
                    }),
                ));
            }

            warn!(
                event_name = "crm.mirror.unknown_stage",
                webhook_id = %event_id,
                lead_id = %lead.id.0,
                stage = stage_raw,
                "webhook carries an unknown external stage; refused"
            );
            Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(WebhookError { error: format!("unknown external stage `{stage_raw}`") }),
            ))
        }
        WebhookKind::Unknown => {
            debug!(
                event_name = "crm.mirror.webhook_ignored",
                webhook_id = %event_id,
                "webhook has no actionable fields"
            );
            Ok((
                StatusCode::OK,
                Json(WebhookAck {
                    id: event_id,
                    status: "ignored",
                    detail: "no actionable fields".to_string(),
                }),
            ))
        }
    }
}

/// CRM ref wins over channel identity; webhooks from a freshly created card
/// may carry either.
async fn resolve_lead(
    state: &WebhookState,
    fields: &WebhookFields,
) -> Result<Option<Lead>, (StatusCode, Json<WebhookError>)> {
    if let Some(crm_ref) = fields.crm_ref.as_deref() {
        if let Some(lead) = state.leads.find_by_crm_ref(crm_ref).await.map_err(storage_error)? {
            return Ok(Some(lead));
        }
    }

    if let Some(raw) = fields.external_id.as_deref() {
        let lookup = normalize_external_id(raw).unwrap_or_else(|_| raw.trim().to_owned());
        if let Some(lead) =
            state.leads.find_by_external_id(&lookup).await.map_err(storage_error)?
        {
            return Ok(Some(lead));
        }
    }

    Ok(None)
}

fn storage_error(repository_error: RepositoryError) -> (StatusCode, Json<WebhookError>) {
    error!(
        event_name = "crm.mirror.storage_error",
        error = %repository_error,
        "webhook handling hit a storage error"
    );
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(WebhookError { error: "internal storage error".to_string() }),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{HeaderMap, Request, StatusCode};
    use chrono::{Duration, Utc};
    use secrecy::SecretString;
    use serde_json::json;
    use tokio::sync::Mutex;
    use tower::util::ServiceExt;

    use nurture_core::{BackoffPolicy, ConversationStage, ExternalStage, Lead, MirrorSyncStatus};
    use nurture_db::migrations::run_pending;
    use nurture_db::repositories::{
        LeadRepository, MirrorRepository, SqlLeadRepository, SqlMirrorRepository,
    };
    use nurture_db::{connect_with_settings, DbPool};

    use crate::gateways::{CrmGateway, GatewayError};

    use super::{
        webhook_ingest, webhook_router, StageMirror, WebhookState, WEBHOOK_SECRET_HEADER,
    };

    struct ScriptedCrmGateway {
        results: Mutex<VecDeque<Result<Option<String>, GatewayError>>>,
        pushes: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedCrmGateway {
        fn new(results: Vec<Result<Option<String>, GatewayError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                pushes: Mutex::new(Vec::new()),
            })
        }

        async fn pushes(&self) -> Vec<(String, String)> {
            self.pushes.lock().await.clone()
        }
    }

    #[async_trait::async_trait]
    impl CrmGateway for ScriptedCrmGateway {
        async fn update_stage(
            &self,
            external_id: &str,
            _crm_ref: Option<&str>,
            stage: ExternalStage,
        ) -> Result<Option<String>, GatewayError> {
            self.pushes.lock().await.push((external_id.to_string(), stage.as_str().to_string()));
            self.results.lock().await.pop_front().unwrap_or(Ok(None))
        }

        async fn add_note(&self, _crm_ref: &str, _text: &str) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    fn rejected() -> Result<Option<String>, GatewayError> {
        Err(GatewayError::Status { status: 503, body: "upstream down".to_string() })
    }

    fn backoff(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            base_delay_secs: 30,
            multiplier: 2,
            max_delay_secs: 3600,
            max_attempts,
        }
    }

    async fn pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        pool
    }

    struct Harness {
        leads: Arc<dyn LeadRepository>,
        records: Arc<dyn MirrorRepository>,
        gateway: Arc<ScriptedCrmGateway>,
        mirror: StageMirror,
    }

    async fn harness(results: Vec<Result<Option<String>, GatewayError>>, enabled: bool) -> Harness {
        let pool = pool().await;
        let leads: Arc<dyn LeadRepository> = Arc::new(SqlLeadRepository::new(pool.clone()));
        let records: Arc<dyn MirrorRepository> = Arc::new(SqlMirrorRepository::new(pool));
        let gateway = ScriptedCrmGateway::new(results);
        let mirror = StageMirror::new(
            records.clone(),
            leads.clone(),
            gateway.clone(),
            enabled,
            backoff(5),
        );
        Harness { leads, records, gateway, mirror }
    }

    async fn make_lead(harness: &Harness, external_id: &str) -> Lead {
        harness.leads.resolve_or_create(external_id, Utc::now()).await.expect("lead")
    }

    #[tokio::test]
    async fn first_successful_push_stores_the_crm_ref() {
        let h = harness(vec![Ok(Some("card-77".to_string()))], true).await;
        let lead = make_lead(&h, "+5511977700001").await;
        let now = Utc::now();

        h.mirror.sync_stage(&lead, ConversationStage::Discovery, now).await.expect("sync");

        let record = h.records.find_for_lead(&lead.id).await.expect("query").expect("record");
        assert_eq!(record.status, MirrorSyncStatus::Synced);
        assert_eq!(record.external_stage, ExternalStage::Discovery);

        let stored = h.leads.find_by_id(&lead.id).await.expect("query").expect("lead");
        assert_eq!(stored.crm_ref.as_deref(), Some("card-77"));

        let pushes = h.gateway.pushes().await;
        assert_eq!(pushes, vec![("+5511977700001".to_string(), "discovery".to_string())]);
    }

    #[tokio::test]
    async fn a_failed_push_schedules_a_doubling_retry() {
        let h = harness(vec![rejected(), rejected()], true).await;
        let lead = make_lead(&h, "+5511977700002").await;
        let now = Utc::now();

        h.mirror.sync_stage(&lead, ConversationStage::Qualification, now).await.expect("sync");

        let record = h.records.find_for_lead(&lead.id).await.expect("query").expect("record");
        assert_eq!(record.status, MirrorSyncStatus::Pending);
        assert_eq!(record.attempts, 1);
        assert_eq!(record.next_retry_at, Some(now + Duration::seconds(30)));

        // Second attempt via the retry-due path doubles the delay.
        let later = now + Duration::seconds(31);
        let attempted = h.mirror.retry_due(later, 10).await.expect("retry");
        assert_eq!(attempted, 1);

        let record = h.records.find_for_lead(&lead.id).await.expect("query").expect("record");
        assert_eq!(record.attempts, 2);
        assert_eq!(record.next_retry_at, Some(later + Duration::seconds(60)));
        assert!(record.last_error.as_deref().is_some_and(|e| e.contains("503")));
    }

    #[tokio::test]
    async fn retries_stop_at_the_attempt_ceiling() {
        let h = harness(vec![rejected(), rejected()], true).await;
        let lead = make_lead(&h, "+5511977700003").await;
        let mirror = StageMirror::new(
            h.records.clone(),
            h.leads.clone(),
            h.gateway.clone(),
            true,
            backoff(2),
        );
        let now = Utc::now();

        mirror.sync_stage(&lead, ConversationStage::Scheduling, now).await.expect("sync");
        mirror.retry_due(now + Duration::seconds(31), 10).await.expect("retry");

        let record = h.records.find_for_lead(&lead.id).await.expect("query").expect("record");
        assert_eq!(record.status, MirrorSyncStatus::Failed);
        assert_eq!(record.attempts, 2);

        // Nothing left to drain once the row is failed.
        let attempted = mirror.retry_due(now + Duration::hours(2), 10).await.expect("retry");
        assert_eq!(attempted, 0);
    }

    #[tokio::test]
    async fn a_disabled_mirror_pushes_nothing() {
        let h = harness(vec![Ok(Some("card-1".to_string()))], false).await;
        let lead = make_lead(&h, "+5511977700004").await;

        h.mirror.sync_stage(&lead, ConversationStage::Discovery, Utc::now()).await.expect("sync");

        assert!(h.gateway.pushes().await.is_empty());
        assert!(h.records.find_for_lead(&lead.id).await.expect("query").is_none());
    }

    fn webhook_state(leads: Arc<dyn LeadRepository>, secret: Option<&str>) -> WebhookState {
        WebhookState::new(
            leads,
            true,
            secret.map(|s| SecretString::from(s.to_string())),
            "human_attended".to_string(),
            24,
        )
    }

    #[tokio::test]
    async fn an_annotation_pauses_the_lead_for_the_handoff_window() {
        let h = harness(Vec::new(), true).await;
        let lead = make_lead(&h, "+5511977700010").await;
        let state = webhook_state(h.leads.clone(), None);

        let before = Utc::now();
        let response = webhook_ingest(
            axum::extract::State(state),
            HeaderMap::new(),
            axum::Json(json!({
                "event_type": "annotation",
                "external_id": "+5511977700010",
                "note": "called the lead, waiting on documents"
            })),
        )
        .await
        .expect("annotation should be accepted");
        assert_eq!(response.0, StatusCode::OK);
        assert_eq!(response.1.status, "paused");

        let stored = h.leads.find_by_id(&lead.id).await.expect("query").expect("lead");
        let pause_until = stored.human_pause_until.expect("pause set");
        assert!(pause_until >= before + Duration::hours(23));
        assert!(pause_until <= Utc::now() + Duration::hours(25));
        assert!(stored.is_suppressed(Utc::now()));
    }

    #[tokio::test]
    async fn the_human_attended_stage_suppresses_without_expiry() {
        let h = harness(Vec::new(), true).await;
        let lead = make_lead(&h, "+5511977700011").await;
        let state = webhook_state(h.leads.clone(), None);

        let response = webhook_ingest(
            axum::extract::State(state),
            HeaderMap::new(),
            axum::Json(json!({
                "event_type": "stage_change",
                "external_id": "+5511977700011",
                "stage": "Human_Attended"
            })),
        )
        .await
        .expect("stage change should be accepted");
        assert_eq!(response.1.status, "suppressed");

        let stored = h.leads.find_by_id(&lead.id).await.expect("query").expect("lead");
        assert!(stored.human_attended);
        assert!(stored.is_suppressed(Utc::now() + Duration::days(365)));
    }

    #[tokio::test]
    async fn another_known_stage_lifts_the_suppression() {
        let h = harness(Vec::new(), true).await;
        let lead = make_lead(&h, "+5511977700012").await;
        h.leads.set_human_attended(&lead.id, true, Utc::now()).await.expect("suppress");
        let state = webhook_state(h.leads.clone(), None);

        let response = webhook_ingest(
            axum::extract::State(state),
            HeaderMap::new(),
            axum::Json(json!({ "external_id": "+5511977700012", "stage": "qualified" })),
        )
        .await
        .expect("known stage should be accepted");
        assert_eq!(response.1.status, "resumed");

        let stored = h.leads.find_by_id(&lead.id).await.expect("query").expect("lead");
        assert!(!stored.human_attended);
    }

    #[tokio::test]
    async fn an_unknown_stage_is_refused_with_422() {
        let h = harness(Vec::new(), true).await;
        make_lead(&h, "+5511977700013").await;
        let state = webhook_state(h.leads.clone(), None);

        let error = webhook_ingest(
            axum::extract::State(state),
            HeaderMap::new(),
            axum::Json(json!({ "external_id": "+5511977700013", "stage": "closed_won" })),
        )
        .await
        .expect_err("unknown stage must be refused");
        assert_eq!(error.0, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(error.1.error.contains("closed_won"), "got: {}", error.1.error);
    }

    #[tokio::test]
    async fn an_unmatched_lead_is_acknowledged_without_effect() {
        let h = harness(Vec::new(), true).await;
        let state = webhook_state(h.leads.clone(), None);

        let response = webhook_ingest(
            axum::extract::State(state),
            HeaderMap::new(),
            axum::Json(json!({ "external_id": "+550000000000", "stage": "qualified" })),
        )
        .await
        .expect("unmatched webhook should still be acknowledged");
        assert_eq!(response.0, StatusCode::OK);
        assert_eq!(response.1.status, "ignored");
    }

    #[tokio::test]
    async fn a_wrong_secret_is_unauthorized() {
        let h = harness(Vec::new(), true).await;
        make_lead(&h, "+5511977700014").await;
        let state = webhook_state(h.leads.clone(), Some("hook-secret"));

        let mut headers = HeaderMap::new();
        headers.insert(WEBHOOK_SECRET_HEADER, "wrong".parse().expect("header"));
        let error = webhook_ingest(
            axum::extract::State(state),
            headers,
            axum::Json(json!({ "external_id": "+5511977700014", "stage": "qualified" })),
        )
        .await
        .expect_err("wrong secret must be rejected");
        assert_eq!(error.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn the_right_secret_passes_the_guard() {
        let h = harness(Vec::new(), true).await;
        make_lead(&h, "+5511977700015").await;
        let state = webhook_state(h.leads.clone(), Some("hook-secret"));

        let mut headers = HeaderMap::new();
        headers.insert(WEBHOOK_SECRET_HEADER, "hook-secret".parse().expect("header"));
        let response = webhook_ingest(
            axum::extract::State(state),
            headers,
            axum::Json(json!({ "external_id": "+5511977700015", "stage": "qualified" })),
        )
        .await
        .expect("right secret should pass");
        assert_eq!(response.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn a_disabled_integration_refuses_webhooks() {
        let h = harness(Vec::new(), true).await;
        let state = WebhookState::new(h.leads.clone(), false, None, "human_attended".into(), 24);

        let error = webhook_ingest(
            axum::extract::State(state),
            HeaderMap::new(),
            axum::Json(json!({ "external_id": "+5511977700016", "stage": "qualified" })),
        )
        .await
        .expect_err("disabled integration must refuse");
        assert_eq!(error.0, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn the_router_wires_the_guard_end_to_end() {
        let h = harness(Vec::new(), true).await;
        let state = webhook_state(h.leads.clone(), Some("hook-secret"));
        let app = webhook_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/crm")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "stage": "qualified" }).to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
