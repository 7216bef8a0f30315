//! Outbound adapters for the channel gateway, the CRM, and the calendar
//! provider. Every HTTP client here carries a hard request timeout so a
//! slow integration can stall one task, never the whole pipeline.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Days, Duration as ChronoDuration, TimeZone, Utc, Weekday};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use nurture_channel::events::{DeliveryError, DeliveryReceipt, MessageSender};
use nurture_core::{ExternalStage, TimeWindow};

const HTTP_TIMEOUT_SECS: u64 = 15;

/// How many slots the local calendar stand-in offers per availability check.
const LOCAL_WINDOW_COUNT: usize = 3;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Outbound side of the CRM integration. `update_stage` returns the card
/// reference the CRM assigned, so the first successful push can persist it
/// on the lead; later pushes address the card by that reference.
#[async_trait]
pub trait CrmGateway: Send + Sync {
    async fn update_stage(
        &self,
        external_id: &str,
        crm_ref: Option<&str>,
        stage: ExternalStage,
    ) -> Result<Option<String>, GatewayError>;

    async fn add_note(&self, crm_ref: &str, text: &str) -> Result<(), GatewayError>;
}

/// Availability lookups and event creation against the calendar provider.
#[async_trait]
pub trait CalendarGateway: Send + Sync {
    /// Open slots a lead can be offered, soonest first.
    async fn check_availability(
        &self,
        from: DateTime<Utc>,
    ) -> Result<Vec<TimeWindow>, GatewayError>;

    /// Books the meeting; returns the provider's event reference when the
    /// provider hands one back.
    async fn create_event(
        &self,
        title: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<String>, GatewayError>;
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

async fn checked(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Status { status: status.as_u16(), body })
}

pub struct HttpCrmGateway {
    client: reqwest::Client,
    base_url: String,
    api_token: SecretString,
}

impl HttpCrmGateway {
    pub fn new(base_url: String, api_token: SecretString) -> Self {
        Self { client: http_client(), base_url, api_token }
    }
}

#[derive(Debug, Default, Deserialize)]
struct StagePushResponse {
    #[serde(default)]
    crm_ref: Option<String>,
}

#[async_trait]
impl CrmGateway for HttpCrmGateway {
    async fn update_stage(
        &self,
        external_id: &str,
        crm_ref: Option<&str>,
        stage: ExternalStage,
    ) -> Result<Option<String>, GatewayError> {
        let response = self
            .client
            .post(join_url(&self.base_url, "leads/stage"))
            .bearer_auth(self.api_token.expose_secret())
            .json(&json!({
                "external_id": external_id,
                "crm_ref": crm_ref,
                "stage": stage.as_str(),
            }))
            .send()
            .await
            .map_err(|error| GatewayError::Request(error.to_string()))?;

        let payload: StagePushResponse = checked(response).await?.json().await.unwrap_or_default();
        Ok(payload.crm_ref)
    }

    async fn add_note(&self, crm_ref: &str, text: &str) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(join_url(&self.base_url, "leads/notes"))
            .bearer_auth(self.api_token.expose_secret())
            .json(&json!({ "crm_ref": crm_ref, "text": text }))
            .send()
            .await
            .map_err(|error| GatewayError::Request(error.to_string()))?;

        checked(response).await?;
        Ok(())
    }
}

/// Stand-in used when the CRM integration is disabled or unconfigured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCrmGateway;

#[async_trait]
impl CrmGateway for NoopCrmGateway {
    async fn update_stage(
        &self,
        external_id: &str,
        _crm_ref: Option<&str>,
        stage: ExternalStage,
    ) -> Result<Option<String>, GatewayError> {
        debug!(
            event_name = "crm.mirror.noop_push",
            external_id, stage = stage.as_str(),
            "crm gateway not configured; stage push dropped"
        );
        Ok(None)
    }

    async fn add_note(&self, _crm_ref: &str, _text: &str) -> Result<(), GatewayError> {
        Ok(())
    }
}

pub struct HttpCalendarGateway {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<SecretString>,
}

impl HttpCalendarGateway {
    pub fn new(base_url: String, api_token: Option<SecretString>) -> Self {
        Self { client: http_client(), base_url, api_token }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
struct CreateEventResponse {
    #[serde(default)]
    id: Option<String>,
}

#[async_trait]
impl CalendarGateway for HttpCalendarGateway {
    async fn check_availability(
        &self,
        from: DateTime<Utc>,
    ) -> Result<Vec<TimeWindow>, GatewayError> {
        let request = self
            .client
            .get(join_url(&self.base_url, "availability"))
            .query(&[("from", from.to_rfc3339())]);
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|error| GatewayError::Request(error.to_string()))?;

        let windows: Vec<WireWindow> = checked(response)
            .await?
            .json()
            .await
            .map_err(|error| GatewayError::Request(error.to_string()))?;
        Ok(windows
            .into_iter()
            .map(|window| TimeWindow { start: window.start, end: window.end })
            .collect())
    }

    async fn create_event(
        &self,
        title: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<String>, GatewayError> {
        let request = self
            .client
            .post(join_url(&self.base_url, "events"))
            .json(&json!({ "title": title, "start": start, "end": end }));
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|error| GatewayError::Request(error.to_string()))?;

        let payload: CreateEventResponse = checked(response).await?.json().await.unwrap_or_default();
        Ok(payload.id)
    }
}

/// Stand-in used when no calendar integration is configured. It offers
/// deterministic weekday slots so the scheduling leg of the funnel still
/// completes; booked meetings are tracked locally without a provider ref.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalCalendarGateway;

#[async_trait]
impl CalendarGateway for LocalCalendarGateway {
    async fn check_availability(
        &self,
        from: DateTime<Utc>,
    ) -> Result<Vec<TimeWindow>, GatewayError> {
        Ok(upcoming_weekday_windows(from, LOCAL_WINDOW_COUNT))
    }

    async fn create_event(
        &self,
        title: &str,
        start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Option<String>, GatewayError> {
        debug!(
            event_name = "engage.pipeline.local_event",
            title, start = %start,
            "no calendar integration configured; meeting tracked locally"
        );
        Ok(None)
    }
}

/// Half-hour consultation slots at 10:00 and 15:00 UTC across the coming
/// weekdays, starting tomorrow so a lead is never offered a slot that is
/// minutes away.
pub fn upcoming_weekday_windows(from: DateTime<Utc>, count: usize) -> Vec<TimeWindow> {
    let mut windows = Vec::with_capacity(count);
    let mut date = from.date_naive() + Days::new(1);

    while windows.len() < count {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            for hour in [10_u32, 15] {
                if windows.len() == count {
                    break;
                }
                if let Some(start) = date.and_hms_opt(hour, 0, 0) {
                    let start = Utc.from_utc_datetime(&start);
                    windows.push(TimeWindow { start, end: start + ChronoDuration::minutes(30) });
                }
            }
        }
        date = date + Days::new(1);
    }

    windows
}

/// `MessageSender` against the channel gateway's REST surface.
pub struct HttpMessageSender {
    client: reqwest::Client,
    gateway_url: String,
    api_token: SecretString,
}

impl HttpMessageSender {
    pub fn new(gateway_url: String, api_token: SecretString) -> Self {
        Self { client: http_client(), gateway_url, api_token }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SendResponse {
    #[serde(default)]
    message_id: Option<String>,
}

#[async_trait]
impl MessageSender for HttpMessageSender {
    async fn send(&self, external_id: &str, text: &str) -> Result<DeliveryReceipt, DeliveryError> {
        let response = self
            .client
            .post(join_url(&self.gateway_url, "messages"))
            .bearer_auth(self.api_token.expose_secret())
            .json(&json!({ "to": external_id, "text": text }))
            .send()
            .await
            .map_err(|error| DeliveryError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected(format!("status {status}: {body}")));
        }

        let payload: SendResponse = response.json().await.unwrap_or_default();
        Ok(DeliveryReceipt { provider_message_id: payload.message_id })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, TimeZone, Timelike, Utc, Weekday};

    use super::{join_url, upcoming_weekday_windows};

    #[test]
    fn local_windows_start_the_next_day() {
        // A Tuesday afternoon.
        let from = Utc.with_ymd_and_hms(2026, 3, 3, 14, 30, 0).unwrap();
        let windows = upcoming_weekday_windows(from, 3);

        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].start.day(), 4);
        assert_eq!(windows[0].start.hour(), 10);
        assert_eq!(windows[1].start.day(), 4);
        assert_eq!(windows[1].start.hour(), 15);
        assert_eq!(windows[2].start.day(), 5);
    }

    #[test]
    fn local_windows_skip_weekends() {
        // A Friday: tomorrow and the day after are the weekend.
        let from = Utc.with_ymd_and_hms(2026, 3, 6, 9, 0, 0).unwrap();
        let windows = upcoming_weekday_windows(from, 3);

        for window in &windows {
            assert!(!matches!(window.start.weekday(), Weekday::Sat | Weekday::Sun));
        }
        assert_eq!(windows[0].start.day(), 9);
    }

    #[test]
    fn local_windows_are_half_hour_slots_in_order() {
        let from = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        let windows = upcoming_weekday_windows(from, 4);

        for window in &windows {
            assert_eq!((window.end - window.start).num_minutes(), 30);
        }
        for pair in windows.windows(2) {
            assert!(pair[0].start < pair[1].start);
        }
    }

    #[test]
    fn url_joining_tolerates_stray_slashes() {
        assert_eq!(join_url("https://crm.test/", "/leads/stage"), "https://crm.test/leads/stage");
        assert_eq!(join_url("https://crm.test", "leads/notes"), "https://crm.test/leads/notes");
    }
}
