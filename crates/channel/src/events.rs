use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use nurture_core::{ContentType, MessageId};

/// Raw inbound event as the transport hands it over. Everything is optional
/// until `normalize_inbound` has validated it.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InboundPayload {
    pub message_id: Option<String>,
    pub sender_external_id: Option<String>,
    pub sender_name: Option<String>,
    pub content: Option<String>,
    pub content_type: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
}

/// Transport-level wrapper around one delivery. The delivery id is the
/// transport's acknowledgement key and exists even for malformed payloads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelEnvelope {
    pub delivery_id: String,
    pub payload: InboundPayload,
}

/// Validated inbound message. `message_id` is the channel's idempotency key
/// and `external_id` is the canonical debounce/identity key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: MessageId,
    pub external_id: String,
    pub display_name: Option<String>,
    pub content: String,
    pub content_type: ContentType,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("inbound payload is missing `{0}`")]
    MissingField(&'static str),
    #[error("inbound payload has an empty text body")]
    EmptyContent,
    #[error("sender id `{0}` is not a usable channel address")]
    InvalidSender(String),
    #[error("unsupported content type `{0}`")]
    UnsupportedContentType(String),
}

/// Validates a raw payload and produces the canonical inbound message.
/// Deliveries that carry no timestamp are stamped with `now`. Rejections
/// happen here, before any side effect exists.
pub fn normalize_inbound(
    payload: InboundPayload,
    now: DateTime<Utc>,
) -> Result<InboundMessage, PayloadError> {
    let message_id = payload
        .message_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(PayloadError::MissingField("message_id"))?
        .to_owned();

    let sender = payload
        .sender_external_id
        .as_deref()
        .ok_or(PayloadError::MissingField("sender_external_id"))?;
    let external_id = normalize_external_id(sender)?;

    let content_type = match payload.content_type.as_deref().map(str::trim) {
        None | Some("") => ContentType::Text,
        Some(raw) => ContentType::parse(raw)
            .ok_or_else(|| PayloadError::UnsupportedContentType(raw.to_owned()))?,
    };

    // Media deliveries may have no text body; a text delivery must.
    let content = payload.content.as_deref().map(str::trim).unwrap_or_default().to_owned();
    if content.is_empty() && content_type == ContentType::Text {
        return Err(PayloadError::EmptyContent);
    }

    let display_name = payload
        .sender_name
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned);

    Ok(InboundMessage {
        message_id: MessageId(message_id),
        external_id,
        display_name,
        content,
        content_type,
        received_at: payload.received_at.unwrap_or(now),
    })
}

/// Canonicalizes a sender handle so the same phone number always resolves to
/// the same lead. Phone-style handles lose separator punctuation and gain a
/// `+` prefix; opaque handles pass through trimmed.
pub fn normalize_external_id(raw: &str) -> Result<String, PayloadError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PayloadError::MissingField("sender_external_id"));
    }

    let phone_like = trimmed
        .chars()
        .all(|ch| ch.is_ascii_digit() || matches!(ch, '+' | ' ' | '-' | '(' | ')' | '.'));
    if !phone_like {
        return Ok(trimmed.to_owned());
    }

    let digits: String = trimmed.chars().filter(|ch| ch.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(PayloadError::InvalidSender(trimmed.to_owned()));
    }

    Ok(format!("+{digits}"))
}

/// Exact-match reset detection on the trimmed, case-folded content. The
/// sentinel buried inside a longer sentence does not count.
pub fn is_reset_command(content: &str, sentinel: &str) -> bool {
    content.trim().eq_ignore_ascii_case(sentinel.trim())
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub provider_message_id: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("channel rejected the send: {0}")]
    Rejected(String),
    #[error("channel transport failed: {0}")]
    Transport(String),
}

/// Outbound delivery seam. The server crate provides an HTTP implementation
/// against the channel gateway; the noop stands in when none is configured.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, external_id: &str, text: &str) -> Result<DeliveryReceipt, DeliveryError>;
}

#[derive(Default)]
pub struct NoopMessageSender;

#[async_trait]
impl MessageSender for NoopMessageSender {
    async fn send(&self, external_id: &str, text: &str) -> Result<DeliveryReceipt, DeliveryError> {
        debug!(
            event_name = "ingress.channel.send_skipped",
            external_id,
            text_len = text.len(),
            "no channel gateway configured; outbound send skipped"
        );
        Ok(DeliveryReceipt::default())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngressOutcome {
    /// Recorded and buffered for the next flush.
    Buffered,
    /// Redelivery of an already-seen message id; dropped without effect.
    Duplicate,
}

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("inbound processing failed: {0}")]
    Processing(String),
}

/// Entry point into the engagement pipeline for one validated message.
#[async_trait]
pub trait IngressHandler: Send + Sync {
    async fn accept(&self, message: InboundMessage) -> Result<IngressOutcome, IngressError>;
}

#[derive(Default)]
pub struct NoopIngressHandler;

#[async_trait]
impl IngressHandler for NoopIngressHandler {
    async fn accept(&self, _message: InboundMessage) -> Result<IngressOutcome, IngressError> {
        Ok(IngressOutcome::Buffered)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::{
        is_reset_command, normalize_external_id, normalize_inbound, InboundPayload, PayloadError,
    };
    use nurture_core::ContentType;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid timestamp")
    }

    fn payload(sender: &str, content: &str) -> InboundPayload {
        InboundPayload {
            message_id: Some("wamid-001".to_owned()),
            sender_external_id: Some(sender.to_owned()),
            sender_name: Some("Marina Costa".to_owned()),
            content: Some(content.to_owned()),
            content_type: Some("text".to_owned()),
            received_at: None,
        }
    }

    #[test]
    fn normalizes_a_phone_style_sender() {
        let message = normalize_inbound(payload("+55 (11) 99000-0101", "oi, tudo bem?"), ts())
            .expect("payload should normalize");

        assert_eq!(message.external_id, "+5511990000101");
        assert_eq!(message.display_name.as_deref(), Some("Marina Costa"));
        assert_eq!(message.content, "oi, tudo bem?");
        assert_eq!(message.content_type, ContentType::Text);
        assert_eq!(message.received_at, ts());
    }

    #[test]
    fn opaque_sender_handles_pass_through_trimmed() {
        let normalized = normalize_external_id("  lead:abc-123  ").expect("handle should pass");
        assert_eq!(normalized, "lead:abc-123");
    }

    #[test]
    fn phone_punctuation_without_digits_is_rejected() {
        let error = normalize_external_id("+( )-").expect_err("no digits should fail");
        assert_eq!(error, PayloadError::InvalidSender("+( )-".to_owned()));
    }

    #[test]
    fn missing_message_id_is_rejected() {
        let mut raw = payload("+5511990000101", "oi");
        raw.message_id = Some("   ".to_owned());

        let error = normalize_inbound(raw, ts()).expect_err("blank message id should fail");
        assert_eq!(error, PayloadError::MissingField("message_id"));
    }

    #[test]
    fn blank_text_body_is_rejected() {
        let error = normalize_inbound(payload("+5511990000101", "   "), ts())
            .expect_err("blank text should fail");
        assert_eq!(error, PayloadError::EmptyContent);
    }

    #[test]
    fn media_without_text_body_is_accepted() {
        let mut raw = payload("+5511990000101", "");
        raw.content_type = Some("audio".to_owned());

        let message = normalize_inbound(raw, ts()).expect("empty audio body should pass");
        assert_eq!(message.content_type, ContentType::Audio);
        assert!(message.content.is_empty());
    }

    #[test]
    fn unknown_content_type_is_rejected() {
        let mut raw = payload("+5511990000101", "oi");
        raw.content_type = Some("sticker".to_owned());

        let error = normalize_inbound(raw, ts()).expect_err("sticker should fail");
        assert_eq!(error, PayloadError::UnsupportedContentType("sticker".to_owned()));
    }

    #[test]
    fn missing_content_type_defaults_to_text() {
        let mut raw = payload("+5511990000101", "oi");
        raw.content_type = None;

        let message = normalize_inbound(raw, ts()).expect("payload should normalize");
        assert_eq!(message.content_type, ContentType::Text);
    }

    #[test]
    fn missing_received_at_uses_the_fallback_stamp() {
        let stamped = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).single().expect("valid");
        let mut raw = payload("+5511990000101", "oi");
        raw.received_at = Some(stamped);

        let message = normalize_inbound(raw.clone(), ts()).expect("payload should normalize");
        assert_eq!(message.received_at, stamped);

        raw.received_at = None;
        let message = normalize_inbound(raw, ts()).expect("payload should normalize");
        assert_eq!(message.received_at, ts());
    }

    #[test]
    fn reset_sentinel_matches_exactly_after_trim_and_case_fold() {
        assert!(is_reset_command("  #CLEAR  ", "#clear"));
        assert!(is_reset_command("#clear", "#clear"));
        assert!(!is_reset_command("#clear everything", "#clear"));
        assert!(!is_reset_command("please #clear", "#clear"));
        assert!(!is_reset_command("#reset", "#clear"));
    }
}
