use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{
    normalize_inbound, ChannelEnvelope, IngressHandler, IngressOutcome, NoopIngressHandler,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Inbound delivery stream. A real webhook/socket implementation lives with
/// the deployment; the noop stands in when the channel feed is disabled.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_envelope(&self) -> Result<Option<ChannelEnvelope>, TransportError>;
    async fn acknowledge(&self, delivery_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct NoopChannelTransport;

#[async_trait]
impl ChannelTransport for NoopChannelTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChannelEnvelope>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(&self, _delivery_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub struct ChannelRunner {
    transport: Arc<dyn ChannelTransport>,
    ingress: Arc<dyn IngressHandler>,
    reconnect_policy: ReconnectPolicy,
}

impl Default for ChannelRunner {
    fn default() -> Self {
        Self {
            transport: Arc::new(NoopChannelTransport),
            ingress: Arc::new(NoopIngressHandler),
            reconnect_policy: ReconnectPolicy::default(),
        }
    }
}

impl ChannelRunner {
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        ingress: Arc<dyn IngressHandler>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, ingress, reconnect_policy }
    }

    pub async fn start(&self) -> Result<()> {
        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(transport_error) => {
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "channel transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "channel transport retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), TransportError> {
        info!(attempt, "opening channel transport connection");
        self.transport.connect().await?;
        info!(attempt, "channel transport connected");

        loop {
            let Some(envelope) = self.transport.next_envelope().await? else {
                info!(attempt, "channel transport stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };

            let sender = envelope.payload.sender_external_id.as_deref().unwrap_or("unknown");
            info!(
                event_name = "ingress.channel.envelope_received",
                delivery_id = %envelope.delivery_id,
                external_id = sender,
                "received channel envelope"
            );

            if let Err(error) = self.transport.acknowledge(&envelope.delivery_id).await {
                warn!(
                    event_name = "ingress.channel.ack_sent",
                    delivery_id = %envelope.delivery_id,
                    error = %error,
                    "failed to acknowledge channel envelope"
                );
            } else {
                debug!(
                    event_name = "ingress.channel.ack_sent",
                    delivery_id = %envelope.delivery_id,
                    "acknowledged channel envelope"
                );
            }

            let message = match normalize_inbound(envelope.payload, Utc::now()) {
                Ok(message) => message,
                Err(error) => {
                    warn!(
                        event_name = "ingress.channel.payload_rejected",
                        delivery_id = %envelope.delivery_id,
                        error = %error,
                        "rejected malformed inbound payload"
                    );
                    continue;
                }
            };

            match self.ingress.accept(message).await {
                Ok(IngressOutcome::Buffered) => {}
                Ok(IngressOutcome::Duplicate) => {
                    debug!(
                        event_name = "ingress.channel.duplicate_ignored",
                        delivery_id = %envelope.delivery_id,
                        "duplicate delivery ignored"
                    );
                }
                Err(error) => {
                    warn!(
                        event_name = "ingress.channel.accept_failed",
                        delivery_id = %envelope.delivery_id,
                        error = %error,
                        "ingress accept failed; continuing channel loop"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::{
        ChannelRunner, ChannelTransport, NoopChannelTransport, ReconnectPolicy, TransportError,
    };
    use crate::events::{
        ChannelEnvelope, InboundMessage, InboundPayload, IngressError, IngressHandler,
        IngressOutcome,
    };

    fn envelope(delivery_id: &str, message_id: &str, sender: Option<&str>) -> ChannelEnvelope {
        ChannelEnvelope {
            delivery_id: delivery_id.to_owned(),
            payload: InboundPayload {
                message_id: Some(message_id.to_owned()),
                sender_external_id: sender.map(str::to_owned),
                sender_name: None,
                content: Some("oi".to_owned()),
                content_type: Some("text".to_owned()),
                received_at: None,
            },
        }
    }

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<ChannelEnvelope>, TransportError>>,
        connect_attempts: usize,
        acknowledgements: Vec<String>,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<ChannelEnvelope>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    connect_attempts: 0,
                    acknowledgements: Vec::new(),
                }),
            }
        }

        async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }

        async fn acknowledgements(&self) -> Vec<String> {
            self.state.lock().await.acknowledgements.clone()
        }
    }

    #[async_trait]
    impl ChannelTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&self) -> Result<Option<ChannelEnvelope>, TransportError> {
            let mut state = self.state.lock().await;
            state.envelopes.pop_front().unwrap_or(Ok(None))
        }

        async fn acknowledge(&self, delivery_id: &str) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.acknowledgements.push(delivery_id.to_owned());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedIngress {
        results: Mutex<VecDeque<Result<IngressOutcome, IngressError>>>,
        accepted: Mutex<Vec<InboundMessage>>,
    }

    impl ScriptedIngress {
        fn with_results(results: Vec<Result<IngressOutcome, IngressError>>) -> Self {
            Self { results: Mutex::new(results.into()), accepted: Mutex::new(Vec::new()) }
        }

        async fn accepted(&self) -> Vec<InboundMessage> {
            self.accepted.lock().await.clone()
        }
    }

    #[async_trait]
    impl IngressHandler for ScriptedIngress {
        async fn accept(&self, message: InboundMessage) -> Result<IngressOutcome, IngressError> {
            self.accepted.lock().await.push(message);
            self.results.lock().await.pop_front().unwrap_or(Ok(IngressOutcome::Buffered))
        }
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![
                Ok(Some(envelope("dlv-1", "wamid-1", Some("+5511990030001")))),
                Ok(None),
            ],
        ));
        let ingress = Arc::new(ScriptedIngress::default());

        let runner = ChannelRunner::new(
            transport.clone(),
            ingress.clone(),
            ReconnectPolicy { max_retries: 2, base_delay_ms: 0, max_delay_ms: 0 },
        );

        runner.start().await.expect("runner should not fail");

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.acknowledgements().await, vec!["dlv-1"]);

        let accepted = ingress.accepted().await;
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].external_id, "+5511990030001");
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));

        let runner = ChannelRunner::new(
            transport.clone(),
            Arc::new(ScriptedIngress::default()),
            ReconnectPolicy { max_retries: 2, base_delay_ms: 0, max_delay_ms: 0 },
        );

        runner.start().await.expect("runner should degrade gracefully");
        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn malformed_payload_is_acknowledged_and_skipped() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                Ok(Some(envelope("dlv-1", "wamid-1", None))),
                Ok(Some(envelope("dlv-2", "wamid-2", Some("+5511990030002")))),
                Ok(None),
            ],
        ));
        let ingress = Arc::new(ScriptedIngress::default());

        let runner =
            ChannelRunner::new(transport.clone(), ingress.clone(), ReconnectPolicy::default());

        runner.start().await.expect("runner should not fail");

        assert_eq!(transport.acknowledgements().await, vec!["dlv-1", "dlv-2"]);

        let accepted = ingress.accepted().await;
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].message_id.0, "wamid-2");
    }

    #[tokio::test]
    async fn ingress_failures_do_not_stop_the_pump() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                Ok(Some(envelope("dlv-1", "wamid-1", Some("+5511990030003")))),
                Ok(Some(envelope("dlv-2", "wamid-2", Some("+5511990030003")))),
                Ok(None),
            ],
        ));
        let ingress = Arc::new(ScriptedIngress::with_results(vec![
            Err(IngressError::Processing("database unavailable".to_owned())),
            Ok(IngressOutcome::Duplicate),
        ]));

        let runner =
            ChannelRunner::new(transport.clone(), ingress.clone(), ReconnectPolicy::default());

        runner.start().await.expect("runner should not fail");

        assert_eq!(ingress.accepted().await.len(), 2);
        assert_eq!(transport.acknowledgements().await, vec!["dlv-1", "dlv-2"]);
    }

    #[tokio::test]
    async fn noop_transport_closes_cleanly() {
        let runner = ChannelRunner::new(
            Arc::new(NoopChannelTransport),
            Arc::new(ScriptedIngress::default()),
            ReconnectPolicy::default(),
        );

        runner.start().await.expect("noop transport should close cleanly");
    }

    #[test]
    fn backoff_is_exponential_with_a_cap() {
        let policy = ReconnectPolicy { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 };

        assert_eq!(policy.backoff(0), Duration::from_millis(250));
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(10), Duration::from_millis(5_000));
    }
}
