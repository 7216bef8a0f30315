use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::events::InboundMessage;

#[derive(Debug, Error)]
pub enum FlushError {
    #[error("flush handler failed: {0}")]
    Handler(String),
}

/// What the handler did with the batch. `Deferred` hands the batch back so
/// the debouncer can requeue it ahead of newer arrivals and re-arm the
/// window (used when the single-flight slot for the key is busy).
pub enum FlushDisposition {
    Completed,
    Deferred(Vec<InboundMessage>),
}

/// Receives one FIFO batch per elapsed window.
#[async_trait]
pub trait BatchFlushHandler: Send + Sync {
    async fn flush(
        &self,
        key: &str,
        batch: Vec<InboundMessage>,
    ) -> Result<FlushDisposition, FlushError>;
}

/// Keyed sliding-window buffer for bursty inbound messages. Each enqueue
/// bumps a per-key generation and arms a timer task; the task flushes only
/// if its generation is still current, so any newer arrival supersedes it
/// and a steady stream postpones the flush indefinitely. State is per key;
/// there is no global timer and no polling.
#[derive(Clone)]
pub struct MessageDebouncer {
    buffers: Arc<Mutex<HashMap<String, KeyBuffer>>>,
    window: Duration,
    handler: Arc<dyn BatchFlushHandler>,
}

#[derive(Default)]
struct KeyBuffer {
    messages: Vec<InboundMessage>,
    generation: u64,
}

impl MessageDebouncer {
    pub fn new(window: Duration, handler: Arc<dyn BatchFlushHandler>) -> Self {
        Self { buffers: Arc::new(Mutex::new(HashMap::new())), window, handler }
    }

    /// Appends the message to its sender's buffer and re-arms the window.
    /// The debounce key is the sender's external id.
    pub async fn enqueue(&self, message: InboundMessage) {
        let key = message.external_id.clone();
        let generation = {
            let mut buffers = self.buffers.lock().await;
            let buffer = buffers.entry(key.clone()).or_default();
            buffer.messages.push(message);
            buffer.generation += 1;
            buffer.generation
        };

        debug!(
            event_name = "debounce.message_buffered",
            external_id = %key,
            generation,
            "buffered inbound message and armed debounce window"
        );
        self.arm(key, generation);
    }

    /// Front-inserts a deferred batch so it flushes before anything that
    /// arrived while it was out, then re-arms the window.
    pub async fn requeue(&self, key: &str, batch: Vec<InboundMessage>) {
        if batch.is_empty() {
            return;
        }

        let generation = {
            let mut buffers = self.buffers.lock().await;
            let buffer = buffers.entry(key.to_owned()).or_default();
            let mut restored = batch;
            restored.append(&mut buffer.messages);
            buffer.messages = restored;
            buffer.generation += 1;
            buffer.generation
        };

        debug!(
            event_name = "debounce.batch_requeued",
            external_id = %key,
            generation,
            "requeued deferred batch and re-armed debounce window"
        );
        self.arm(key.to_owned(), generation);
    }

    fn arm(&self, key: String, generation: u64) {
        let debouncer = self.clone();
        tokio::spawn(async move {
            debouncer.fire(key, generation).await;
        });
    }

    async fn fire(&self, key: String, generation: u64) {
        tokio::time::sleep(self.window).await;

        // Snapshot-and-clear under the lock. A stale generation means a
        // newer message re-armed the window; that timer owns the flush now.
        // Removing the entry means a message landing mid-flush starts a
        // fresh buffer with its own window.
        let batch = {
            let mut buffers = self.buffers.lock().await;
            match buffers.get(&key) {
                Some(buffer) if buffer.generation == generation => {
                    buffers.remove(&key).map(|buffer| buffer.messages)
                }
                _ => None,
            }
        };
        let Some(batch) = batch else {
            return;
        };

        match self.handler.flush(&key, batch).await {
            Ok(FlushDisposition::Completed) => {}
            Ok(FlushDisposition::Deferred(batch)) => {
                debug!(
                    event_name = "debounce.batch_deferred",
                    external_id = %key,
                    "flush deferred by handler; requeueing batch"
                );
                self.requeue(&key, batch).await;
            }
            Err(error) => {
                warn!(
                    event_name = "debounce.flush_failed",
                    external_id = %key,
                    error = %error,
                    "batch flush failed"
                );
            }
        }
    }
}
