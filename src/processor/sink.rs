//! Terminal processors.
//!
//! A sink ends a pipeline branch: its `results()` channel never delivers.

use crate::error::StreamQlError;
use crate::event::SharedEvent;
use crate::processor::{ErrorSink, EventReceiver, EventSender, MessageProcessor, Processor};
use async_nats::jetstream;
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A channel that never delivers and never closes; the sender is parked in
/// `keepalive` for the sink's lifetime.
fn never_delivering(keepalive: &Mutex<Vec<EventSender>>) -> EventReceiver {
    let (sender, receiver) = tokio::sync::mpsc::channel(1);
    keepalive
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(sender);
    receiver
}

/// Logs every received event. The default terminal.
pub struct ConsoleSink {
    id: String,
    keepalive: Mutex<Vec<EventSender>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            keepalive: Mutex::new(Vec::new()),
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for ConsoleSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn results(
        &self,
        _token: &CancellationToken,
        _consumer_id: &str,
        _errors: &ErrorSink,
    ) -> EventReceiver {
        never_delivering(&self.keepalive)
    }

    fn close(&self) {}
}

#[async_trait]
impl MessageProcessor for ConsoleSink {
    async fn add(
        &self,
        _token: &CancellationToken,
        event: SharedEvent,
    ) -> Result<(), StreamQlError> {
        tracing::info!(event = %event, "result");
        Ok(())
    }
}

/// Republishes each event as JSON to a JetStream subject. Used when the
/// query's results should feed another stream instead of the console.
pub struct SubjectSink {
    id: String,
    js: jetstream::Context,
    subject: String,
    keepalive: Mutex<Vec<EventSender>>,
}

impl SubjectSink {
    pub fn new(js: jetstream::Context, subject: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            js,
            subject: subject.into(),
            keepalive: Mutex::new(Vec::new()),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

impl Processor for SubjectSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn results(
        &self,
        _token: &CancellationToken,
        _consumer_id: &str,
        _errors: &ErrorSink,
    ) -> EventReceiver {
        never_delivering(&self.keepalive)
    }

    fn close(&self) {}
}

#[async_trait]
impl MessageProcessor for SubjectSink {
    async fn add(
        &self,
        _token: &CancellationToken,
        event: SharedEvent,
    ) -> Result<(), StreamQlError> {
        let payload = serde_json::to_vec(&event.to_json())
            .map_err(|e| StreamQlError::Broker(format!("unserializable result: {e}")))?;
        self.js
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| StreamQlError::Broker(e.to_string()))?
            .await
            .map_err(|e| StreamQlError::Broker(e.to_string()))?;
        Ok(())
    }
}
