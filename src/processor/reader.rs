//! JetStream source.
//!
//! Each `results()` call spawns one background task owning one broker
//! consumer, so every downstream edge gets an independent, resumable read
//! position. Consumer names are deterministic per edge
//! (`"<subject>-<consumer_id>-reader"`), which lets the broker deduplicate
//! and resume consumers across restarts.

use crate::error::StreamQlError;
use crate::event::Event;
use crate::processor::{ErrorSink, EventReceiver, MessageProcessor, Processor};
use async_nats::jetstream;
use async_nats::jetstream::consumer::{AckPolicy, pull};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct SubjectReader {
    id: String,
    js: jetstream::Context,
    subject: String,
    buffer: usize,
}

impl SubjectReader {
    pub fn new(js: jetstream::Context, subject: impl Into<String>, buffer: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            js,
            subject: subject.into(),
            buffer,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    async fn consume(
        js: jetstream::Context,
        subject: String,
        consumer_name: String,
        token: CancellationToken,
        out: mpsc::Sender<crate::event::SharedEvent>,
        errors: ErrorSink,
    ) {
        let config = pull::Config {
            durable_name: Some(consumer_name.clone()),
            ack_policy: AckPolicy::Explicit,
            ..Default::default()
        };
        let consumer = match js.create_consumer_on_stream(config, subject.clone()).await {
            Ok(consumer) => consumer,
            Err(e) => {
                report(&errors, &token, StreamQlError::Broker(e.to_string())).await;
                return;
            }
        };
        tracing::debug!(subject, consumer_name, "consumer created");

        let mut messages = match consumer.messages().await {
            Ok(messages) => messages,
            Err(e) => {
                report(&errors, &token, StreamQlError::Broker(e.to_string())).await;
                return;
            }
        };

        loop {
            let message = tokio::select! {
                _ = token.cancelled() => return,
                next = messages.next() => next,
            };
            let message = match message {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    report(&errors, &token, StreamQlError::Broker(e.to_string())).await;
                    return;
                }
                // Broker stream ended.
                None => return,
            };

            let timestamp = match message.info() {
                Ok(info) => published_at(info.published.unix_timestamp(), info.published.nanosecond()),
                Err(e) => {
                    tracing::warn!(subject, error = %e, "message without metadata; skipped");
                    ack(&message, &subject).await;
                    continue;
                }
            };

            // Ack before delivery; the engine trades redelivery for flow.
            let event = Event::from_json(timestamp, &message.payload);
            ack(&message, &subject).await;

            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(subject, error = %e, "undecodable payload; skipped");
                    continue;
                }
            };

            tokio::select! {
                _ = token.cancelled() => return,
                sent = out.send(Arc::new(event)) => {
                    if sent.is_err() {
                        // Downstream went away; nothing left to feed.
                        return;
                    }
                }
            }
        }
    }
}

fn published_at(seconds: i64, nanos: u32) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(seconds, nanos).unwrap_or_else(Utc::now)
}

async fn ack(message: &jetstream::Message, subject: &str) {
    if let Err(e) = message.ack().await {
        tracing::warn!(subject, error = %e, "ack failed");
    }
}

async fn report(errors: &ErrorSink, token: &CancellationToken, error: StreamQlError) {
    tokio::select! {
        _ = token.cancelled() => {}
        _ = errors.send(error) => {}
    }
}

impl Processor for SubjectReader {
    fn id(&self) -> &str {
        &self.id
    }

    fn results(
        &self,
        token: &CancellationToken,
        consumer_id: &str,
        errors: &ErrorSink,
    ) -> EventReceiver {
        let (tx, rx) = mpsc::channel(self.buffer.max(1));
        let consumer_name = format!("{}-{}-reader", self.subject, consumer_id);
        tokio::spawn(Self::consume(
            self.js.clone(),
            self.subject.clone(),
            consumer_name,
            token.clone(),
            tx,
            errors.clone(),
        ));
        rx
    }

    fn close(&self) {
        // Consumer tasks unwind through the cancellation token.
    }
}

#[async_trait]
impl MessageProcessor for SubjectReader {
    /// Sources have no upstream; feeding one is a no-op.
    async fn add(
        &self,
        _token: &CancellationToken,
        _event: crate::event::SharedEvent,
    ) -> Result<(), StreamQlError> {
        Ok(())
    }
}
