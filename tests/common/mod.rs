//! Shared helpers for integration tests: an in-memory source factory and a
//! collecting sink, so pipelines run without a broker.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streamql::error::StreamQlError;
use streamql::event::{Event, SharedEvent};
use streamql::processor::{
    ErrorSink, EventReceiver, MessageProcessor, Processor, ProcessorHandle,
};
use streamql::{SourceFactory, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Source that replays a fixed event list and then closes its channel.
pub struct ChannelSource {
    id: String,
    events: Vec<SharedEvent>,
}

impl ChannelSource {
    pub fn new(events: Vec<SharedEvent>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            events,
        }
    }
}

impl Processor for ChannelSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn results(
        &self,
        _token: &CancellationToken,
        _consumer_id: &str,
        _errors: &ErrorSink,
    ) -> EventReceiver {
        let (tx, rx) = mpsc::channel(self.events.len().max(1));
        for event in &self.events {
            tx.try_send(event.clone()).expect("preloaded channel overflow");
        }
        // Dropping the sender closes the channel once drained.
        rx
    }

    fn close(&self) {}
}

#[async_trait]
impl MessageProcessor for ChannelSource {
    async fn add(
        &self,
        _token: &CancellationToken,
        _event: SharedEvent,
    ) -> Result<(), StreamQlError> {
        Ok(())
    }
}

/// Source factory resolving stream names to canned event lists.
#[derive(Default)]
pub struct ChannelSourceFactory {
    streams: HashMap<String, Vec<SharedEvent>>,
}

impl ChannelSourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream(mut self, name: &str, events: Vec<SharedEvent>) -> Self {
        self.streams.insert(name.to_string(), events);
        self
    }
}

impl SourceFactory for ChannelSourceFactory {
    fn create_source(&self, stream: &str) -> Result<ProcessorHandle, StreamQlError> {
        let events = self
            .streams
            .get(stream)
            .cloned()
            .ok_or_else(|| StreamQlError::Build(format!("unknown test stream: {stream}")))?;
        Ok(ProcessorHandle::Single(Arc::new(ChannelSource::new(
            events,
        ))))
    }
}

/// Terminal that stores everything it receives.
pub struct CollectSink {
    id: String,
    received: Arc<Mutex<Vec<SharedEvent>>>,
}

impl CollectSink {
    pub fn new() -> (Arc<Self>, Arc<Mutex<Vec<SharedEvent>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            received: received.clone(),
        });
        (sink, received)
    }
}

impl Processor for CollectSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn results(
        &self,
        _token: &CancellationToken,
        _consumer_id: &str,
        _errors: &ErrorSink,
    ) -> EventReceiver {
        let (_tx, rx) = mpsc::channel(1);
        rx
    }

    fn close(&self) {}
}

#[async_trait]
impl MessageProcessor for CollectSink {
    async fn add(
        &self,
        _token: &CancellationToken,
        event: SharedEvent,
    ) -> Result<(), StreamQlError> {
        self.received.lock().unwrap().push(event);
        Ok(())
    }
}

/// Event-time helper anchored at 2024-05-01 10:00:00 UTC.
pub fn at(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + chrono::Duration::seconds(offset_secs)
}

/// Flat event with string fields.
pub fn event(offset_secs: i64, pairs: &[(&str, &str)]) -> SharedEvent {
    let data = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::Str(v.to_string())))
        .collect();
    Arc::new(Event::new(at(offset_secs), data))
}

/// Poll until `condition` holds or the timeout elapses.
pub async fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
