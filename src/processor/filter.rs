//! Predicate filtering and column projection.

use crate::error::StreamQlError;
use crate::event::{Event, SharedEvent};
use crate::processor::{
    ErrorSink, EventReceiver, MessageProcessor, OutputChannel, Processor,
};
use crate::sql::PredicateFn;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Forwards an event iff the compiled WHERE predicate holds.
///
/// A predicate type mismatch drops the event and surfaces as the `add`
/// error; the runner logs it without stopping the pipeline.
pub struct WhereFilter {
    id: String,
    predicate: PredicateFn,
    output: OutputChannel,
}

impl WhereFilter {
    pub fn new(predicate: PredicateFn, buffer: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            predicate,
            output: OutputChannel::new(buffer),
        }
    }
}

impl Processor for WhereFilter {
    fn id(&self) -> &str {
        &self.id
    }

    fn results(
        &self,
        _token: &CancellationToken,
        _consumer_id: &str,
        _errors: &ErrorSink,
    ) -> EventReceiver {
        self.output.take_receiver(&self.id)
    }

    fn close(&self) {
        self.output.close();
    }
}

#[async_trait]
impl MessageProcessor for WhereFilter {
    async fn add(
        &self,
        token: &CancellationToken,
        event: SharedEvent,
    ) -> Result<(), StreamQlError> {
        if !(self.predicate)(event.as_ref())? {
            return Ok(());
        }
        let sender = self.output.sender(&self.id)?;
        tokio::select! {
            _ = token.cancelled() => Err(StreamQlError::Cancelled),
            sent = sender.send(event) => {
                sent.map_err(|_| StreamQlError::ChannelClosed(self.id.clone()))
            }
        }
    }
}

/// Projects an event down to a fixed field list. Missing fields are omitted
/// from the output event, not nulled.
pub struct ColumnFilter {
    id: String,
    fields: Vec<String>,
    output: OutputChannel,
}

impl ColumnFilter {
    pub fn new(fields: Vec<String>, buffer: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            fields,
            output: OutputChannel::new(buffer),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

impl Processor for ColumnFilter {
    fn id(&self) -> &str {
        &self.id
    }

    fn results(
        &self,
        _token: &CancellationToken,
        _consumer_id: &str,
        _errors: &ErrorSink,
    ) -> EventReceiver {
        self.output.take_receiver(&self.id)
    }

    fn close(&self) {
        self.output.close();
    }
}

#[async_trait]
impl MessageProcessor for ColumnFilter {
    async fn add(
        &self,
        token: &CancellationToken,
        event: SharedEvent,
    ) -> Result<(), StreamQlError> {
        let mut data = HashMap::new();
        for field in &self.fields {
            if let Some(value) = event.field(field) {
                data.insert(field.clone(), value);
            }
        }
        let projected: SharedEvent = Arc::new(Event::new(event.timestamp(), data));

        let sender = self.output.sender(&self.id)?;
        tokio::select! {
            _ = token.cancelled() => Err(StreamQlError::Cancelled),
            sent = sender.send(projected) => {
                sent.map_err(|_| StreamQlError::ChannelClosed(self.id.clone()))
            }
        }
    }
}
