//! Event model.
//!
//! Two event shapes flow through the dataflow: [`Event`], decoded from a
//! broker message, and [`JoinEvent`], the composite emitted by the sliding
//! window join. Both implement [`EventLike`]; processors only ever see
//! `Arc<dyn EventLike>` so joins can hold and re-emit events without copying.

use crate::error::StreamQlError;
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Shared handle to any event flowing through the graph.
pub type SharedEvent = Arc<dyn EventLike>;

/// Capability set common to all event shapes.
pub trait EventLike: fmt::Debug + fmt::Display + Send + Sync {
    /// Logical (event-time) timestamp.
    fn timestamp(&self) -> DateTime<Utc>;

    /// Field lookup. `None` when the field is absent.
    fn field(&self, name: &str) -> Option<Value>;

    /// String rendering of a field; empty string when absent.
    fn get_string(&self, name: &str) -> String {
        self.field(name).map(|v| v.to_string()).unwrap_or_default()
    }

    /// JSON rendering of the event's fields, used when republishing.
    fn to_json(&self) -> serde_json::Value;
}

/// A flat event: a timestamp plus an unordered field map.
#[derive(Debug, Clone)]
pub struct Event {
    timestamp: DateTime<Utc>,
    data: HashMap<String, Value>,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>, data: HashMap<String, Value>) -> Self {
        Self { timestamp, data }
    }

    /// Decode a JSON envelope. The payload must be a JSON object; each
    /// top-level entry becomes a field.
    pub fn from_json(timestamp: DateTime<Utc>, payload: &[u8]) -> Result<Self, StreamQlError> {
        let json: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| StreamQlError::Broker(format!("undecodable event payload: {e}")))?;
        let serde_json::Value::Object(map) = json else {
            return Err(StreamQlError::Broker(
                "event payload is not a JSON object".into(),
            ));
        };
        let data = map
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect();
        Ok(Self { timestamp, data })
    }

}

impl EventLike for Event {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn field(&self, name: &str) -> Option<Value> {
        self.data.get(name).cloned()
    }

    fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Sort fields so the rendering is stable.
        let mut fields: Vec<_> = self.data.iter().collect();
        fields.sort_by_key(|(k, _)| k.as_str());
        write!(f, "Event{{")?;
        for (i, (k, v)) in fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}: {v}")?;
        }
        write!(f, "}}")
    }
}

/// The composite produced by a join: a timestamp plus the two matched
/// sub-events. Field access requires `left.` / `right.` qualification;
/// unqualified names are absent.
#[derive(Debug, Clone)]
pub struct JoinEvent {
    timestamp: DateTime<Utc>,
    left: SharedEvent,
    right: SharedEvent,
}

impl JoinEvent {
    /// The composite's timestamp is the later of the two sides' event times,
    /// keeping the engine on event time end to end.
    pub fn new(left: SharedEvent, right: SharedEvent) -> Self {
        let timestamp = left.timestamp().max(right.timestamp());
        Self {
            timestamp,
            left,
            right,
        }
    }

    pub fn left(&self) -> &SharedEvent {
        &self.left
    }

    pub fn right(&self) -> &SharedEvent {
        &self.right
    }
}

impl EventLike for JoinEvent {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn field(&self, name: &str) -> Option<Value> {
        if let Some(rest) = name.strip_prefix("left.") {
            return self.left.field(rest);
        }
        if let Some(rest) = name.strip_prefix("right.") {
            return self.right.field(rest);
        }
        None
    }

    fn get_string(&self, name: &str) -> String {
        if let Some(rest) = name.strip_prefix("left.") {
            return self.left.get_string(rest);
        }
        if let Some(rest) = name.strip_prefix("right.") {
            return self.right.get_string(rest);
        }
        String::new()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "left": self.left.to_json(),
            "right": self.right.to_json(),
        })
    }
}

impl fmt::Display for JoinEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JoinEvent{{{}, left={}, right={}}}",
            self.timestamp.to_rfc3339(),
            self.left,
            self.right
        )
    }
}
