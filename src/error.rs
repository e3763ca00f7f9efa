//! Error types for streamql.
//!
//! All failures inside the engine are represented by [`StreamQlError`].
//! Errors are propagated via `Result<T, StreamQlError>` throughout the
//! codebase; the CLI driver renders them at the process boundary.
//!
//! # Error Classification
//!
//! Errors fall into three categories that determine pipeline behavior:
//! - **Query** — syntax errors, semantic errors, unresolved graph ids.
//!   Fatal to query compilation; the pipeline never starts.
//! - **Per-event** — type mismatches, events older than the join window,
//!   a full join output channel. Logged (and, where a sink exists, reported
//!   on the error channel); the pipeline keeps running.
//! - **Runtime** — broker failures and cancellation. These terminate the
//!   source or the whole run respectively.

use chrono::{DateTime, Utc};
use std::fmt;

/// A syntax error reported by the lexer or parser, with source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}:{} - {}", self.line, self.column, self.message)
    }
}

/// A semantic error found while lowering the parse tree or building the
/// processor graph (unknown time unit, unsupported ON shape, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl SemanticError {
    /// A semantic error with no useful source position.
    pub fn unpositioned(message: impl Into<String>) -> Self {
        Self {
            line: 0,
            column: 0,
            message: message.into(),
        }
    }
}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}:{} - {}", self.line, self.column, self.message)
    }
}

fn join_lines<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Primary error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum StreamQlError {
    // ── Query errors — fail compilation, pipeline never starts ───────────
    /// The query text could not be parsed.
    #[error("parse error: {}", join_lines(.0))]
    Parse(Vec<SyntaxError>),

    /// The query parsed but is not expressible by the engine.
    #[error("semantic error: {}", join_lines(.0))]
    Semantic(Vec<SemanticError>),

    /// The processor graph references an id that was never registered,
    /// or violates a structural invariant (cycle, input arity).
    #[error("graph build error: {0}")]
    Build(String),

    // ── Per-event errors — logged, pipeline keeps running ────────────────
    /// A value operation was applied across incompatible variants.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// An event's timestamp precedes the oldest retained join bucket.
    #[error("event too old: {0}")]
    EventTooOld(DateTime<Utc>),

    /// The join's bounded output channel was full; the emission was dropped.
    #[error("results channel full")]
    ResultsChannelFull,

    // ── Runtime errors ───────────────────────────────────────────────────
    /// A broker (JetStream) operation failed.
    #[error("broker error: {0}")]
    Broker(String),

    /// A processor's input or output channel closed while the pipeline
    /// was still running.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// The run context was cancelled. Normal shutdown path.
    #[error("cancelled")]
    Cancelled,

    /// Configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl StreamQlError {
    /// Whether this error is fatal to query compilation / pipeline startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StreamQlError::Parse(_) | StreamQlError::Semantic(_) | StreamQlError::Build(_)
        )
    }

    /// Whether this error is scoped to a single event. Per-event errors are
    /// logged by the runner and never abort the pipeline.
    pub fn is_per_event(&self) -> bool {
        matches!(
            self,
            StreamQlError::TypeMismatch(_)
                | StreamQlError::EventTooOld(_)
                | StreamQlError::ResultsChannelFull
        )
    }
}

impl From<async_nats::Error> for StreamQlError {
    fn from(err: async_nats::Error) -> Self {
        StreamQlError::Broker(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_error_renders_position() {
        let err = SyntaxError {
            line: 3,
            column: 14,
            message: "unexpected token".into(),
        };
        assert_eq!(err.to_string(), "line 3:14 - unexpected token");
    }

    #[test]
    fn classification() {
        assert!(StreamQlError::Parse(vec![]).is_fatal());
        assert!(StreamQlError::Build("x".into()).is_fatal());
        assert!(StreamQlError::ResultsChannelFull.is_per_event());
        assert!(!StreamQlError::Cancelled.is_per_event());
        assert!(!StreamQlError::Broker("down".into()).is_fatal());
    }
}
