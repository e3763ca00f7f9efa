//! streamql — streaming SQL over NATS JetStream.
//!
//! Compiles a small SQL dialect (`SELECT ... FROM ... [JOIN ... WITHIN ...]
//! [WHERE ...]`) into a DAG of processors connected by bounded channels, and
//! runs the graph concurrently against JetStream subjects. Projection,
//! predicate filtering, and time-bounded equi-joins are supported; join state
//! is memory-resident and evicted by event-time sliding.
//!
//! # Pipeline
//!
//! ```text
//! SQL text -> sql::parse -> SelectStmt -> graph::QueryBuilder -> StreamGraph
//!                                              |
//!                                              +- SubjectReader     (source)
//!                                              +- WhereFilter       (predicate)
//!                                              +- ColumnFilter      (projection)
//!                                              +- SlidingWindowJoin (2-in, 1-out)
//!                                              +- ConsoleSink / SubjectSink
//! ```
//!
//! Parse and semantic errors fail compilation; per-event runtime errors are
//! logged and never stop a running pipeline. See [`error::StreamQlError`].

pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod processor;
pub mod sql;
pub mod value;

pub use config::EngineConfig;
pub use error::StreamQlError;
pub use event::{Event, EventLike, JoinEvent, SharedEvent};
pub use graph::{JetStreamSourceFactory, QueryBuilder, SourceFactory, StreamGraph};
pub use value::Value;
