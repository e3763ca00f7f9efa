//! Processor contracts and channel plumbing.
//!
//! Every node in the dataflow implements [`Processor`]; single-input nodes
//! additionally implement [`MessageProcessor`], the join implements
//! [`DualInputProcessor`]. Edges between processors are bounded tokio mpsc
//! channels: sends block when the downstream is saturated, which is how
//! backpressure propagates all the way into the broker reader.
//!
//! `results()` hands out the receiving end of a processor's output:
//! - source readers mint a fresh channel (and a broker consumer) per call,
//!   keyed by the caller-supplied `consumer_id`;
//! - everything else owns a single output channel whose receiver is taken by
//!   the first caller. A second taker gets a channel that never delivers.

mod filter;
mod join;
mod reader;
mod sink;

pub use filter::{ColumnFilter, WhereFilter};
pub use join::{EquiJoinPredicate, KeyFn, Side, SlidingWindowJoin};
pub use reader::SubjectReader;
pub use sink::{ConsoleSink, SubjectSink};

use crate::error::StreamQlError;
use crate::event::SharedEvent;
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type EventSender = mpsc::Sender<SharedEvent>;
pub type EventReceiver = mpsc::Receiver<SharedEvent>;

/// Write-only channel for errors raised outside a processor's `add` path
/// (broker failures inside source tasks, mainly).
pub type ErrorSink = mpsc::Sender<StreamQlError>;

/// Common contract of every dataflow node.
pub trait Processor: Send + Sync {
    /// Opaque unique id, stable for the processor's lifetime.
    fn id(&self) -> &str;

    /// The processor's output as a receive-only channel. See module docs for
    /// source vs. downstream semantics.
    fn results(
        &self,
        token: &CancellationToken,
        consumer_id: &str,
        errors: &ErrorSink,
    ) -> EventReceiver;

    /// Release the output channel. Downstream readers observe end-of-stream.
    fn close(&self);
}

/// A processor with a single input.
#[async_trait]
pub trait MessageProcessor: Processor {
    /// Feed one event. Per-event failures (type mismatches, ...) come back
    /// as errors; the runner logs them and keeps going.
    async fn add(&self, token: &CancellationToken, event: SharedEvent)
    -> Result<(), StreamQlError>;
}

/// A processor with exactly two inputs, fed independently.
#[async_trait]
pub trait DualInputProcessor: Processor {
    async fn add_left(
        &self,
        token: &CancellationToken,
        event: SharedEvent,
    ) -> Result<(), StreamQlError>;

    async fn add_right(
        &self,
        token: &CancellationToken,
        event: SharedEvent,
    ) -> Result<(), StreamQlError>;
}

/// A processor registered in the graph, tagged by input arity so the runner
/// can wire the right number of feed tasks.
#[derive(Clone)]
pub enum ProcessorHandle {
    Single(std::sync::Arc<dyn MessageProcessor>),
    Dual(std::sync::Arc<dyn DualInputProcessor>),
}

impl std::fmt::Debug for ProcessorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessorHandle::Single(p) => f.debug_tuple("Single").field(&p.id()).finish(),
            ProcessorHandle::Dual(p) => f.debug_tuple("Dual").field(&p.id()).finish(),
        }
    }
}

impl ProcessorHandle {
    pub fn id(&self) -> &str {
        match self {
            ProcessorHandle::Single(p) => p.id(),
            ProcessorHandle::Dual(p) => p.id(),
        }
    }

    pub fn results(
        &self,
        token: &CancellationToken,
        consumer_id: &str,
        errors: &ErrorSink,
    ) -> EventReceiver {
        match self {
            ProcessorHandle::Single(p) => p.results(token, consumer_id, errors),
            ProcessorHandle::Dual(p) => p.results(token, consumer_id, errors),
        }
    }

    pub fn close(&self) {
        match self {
            ProcessorHandle::Single(p) => p.close(),
            ProcessorHandle::Dual(p) => p.close(),
        }
    }
}

/// Single-owner output channel shared by filters, sinks, and the join.
///
/// The sender side lives behind a mutex so `close()` can drop it, which is
/// what propagates end-of-stream downstream.
pub(crate) struct OutputChannel {
    sender: Mutex<Option<EventSender>>,
    receiver: Mutex<Option<EventReceiver>>,
}

impl OutputChannel {
    pub(crate) fn new(capacity: usize) -> Self {
        // A zero-capacity bounded channel is not constructible.
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Clone of the live sender, or `ChannelClosed` after `close()`.
    pub(crate) fn sender(&self, processor_id: &str) -> Result<EventSender, StreamQlError> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| StreamQlError::ChannelClosed(processor_id.to_string()))
    }

    /// Take the receiving end. The first caller gets the real channel; later
    /// callers get one that never delivers (a processor's output feeds
    /// exactly one edge).
    pub(crate) fn take_receiver(&self, processor_id: &str) -> EventReceiver {
        let taken = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match taken {
            Some(receiver) => receiver,
            None => {
                tracing::warn!(
                    processor_id,
                    "results() called twice; returning a dead channel"
                );
                let (_sender, receiver) = mpsc::channel(1);
                receiver
            }
        }
    }

    pub(crate) fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
