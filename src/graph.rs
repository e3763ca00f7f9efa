//! Processor graph construction and execution.
//!
//! [`QueryBuilder`] is the statement AST's visitor target: visiting a query
//! registers processors and edges, and resolves stream aliases per join side
//! while lowering ON clauses. [`QueryBuilder::build`] then rejects cycles
//! (Kahn's algorithm), resolves every edge into a bounded input channel by
//! calling the upstream's `results()` with a deterministic per-edge consumer
//! id, and yields a [`StreamGraph`].
//!
//! [`StreamGraph::run`] spawns one feed task per input channel. Per-event
//! `add` failures are logged and never abort the pipeline; the run ends only
//! when the cancellation token fires.

use crate::config::EngineConfig;
use crate::error::{SemanticError, StreamQlError};
use crate::processor::{
    ColumnFilter, ConsoleSink, DualInputProcessor, EquiJoinPredicate, ErrorSink, EventReceiver,
    MessageProcessor, ProcessorHandle, SlidingWindowJoin, SubjectReader, WhereFilter,
};
use crate::sql::{Expr, JoinWindow, SelectStmt, SourceNode};
use async_nats::jetstream;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Creates source processors for the streams a query reads from.
///
/// The seam that keeps the builder broker-agnostic: production uses
/// [`JetStreamSourceFactory`]; tests feed pipelines from in-memory channels.
pub trait SourceFactory: Send + Sync {
    fn create_source(&self, stream: &str) -> Result<ProcessorHandle, StreamQlError>;
}

/// Source factory backed by a JetStream context.
pub struct JetStreamSourceFactory {
    js: jetstream::Context,
    buffer: usize,
}

impl JetStreamSourceFactory {
    pub fn new(js: jetstream::Context, config: &EngineConfig) -> Self {
        Self {
            js,
            buffer: config.filter_buffer,
        }
    }
}

impl SourceFactory for JetStreamSourceFactory {
    fn create_source(&self, stream: &str) -> Result<ProcessorHandle, StreamQlError> {
        Ok(ProcessorHandle::Single(Arc::new(SubjectReader::new(
            self.js.clone(),
            stream,
            self.buffer,
        ))))
    }
}

/// Statement visitor and graph assembler.
pub struct QueryBuilder {
    sources: Arc<dyn SourceFactory>,
    config: EngineConfig,
    terminal: Option<Arc<dyn MessageProcessor>>,
    processors: HashMap<String, ProcessorHandle>,
    /// `(upstream, downstream)` pairs in insertion order. For the join the
    /// LHS edge is inserted first, which is what makes input 0 the left side.
    edges: Vec<(String, String)>,
    errors: Vec<SemanticError>,
}

impl QueryBuilder {
    pub fn new(sources: Arc<dyn SourceFactory>, config: EngineConfig) -> Self {
        Self {
            sources,
            config,
            terminal: None,
            processors: HashMap::new(),
            edges: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Replace the default [`ConsoleSink`] terminal.
    pub fn with_terminal(mut self, sink: Arc<dyn MessageProcessor>) -> Self {
        self.terminal = Some(sink);
        self
    }

    fn add_processor(&mut self, handle: ProcessorHandle, dependencies: &[&str]) {
        let id = handle.id().to_string();
        for dependency in dependencies {
            self.edges.push(((*dependency).to_string(), id.clone()));
        }
        self.processors.insert(id, handle);
    }

    // ── Visitor ──────────────────────────────────────────────────────────

    fn visit_select(&mut self, stmt: &SelectStmt) -> Result<(), StreamQlError> {
        let source = self.visit_source(&stmt.source)?;

        // `SELECT *` projects nothing away, so the source feeds the sink
        // directly; otherwise a ColumnFilter narrows the events first.
        let sink_upstream = if stmt.is_wildcard() {
            source
        } else {
            let fields = stmt.columns.iter().map(|c| c.lookup_key()).collect();
            let filter = ColumnFilter::new(fields, self.config.filter_buffer);
            let handle = ProcessorHandle::Single(Arc::new(filter));
            self.add_processor(handle.clone(), &[source.id()]);
            handle
        };

        let terminal = self
            .terminal
            .take()
            .unwrap_or_else(|| Arc::new(ConsoleSink::new()));
        let handle = ProcessorHandle::Single(terminal);
        self.add_processor(handle.clone(), &[sink_upstream.id()]);
        Ok(())
    }

    fn visit_source(&mut self, node: &SourceNode) -> Result<ProcessorHandle, StreamQlError> {
        match node {
            SourceNode::Stream { name, .. } => {
                let handle = self.sources.create_source(name)?;
                self.processors.insert(handle.id().to_string(), handle.clone());
                Ok(handle)
            }
            SourceNode::Where { input, predicate } => {
                let upstream = self.visit_source(input)?;
                let filter = WhereFilter::new(
                    predicate.compile_predicate(),
                    self.config.filter_buffer,
                );
                let handle = ProcessorHandle::Single(Arc::new(filter));
                self.add_processor(handle.clone(), &[upstream.id()]);
                Ok(handle)
            }
            SourceNode::Join(join) => {
                let lhs = self.visit_source(&join.lhs)?;
                let rhs = self.visit_source(&join.rhs)?;
                let predicates = self.lower_on_predicates(join);
                let processor =
                    SlidingWindowJoin::new(join.within, predicates, self.config.join_buffer);
                let handle = ProcessorHandle::Dual(Arc::new(processor));
                self.add_processor(handle.clone(), &[lhs.id(), rhs.id()]);
                Ok(handle)
            }
        }
    }

    // ── ON-clause lowering ───────────────────────────────────────────────

    /// Decompose an ON expression into equi-join predicates.
    ///
    /// The accepted shape is an AND-chain of `x.f = y.g` where one side is
    /// qualified by an alias of the join's left input and the other by an
    /// alias of its right input, in either order. Anything else accumulates
    /// a semantic error.
    fn lower_on_predicates(&mut self, join: &JoinWindow) -> Vec<EquiJoinPredicate> {
        let left_aliases = stream_aliases(&join.lhs);
        let right_aliases = stream_aliases(&join.rhs);
        let mut predicates = Vec::new();
        let errors_before = self.errors.len();

        for conjunct in join.on.conjuncts() {
            let Expr::Eq(a, b) = conjunct else {
                self.errors.push(SemanticError::unpositioned(format!(
                    "ON clause must be an AND-chain of equality comparisons, got {conjunct:?}"
                )));
                continue;
            };
            let (
                Expr::Field {
                    source: Some(source_a),
                    name: name_a,
                },
                Expr::Field {
                    source: Some(source_b),
                    name: name_b,
                },
            ) = (a.as_ref(), b.as_ref())
            else {
                self.errors.push(SemanticError::unpositioned(format!(
                    "ON equality must compare two alias-qualified stream fields, got {a:?} = {b:?}"
                )));
                continue;
            };

            if left_aliases.contains(source_a) && right_aliases.contains(source_b) {
                predicates.push(EquiJoinPredicate::on_fields(name_a.clone(), name_b.clone()));
            } else if left_aliases.contains(source_b) && right_aliases.contains(source_a) {
                predicates.push(EquiJoinPredicate::on_fields(name_b.clone(), name_a.clone()));
            } else {
                self.errors.push(SemanticError::unpositioned(format!(
                    "ON equality must pair one field from each join side; \
                     {source_a}.{name_a} = {source_b}.{name_b} does not"
                )));
            }
        }

        if predicates.is_empty() && self.errors.len() == errors_before {
            self.errors.push(SemanticError::unpositioned(
                "ON clause produced no equi-join predicate",
            ));
        }
        predicates
    }

    // ── Build ────────────────────────────────────────────────────────────

    /// Kahn's algorithm over the registered edges. Tree-shaped queries can't
    /// produce cycles today, but the graph API doesn't know that.
    fn check_acyclic(&self) -> Result<(), StreamQlError> {
        let mut in_degree: HashMap<&str, usize> = self
            .processors
            .keys()
            .map(|id| (id.as_str(), 0))
            .collect();
        for (_, to) in &self.edges {
            if let Some(degree) = in_degree.get_mut(to.as_str()) {
                *degree += 1;
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|&(_, degree)| *degree == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut visited = 0;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for (from, to) in &self.edges {
                if from.as_str() == id {
                    if let Some(degree) = in_degree.get_mut(to.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(to.as_str());
                        }
                    }
                }
            }
        }

        if visited < self.processors.len() {
            return Err(StreamQlError::Build(
                "cycle detected in processor graph".into(),
            ));
        }
        Ok(())
    }

    /// Visit the statement, then wire every edge into an input channel.
    pub fn build(
        mut self,
        stmt: &SelectStmt,
        token: &CancellationToken,
        errors: &ErrorSink,
    ) -> Result<StreamGraph, StreamQlError> {
        self.visit_select(stmt)?;
        if !self.errors.is_empty() {
            return Err(StreamQlError::Semantic(std::mem::take(&mut self.errors)));
        }
        self.check_acyclic()?;

        let mut inputs: HashMap<String, Vec<EventReceiver>> = HashMap::new();
        for (from, to) in &self.edges {
            let upstream = self.processors.get(from).ok_or_else(|| {
                StreamQlError::Build(format!("processor {from} not found"))
            })?;
            if !self.processors.contains_key(to) {
                return Err(StreamQlError::Build(format!(
                    "dependent processor {to} not found"
                )));
            }
            let consumer_id = format!("{from}-to-{to}");
            inputs
                .entry(to.clone())
                .or_default()
                .push(upstream.results(token, &consumer_id, errors));
        }

        Ok(StreamGraph {
            processors: self.processors,
            inputs,
        })
    }
}

/// A wired, runnable dataflow.
pub struct StreamGraph {
    processors: HashMap<String, ProcessorHandle>,
    inputs: HashMap<String, Vec<EventReceiver>>,
}

impl std::fmt::Debug for StreamGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamGraph")
            .field("processors", &self.processors)
            .field("input_keys", &self.inputs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StreamGraph {
    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    /// Spawn feed tasks for every input edge and block until cancellation.
    pub async fn run(mut self, token: CancellationToken) -> Result<(), StreamQlError> {
        for (id, channels) in self.inputs.drain() {
            let Some(processor) = self.processors.get(&id) else {
                return Err(StreamQlError::Build(format!("processor {id} not found")));
            };
            match processor {
                ProcessorHandle::Dual(dual) => {
                    if channels.len() != 2 && !channels.is_empty() {
                        return Err(StreamQlError::Build(format!(
                            "dual-input processor {id} requires exactly 2 inputs, got {}",
                            channels.len()
                        )));
                    }
                    for (index, channel) in channels.into_iter().enumerate() {
                        // Input 0 is the join's left side.
                        tokio::spawn(feed_dual(
                            dual.clone(),
                            channel,
                            index == 0,
                            token.clone(),
                        ));
                    }
                }
                ProcessorHandle::Single(single) => {
                    // Fan-in: one feed task per input channel.
                    for channel in channels {
                        tokio::spawn(feed_single(single.clone(), channel, token.clone()));
                    }
                }
            }
        }

        token.cancelled().await;
        Err(StreamQlError::Cancelled)
    }
}

async fn feed_single(
    processor: Arc<dyn MessageProcessor>,
    mut input: EventReceiver,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => return,
            received = input.recv() => match received {
                Some(event) => event,
                None => return,
            },
        };
        match processor.add(&token, event).await {
            Ok(()) | Err(StreamQlError::Cancelled) => {}
            Err(error) => {
                tracing::warn!(processor = processor.id(), %error, "event processing failed");
            }
        }
    }
}

async fn feed_dual(
    processor: Arc<dyn DualInputProcessor>,
    mut input: EventReceiver,
    is_left: bool,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => return,
            received = input.recv() => match received {
                Some(event) => event,
                None => return,
            },
        };
        let result = if is_left {
            processor.add_left(&token, event).await
        } else {
            processor.add_right(&token, event).await
        };
        match result {
            Ok(()) | Err(StreamQlError::Cancelled) => {}
            Err(error) => {
                tracing::warn!(
                    processor = processor.id(),
                    is_left,
                    %error,
                    "event processing failed"
                );
            }
        }
    }
}

/// Stream aliases reachable in a source subtree. An unaliased stream is
/// known by its own name.
fn stream_aliases(node: &SourceNode) -> HashSet<String> {
    let mut out = HashSet::new();
    collect_aliases(node, &mut out);
    out
}

fn collect_aliases(node: &SourceNode, out: &mut HashSet<String>) {
    match node {
        SourceNode::Stream { name, alias } => {
            out.insert(alias.clone().unwrap_or_else(|| name.clone()));
        }
        SourceNode::Where { input, .. } => collect_aliases(input, out),
        SourceNode::Join(join) => {
            collect_aliases(&join.lhs, out);
            collect_aliases(&join.rhs, out);
        }
    }
}
