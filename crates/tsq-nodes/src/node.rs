//! The operator contract (§4.3): `config`, `types()`, and the
//! `on_next`/`on_error`/`on_complete` handlers the executor drives.
//!
//! `newIterator` from the spec's Java-flavored phrasing becomes, in this
//! port, each node owning its own lazy [`tsq_core::ValueCursor`] use
//! internally rather than exposing one generically — the cursor machinery
//! lives in `tsq-core::series` and node bodies call it directly.

use async_trait::async_trait;
use tokio::sync::mpsc;

use tsq_core::{QueryResult, TsqError, TypeToken};

use crate::state::{NodeState, NodeStateMachine};

/// What flows on the channel between a node and its downstream consumers,
/// one addressable per upstream `source` tag (§4.2).
#[derive(Debug)]
pub enum NodeEvent {
    Next(QueryResult),
    Complete { source: String },
    Error { source: String, err: TsqError },
}

/// A small, stable label for tracing spans and planner fingerprints —
/// grounded in how `rde_core::Operator::name()` feeds the teacher's
/// transform spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Source,
    Filter,
    GroupBy,
    Downsample,
    Rate,
    Expression,
    MergerHa,
    MergerShard,
    MergerSplit,
    Join,
    TopN,
    Summarizer,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Source => "source",
            NodeKind::Filter => "filter",
            NodeKind::GroupBy => "group_by",
            NodeKind::Downsample => "downsample",
            NodeKind::Rate => "rate",
            NodeKind::Expression => "expression",
            NodeKind::MergerHa => "merger_ha",
            NodeKind::MergerShard => "merger_shard",
            NodeKind::MergerSplit => "merger_split",
            NodeKind::Join => "join",
            NodeKind::TopN => "top_n",
            NodeKind::Summarizer => "summarizer",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    pub id: String,
    pub kind: NodeKind,
    pub config_summary: String,
}

/// Handle a node uses to emit events to every registered downstream. Owns
/// the per-source sequence counters so ordering (§4.2, §8 "Ordering") is
/// enforced at the emission point rather than trusted to callers.
pub struct NodeOutput {
    node_id: String,
    downstreams: Vec<mpsc::Sender<NodeEvent>>,
    sequence: std::collections::HashMap<String, u64>,
}

impl NodeOutput {
    pub fn new(node_id: impl Into<String>, downstreams: Vec<mpsc::Sender<NodeEvent>>) -> Self {
        Self {
            node_id: node_id.into(),
            downstreams,
            sequence: std::collections::HashMap::new(),
        }
    }

    /// Emit a result for `source`, stamping the next sequence id for that
    /// (node, source) pair and fanning it out to every downstream.
    pub async fn emit_next(&mut self, source: &str, mut result: QueryResult) -> Result<(), TsqError> {
        let seq = self.sequence.entry(source.to_string()).or_insert(0);
        result.sequence_id = *seq;
        *seq += 1;
        result.node_id = self.node_id.clone();
        for tx in &self.downstreams {
            let _ = tx.send(NodeEvent::Next(result.clone())).await;
        }
        Ok(())
    }

    pub async fn emit_complete(&mut self, source: &str) {
        for tx in &self.downstreams {
            let _ = tx
                .send(NodeEvent::Complete {
                    source: source.to_string(),
                })
                .await;
        }
    }

    pub async fn emit_error(&mut self, source: &str, err: TsqError) {
        for tx in &self.downstreams {
            let _ = tx
                .send(NodeEvent::Error {
                    source: source.to_string(),
                    err: clone_error(&err),
                })
                .await;
        }
    }
}

/// `TsqError` isn't `Clone` (it wraps `anyhow::Error`); fan-out to multiple
/// downstreams needs an independent copy per edge, so errors are
/// re-stringified rather than shared.
fn clone_error(err: &TsqError) -> TsqError {
    TsqError::Internal(err.to_string())
}

/// The operator contract every node kind implements (§4.3).
#[async_trait]
pub trait Node: Send {
    fn descriptor(&self) -> NodeDescriptor;

    /// Value-type tokens this node can consume/produce.
    fn types(&self) -> &[TypeToken];

    fn state(&self) -> NodeState;

    async fn on_next(&mut self, source: &str, result: QueryResult, out: &mut NodeOutput) -> Result<(), TsqError>;

    async fn on_error(&mut self, source: &str, err: TsqError, out: &mut NodeOutput) -> Result<(), TsqError>;

    async fn on_complete(&mut self, source: &str, out: &mut NodeOutput) -> Result<(), TsqError>;
}

/// Shared bookkeeping embedded by nodes that must await every child source
/// before completing (`GroupBy`, `Merger`, `Join`, aggregation barriers in
/// general, §4.5 "buffer until all upstream sources signal").
pub struct ChildBarrier {
    expected: Vec<String>,
    completed: std::collections::HashSet<String>,
    failed: std::collections::HashMap<String, TsqError>,
}

impl ChildBarrier {
    pub fn new(expected: Vec<String>) -> Self {
        Self {
            expected,
            completed: std::collections::HashSet::new(),
            failed: std::collections::HashMap::new(),
        }
    }

    pub fn mark_complete(&mut self, source: &str) {
        self.completed.insert(source.to_string());
    }

    pub fn mark_failed(&mut self, source: &str, err: TsqError) {
        self.failed.insert(source.to_string(), err);
    }

    pub fn is_satisfied(&self) -> bool {
        self.expected
            .iter()
            .all(|s| self.completed.contains(s) || self.failed.contains_key(s))
    }

    pub fn healthy_count(&self) -> usize {
        self.completed.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &TsqError)> {
        self.failed.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Helper for `Node` impls to advance their embedded [`NodeStateMachine`]
/// and surface an `INTERNAL` error on illegal transitions instead of
/// panicking mid-pipeline.
pub fn advance(machine: &mut NodeStateMachine, next: NodeState) -> Result<(), TsqError> {
    machine
        .transition(next)
        .map_err(|e| TsqError::Internal(e.to_string()))
}
