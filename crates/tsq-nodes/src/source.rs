//! `Source`: binds to a storage [`DataSource`] plugin and emits raw
//! results (§4.3). Errors surface but do not by themselves abort the
//! pipeline — an HA/shard merger above decides survivability.

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use tsq_core::{DataSource, FetchOutcome, QueryResult, TsqError, TypeToken};

use crate::node::{Node, NodeDescriptor, NodeKind, NodeOutput};
use crate::state::{NodeState, NodeStateMachine};

pub struct SourceNode {
    id: String,
    source: Box<dyn DataSource>,
    state: NodeStateMachine,
    types: Vec<TypeToken>,
}

impl SourceNode {
    pub fn new(id: impl Into<String>, source: Box<dyn DataSource>) -> Self {
        let id = id.into();
        Self {
            state: NodeStateMachine::new(id.clone()),
            id,
            source,
            types: vec![TypeToken::NUMERIC, TypeToken::NUMERIC_ARRAY, TypeToken::NUMERIC_SUMMARY],
        }
    }

    /// Pull batches from the underlying `DataSource` until exhaustion or a
    /// deadline, emitting each through `out` and finishing with a single
    /// `emit_complete`/`emit_error` (§4.5 "triggers each leaf source's
    /// `fetch()`").
    pub async fn run(&mut self, deadline: Instant, out: &mut NodeOutput) -> Result<(), TsqError> {
        crate::node::advance(&mut self.state, NodeState::Initialized)?;
        crate::node::advance(&mut self.state, NodeState::Running)?;

        // Emitted under this node's own id, not the underlying `DataSource`'s
        // id: downstream barriers (mergers, joins) key their expected set off
        // the planner graph's edge labels, which name upstream *node* ids.
        let source_tag = self.id.clone();
        loop {
            match self.source.fetch_next(deadline).await {
                Ok(FetchOutcome::Result(result)) => {
                    debug!(node = %self.id, source = %source_tag, "source batch fetched");
                    out.emit_next(&source_tag, result).await?;
                }
                Ok(FetchOutcome::Exhausted) => {
                    crate::node::advance(&mut self.state, NodeState::Completing)?;
                    out.emit_complete(&source_tag).await;
                    crate::node::advance(&mut self.state, NodeState::Complete)?;
                    return Ok(());
                }
                Err(err) => {
                    warn!(node = %self.id, source = %source_tag, error = %err, "source fetch failed");
                    out.emit_error(&source_tag, clone_for_emit(&err)).await;
                    if err.is_transient() {
                        crate::node::advance(&mut self.state, NodeState::Completing)?;
                        crate::node::advance(&mut self.state, NodeState::Complete)?;
                    } else {
                        crate::node::advance(&mut self.state, NodeState::Failed)?;
                    }
                    return Err(err);
                }
            }
        }
    }
}

fn clone_for_emit(err: &TsqError) -> TsqError {
    match err {
        TsqError::SourceTimeout { source } => TsqError::SourceTimeout { source: source.clone() },
        TsqError::SourceFailed { source, reason } => TsqError::SourceFailed {
            source: source.clone(),
            reason: reason.clone(),
        },
        other => TsqError::Internal(other.to_string()),
    }
}

#[async_trait]
impl Node for SourceNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            id: self.id.clone(),
            kind: NodeKind::Source,
            config_summary: format!("source={}", self.source.id()),
        }
    }

    fn types(&self) -> &[TypeToken] {
        &self.types
    }

    fn state(&self) -> NodeState {
        self.state.state()
    }

    async fn on_next(&mut self, _source: &str, _result: QueryResult, _out: &mut NodeOutput) -> Result<(), TsqError> {
        // Sources have no upstream; the executor drives them via `run`
        // instead of feeding them events.
        Err(TsqError::Internal("SourceNode has no upstream to receive on_next from".into()))
    }

    async fn on_error(&mut self, _source: &str, err: TsqError, _out: &mut NodeOutput) -> Result<(), TsqError> {
        Err(err)
    }

    async fn on_complete(&mut self, _source: &str, _out: &mut NodeOutput) -> Result<(), TsqError> {
        Ok(())
    }
}
