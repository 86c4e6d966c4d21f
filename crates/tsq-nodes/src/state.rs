//! Node lifecycle state machine (§4.3, §5):
//!
//! `CREATED -> INITIALIZED -> RUNNING <-> AWAITING_CHILD -> COMPLETING ->
//! COMPLETE | FAILED`, with `CANCELLED` reachable from any non-terminal
//! state. Terminal states (`COMPLETE`, `FAILED`, `CANCELLED`) are final.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Created,
    Initialized,
    Running,
    AwaitingChild,
    Completing,
    Complete,
    Failed,
    Cancelled,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeState::Complete | NodeState::Failed | NodeState::Cancelled)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        if self.is_terminal() {
            return false;
        }
        if next == Cancelled {
            return true;
        }
        matches!(
            (self, next),
            (Created, Initialized)
                | (Initialized, Running)
                | (Running, AwaitingChild)
                | (AwaitingChild, Running)
                | (Running, Completing)
                | (AwaitingChild, Completing)
                | (Completing, Complete)
                | (Completing, Failed)
                | (Running, Failed)
                | (AwaitingChild, Failed)
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Tracks a single node's state and rejects illegal transitions, rather than
/// letting a node silently desync from the executor's view of it.
#[derive(Debug, Clone)]
pub struct NodeStateMachine {
    node_id: String,
    state: NodeState,
}

#[derive(Debug, thiserror::Error)]
#[error("node '{node_id}': illegal transition {from} -> {to}")]
pub struct IllegalTransition {
    pub node_id: String,
    pub from: NodeState,
    pub to: NodeState,
}

impl NodeStateMachine {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            state: NodeState::Created,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn transition(&mut self, next: NodeState) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalTransition {
                node_id: self.node_id.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}
