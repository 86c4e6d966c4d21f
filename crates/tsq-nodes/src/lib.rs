//! # tsq-nodes
//!
//! The operator node library (§4.3): `Source`, `Filter`, `GroupBy`,
//! `Downsample`, `Rate`, `Expression`, `Merger` (HA/Shard/Split), `Join`,
//! `TopN`, `Summarizer`, plus the shared `Node` contract and lifecycle
//! state machine the executor drives them through.

pub mod downsample;
pub mod expression;
pub mod filter;
pub mod groupby;
pub mod join;
pub mod merger;
pub mod node;
pub mod rate;
pub mod source;
pub mod state;
pub mod summarizer;
pub mod topn;

pub use downsample::{downsample_series, emitted_time_spec, parse_interval, DownsampleConfig};
pub use expression::Expr;
pub use filter::{filter_ids, Predicate, TagOp};
pub use groupby::{group_by_array, group_by_numeric, GroupByConfig};
pub use join::{align as join_align, JoinMode};
pub use merger::{merge_ha, merge_shard, split_by, ReplicaOutcome};
pub use node::{advance, ChildBarrier, Node, NodeDescriptor, NodeEvent, NodeKind, NodeOutput};
pub use rate::{compute_rate, RateConfig};
pub use source::SourceNode;
pub use state::{IllegalTransition, NodeState, NodeStateMachine};
pub use summarizer::summarize;
pub use topn::top_n;
