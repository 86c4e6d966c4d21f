//! # tsq-exec
//!
//! The DAG executor (§4.5, §5): turns a [`tsq_planner::Plan`] into a
//! running pipeline of node tasks, scheduled onto a bounded [`WorkerPool`],
//! threaded through a shared [`PipelineContext`] (deadline, cancellation,
//! per-query metrics), and delivering a single terminal callback to the
//! caller's [`tsq_core::Sink`].
//!
//! ## Key components
//!
//! - **Config** ([`config`]): `EngineConfig`, loaded from YAML/JSON.
//! - **Context** ([`context`]): `PipelineContext`, `WorkerPool`, the
//!   process-wide `RunningQueryRegistry`.
//! - **Translation** ([`convert`], [`builder`]): from the declarative query
//!   grammar into the node library's runtime configs.
//! - **Nodes** ([`operator`]): the `tsq-exec`-side `Node` impls — `Filter`,
//!   `Downsample`, `Rate`, `GroupBy`, `Merger` (HA/Shard), the fused
//!   `Join`+`Expression` node.
//! - **Wiring** ([`pipeline`]): builds the channel graph from a `Plan` and
//!   drives every node to completion.
//! - **Metrics** ([`metrics`]): per-query counters.

pub mod builder;
pub mod config;
pub mod context;
pub mod convert;
pub mod metrics;
pub mod operator;
pub mod pipeline;

pub use config::{EngineConfig, ShardPartialFailurePolicy};
pub use context::{global_registry, PipelineContext, RunningQueryRegistry, WorkerPool};
pub use metrics::{QueryMetrics, QueryMetricsSnapshot};
pub use pipeline::{run, SourceFactory};
