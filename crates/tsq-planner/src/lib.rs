//! # tsq-planner
//!
//! Turns a declarative [`query::TimeSeriesQuery`] into an immutable DAG
//! description (§4.4): validate, expand, push down, compose, insert
//! mergers, attach sinks, fingerprint.

pub mod planner;
pub mod query;

pub use planner::{plan, Plan, PlanNodeKind, PlannedNode};
pub use query::{
    ExpressionQuery, FillSpec, FilterKind, FilterSet, FilterSpec, JoinModeSpec, MetricQuery,
    OutputSpec, RateSpec, TimeRange, TimeSeriesQuery,
};
