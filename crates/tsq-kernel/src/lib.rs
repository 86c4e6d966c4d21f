//! # tsq-kernel
//!
//! Numeric interpolation and aggregation primitives shared by the
//! `GroupBy`, `Downsample`, and `Summarizer` nodes in `tsq-nodes`. Kept as
//! its own crate so node implementations stay thin wrappers around these
//! kernels plus their state-machine plumbing.

pub mod aggregate;
pub mod array;
pub mod fill;

pub use aggregate::{Aggregator, AggregatorKind, P2PercentileAggregator};
pub use array::{reduce_array, reduce_arrays_indexwise};
pub use fill::{fill_array_indexwise, interpolate_numeric, Neighbor, NumericFillPolicy, SummaryFillPolicy};
