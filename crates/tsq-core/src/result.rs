//! The Result Channel: `QueryResult` is the unit of data flowing between
//! nodes (§4.2), `TimeSpecification` declares an aligned time grid (§3).

use std::sync::Arc;

use crate::series::TimeSeries;
use crate::timestamp::{Resolution, Timestamp};

/// (start, end, interval, timezone). Present on a result iff the result is
/// aligned (downsampled); absent for raw results.
///
/// DST policy (Open Question in spec §9, resolved in DESIGN.md): `timezone`
/// is an IANA name carried for display/debugging, but calendar alignment
/// itself is computed against a fixed UTC offset resolved once per query,
/// not against per-bucket DST transitions.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimeSpecification {
    pub start: Timestamp,
    pub end: Timestamp,
    /// Duration string, e.g. "2s", "1h", "1d" — parsed by the planner/kernel
    /// into nanoseconds for bucketing.
    pub interval: String,
    pub timezone: String,
}

impl TimeSpecification {
    pub fn new(start: Timestamp, end: Timestamp, interval: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            start,
            end,
            interval: interval.into(),
            timezone: timezone.into(),
        }
    }
}

/// A batch emitted by one node for one logical data source.
///
/// Ownership: the emitting node owns the result until all downstream nodes
/// signal completion for it, then it is released (optionally back to a
/// pool). That release protocol lives in the executor; this type is just
/// the payload.
///
/// Series are `Arc`-shared rather than uniquely owned so a node with more
/// than one downstream consumer can fan out the same batch to each without
/// re-deriving its series data per edge; `QueryResult` itself derives
/// `Clone` on that basis (a shallow, refcount-bumping copy).
#[derive(Clone)]
pub struct QueryResult {
    pub series: Vec<Arc<dyn TimeSeries>>,
    pub time_spec: Option<TimeSpecification>,
    pub resolution: Resolution,
    /// Monotonically increasing per (node, data_source) pair, for streaming
    /// sub-results (§4.2, §8 "Ordering").
    pub sequence_id: u64,
    /// Logical source tag this batch is addressed from, e.g. an upstream
    /// node id or a replica/shard name.
    pub data_source: String,
    /// Id of the node that emitted this batch.
    pub node_id: String,
    /// Non-empty only on a `PARTIAL_RESULT` completion (§7).
    pub warnings: Vec<String>,
    /// Set when this batch was produced after cancellation was requested;
    /// it may still reach the sink but is marked as such (§5).
    pub cancelled: bool,
}

impl QueryResult {
    pub fn new(
        node_id: impl Into<String>,
        data_source: impl Into<String>,
        sequence_id: u64,
        resolution: Resolution,
        series: Vec<Arc<dyn TimeSeries>>,
    ) -> Self {
        Self {
            series,
            time_spec: None,
            resolution,
            sequence_id,
            data_source: data_source.into(),
            node_id: node_id.into(),
            warnings: Vec::new(),
            cancelled: false,
        }
    }

    pub fn with_time_spec(mut self, spec: TimeSpecification) -> Self {
        self.time_spec = Some(spec);
        self
    }

    pub fn with_warning(mut self, w: impl Into<String>) -> Self {
        self.warnings.push(w.into());
        self
    }

    pub fn mark_cancelled(mut self) -> Self {
        self.cancelled = true;
        self
    }
}
