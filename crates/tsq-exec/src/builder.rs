//! Reconstructs the structured runtime configuration each operator node
//! needs (a `Predicate` tree, a `DownsampleConfig`, an `Expr`, ...) from the
//! original [`TimeSeriesQuery`], given only a [`Plan`] node's id.
//!
//! [`PlannedNode::config_summary`] is a display string (`"filter_set=fs1"`),
//! not structured data — intentionally, so the planner's fingerprinting and
//! tracing stay decoupled from the node library's config shapes. This module
//! is the other half: it re-derives each node's owning `MetricQuery` /
//! `ExpressionQuery` / `OutputSpec` from its planner id and builds the
//! config `pipeline.rs` hands to the matching `tsq-exec::operator` node,
//! by mirroring the exact id format strings `tsq-planner::planner` uses
//! rather than touching the planner itself.

use std::collections::HashMap;

use tsq_core::{datasource::DataSourceConfig, Resolution, Timestamp, TsqError};
use tsq_kernel::{AggregatorKind, NumericFillPolicy};
use tsq_nodes::{DownsampleConfig, Expr, GroupByConfig, JoinMode, Predicate, RateConfig};
use tsq_planner::{FilterKind, JoinModeSpec, TimeSeriesQuery};

use crate::config::{EngineConfig, ShardPartialFailurePolicy};
use crate::convert::{build_predicate, fill_to_policy, parse_aggregator, resolve_time_range};

/// Fill applied where the query grammar has no dedicated field for it
/// (downsample empty buckets, group-by partition gaps) — an Open Question
/// resolved in `DESIGN.md`.
const DEFAULT_GAP_FILL: NumericFillPolicy = NumericFillPolicy::Null;
const DEFAULT_AGGREGATOR: &str = "avg";

fn malformed(node_id: &str, expected_suffix: &str) -> TsqError {
    TsqError::Internal(format!("node id '{node_id}' does not match the expected '{expected_suffix}' shape"))
}

fn owning_metric<'a>(query: &'a TimeSeriesQuery, mid: &str, node_id: &str) -> Result<&'a tsq_planner::MetricQuery, TsqError> {
    query
        .metric_ids()
        .get(mid)
        .copied()
        .ok_or_else(|| TsqError::Internal(format!("node '{node_id}': no metric '{mid}'")))
}

pub struct FilterNodeConfig {
    pub predicate: Predicate,
}

pub fn filter_config(query: &TimeSeriesQuery, node_id: &str) -> Result<FilterNodeConfig, TsqError> {
    let (mid, fs_id) = node_id.split_once("::filter::").ok_or_else(|| malformed(node_id, "{metric}::filter::{filter_set}"))?;
    owning_metric(query, mid, node_id)?;
    let fs = query
        .filter_set_ids()
        .get(fs_id)
        .copied()
        .ok_or_else(|| TsqError::Internal(format!("filter node '{node_id}': no filter_set '{fs_id}'")))?;
    Ok(FilterNodeConfig { predicate: build_predicate(fs)? })
}

pub struct DownsampleNodeConfig {
    pub config: DownsampleConfig,
    pub start: Timestamp,
    pub end: Timestamp,
}

pub fn downsample_config(query: &TimeSeriesQuery, node_id: &str) -> Result<DownsampleNodeConfig, TsqError> {
    let mid = node_id.strip_suffix("::downsample").ok_or_else(|| malformed(node_id, "{metric}::downsample"))?;
    let metric = owning_metric(query, mid, node_id)?;
    let downsampler = metric
        .downsampler
        .as_deref()
        .ok_or_else(|| TsqError::Internal(format!("downsample node '{node_id}': metric '{mid}' has no downsampler")))?;
    let interval_nanos = tsq_nodes::parse_interval(downsampler)?;
    let aggregator = parse_aggregator(metric.aggregator.as_deref().unwrap_or(DEFAULT_AGGREGATOR))?;
    let (start, end) = resolve_time_range(&query.time)?;
    Ok(DownsampleNodeConfig {
        config: DownsampleConfig {
            interval_nanos,
            aggregator,
            empty_bucket_fill: DEFAULT_GAP_FILL,
            timezone: query.time.timezone.clone(),
        },
        start,
        end,
    })
}

pub struct RateNodeConfig {
    pub config: RateConfig,
}

pub fn rate_config(query: &TimeSeriesQuery, node_id: &str) -> Result<RateNodeConfig, TsqError> {
    let mid = node_id.strip_suffix("::rate").ok_or_else(|| malformed(node_id, "{metric}::rate"))?;
    let metric = owning_metric(query, mid, node_id)?;
    let rate = metric
        .rate
        .as_ref()
        .ok_or_else(|| TsqError::Internal(format!("rate node '{node_id}': metric '{mid}' has no rate spec")))?;
    Ok(RateNodeConfig {
        config: RateConfig {
            is_counter: rate.is_counter,
            counter_max: rate.counter_max.unwrap_or(f64::MAX),
            reset_value: rate.reset_value.unwrap_or(0.0),
        },
    })
}

pub struct GroupByNodeConfig {
    pub config: GroupByConfig,
    pub fill: NumericFillPolicy,
}

pub fn group_by_config(query: &TimeSeriesQuery, node_id: &str) -> Result<GroupByNodeConfig, TsqError> {
    let mid = node_id.strip_suffix("::group_by").ok_or_else(|| malformed(node_id, "{metric}::group_by"))?;
    let metric = owning_metric(query, mid, node_id)?;
    let aggregator = parse_aggregator(metric.aggregator.as_deref().unwrap_or(DEFAULT_AGGREGATOR))?;
    Ok(GroupByNodeConfig {
        config: GroupByConfig { group_keys: metric.group_by.clone(), aggregator },
        fill: DEFAULT_GAP_FILL,
    })
}

pub struct MergerHaNodeConfig {
    pub reducer: AggregatorKind,
}

pub fn merger_ha_config(query: &TimeSeriesQuery, node_id: &str) -> Result<MergerHaNodeConfig, TsqError> {
    let mid = node_id.strip_suffix("::merger").ok_or_else(|| malformed(node_id, "{metric}::merger"))?;
    let metric = owning_metric(query, mid, node_id)?;
    let reducer = parse_aggregator(metric.aggregator.as_deref().unwrap_or(DEFAULT_AGGREGATOR))?;
    Ok(MergerHaNodeConfig { reducer })
}

pub struct MergerShardNodeConfig {
    pub allow_partial_policy: ShardPartialFailurePolicy,
}

/// Shard tolerance is a process-wide knob (`EngineConfig`), not something
/// the query grammar expresses per metric.
pub fn merger_shard_config(engine: &EngineConfig) -> MergerShardNodeConfig {
    MergerShardNodeConfig { allow_partial_policy: engine.shard_partial_failure }
}

pub struct JoinExpressionNodeConfig {
    pub mode: JoinMode,
    pub fill: NumericFillPolicy,
    pub expr: Expr,
}

/// `node_id` is the expression's own id (`"{expr_id}::expr"`) — the variable
/// `expected` set comes separately, from the paired join node's incoming
/// plan edges (§4.4's labeling scheme), not from this lookup.
pub fn join_expression_config(query: &TimeSeriesQuery, node_id: &str) -> Result<JoinExpressionNodeConfig, TsqError> {
    let eid = node_id.strip_suffix("::expr").ok_or_else(|| malformed(node_id, "{expression}::expr"))?;
    let expr_q = query
        .expression_ids()
        .get(eid)
        .copied()
        .ok_or_else(|| TsqError::Internal(format!("expression node '{node_id}': no expression '{eid}'")))?;
    let mode = match expr_q.join {
        JoinModeSpec::Intersection => JoinMode::Intersection,
        JoinModeSpec::Union => JoinMode::Union,
    };
    Ok(JoinExpressionNodeConfig {
        mode,
        fill: fill_to_policy(expr_q.fill),
        expr: Expr::parse(&expr_q.expr)?,
    })
}

/// `node_id` is the sink's own id (`"{output_id}::sink"`).
pub fn sink_alias(query: &TimeSeriesQuery, node_id: &str) -> Result<Option<String>, TsqError> {
    let oid = node_id.strip_suffix("::sink").ok_or_else(|| malformed(node_id, "{output}::sink"))?;
    let output = query
        .outputs
        .iter()
        .find(|o| o.id == oid)
        .ok_or_else(|| TsqError::Internal(format!("sink node '{node_id}': no output '{oid}'")))?;
    Ok(output.alias.clone())
}

/// `node_id` is `"{metric_id}::source::{source_name}"`; returns the bare
/// source name a [`crate::pipeline::SourceFactory`] is keyed by.
pub fn source_name(node_id: &str) -> Result<&str, TsqError> {
    node_id
        .split_once("::source::")
        .map(|(_, src)| src)
        .ok_or_else(|| malformed(node_id, "{metric}::source::{source}"))
}

/// The `DataSourceConfig` handed to `DataSource::init` for a source node.
/// Only `Literal` filters translate into the flat `tag_filters` map; a
/// source advertising `push_down_filter` for a `Wildcard`/`Regex`/`Range`
/// filter set is trusted to interpret its own richer config beyond this.
pub fn data_source_config(query: &TimeSeriesQuery, node_id: &str) -> Result<DataSourceConfig, TsqError> {
    let (mid, _) = node_id.split_once("::source::").ok_or_else(|| malformed(node_id, "{metric}::source::{source}"))?;
    let metric = owning_metric(query, mid, node_id)?;
    let mut tag_filters = HashMap::new();
    if let Some(fs_id) = &metric.filter_set {
        if let Some(fs) = query.filter_set_ids().get(fs_id.as_str()) {
            for f in &fs.filters {
                if f.kind == FilterKind::Literal {
                    tag_filters.insert(f.tag.clone(), f.value.clone());
                }
            }
        }
    }
    Ok(DataSourceConfig {
        metric: metric.metric.clone(),
        namespace: metric.namespace.clone(),
        tag_filters,
        extra: HashMap::new(),
    })
}

/// The query-wide default resolution results carry until a node overrides
/// it (no per-metric resolution field exists in the grammar today).
pub fn default_resolution() -> Resolution {
    Resolution::Millis
}
