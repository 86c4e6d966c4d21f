//! Concrete `Node` implementations (§4.3) — thin state-machine wrappers
//! around `tsq-nodes`' pure transform functions. Two shapes:
//!
//! - streaming pass-through (`Filter`, `Downsample`, `Rate`, `GroupBy`):
//!   single upstream, transform a batch as it arrives, forward immediately.
//! - aggregation barrier (`Merger`, the fused `Join`+`Expression`, `TopN`,
//!   `Summarizer`): buffer every upstream's contribution behind a
//!   [`ChildBarrier`] and emit once, when every expected source has
//!   completed or failed.
//!
//! The fused join/expression node exists because `Join`'s natural output —
//! a per-timestamp variable environment — has no `TimeSeries` shape to flow
//! through the same channel protocol every other node uses; planning still
//! models `Join` and `Expression` as two DAG nodes (so fingerprinting and
//! tracing see them separately), but the dag builder in `pipeline.rs`
//! instantiates one runtime node spanning both.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use tsq_core::{InMemoryTimeSeries, QueryResult, Resolution, SummaryId, TimeSeries, Timestamp, TsqError, TypeToken};
use tsq_kernel::{AggregatorKind, NumericFillPolicy};
use tsq_nodes::{
    advance, compute_rate, downsample_series, emitted_time_spec, filter_ids, group_by_array, group_by_numeric, join_align,
    merge_ha, merge_shard, summarize, top_n, ChildBarrier, DownsampleConfig, Expr, GroupByConfig, JoinMode, Node,
    NodeDescriptor, NodeKind, NodeOutput, NodeState, NodeStateMachine, Predicate, RateConfig, ReplicaOutcome,
};

use crate::convert::shard_allows_partial;

fn start_if_needed(state: &mut NodeStateMachine) -> Result<(), TsqError> {
    if state.state() == NodeState::Created {
        advance(state, NodeState::Initialized)?;
        advance(state, NodeState::Running)?;
    }
    Ok(())
}

fn finish_ok(state: &mut NodeStateMachine) -> Result<(), TsqError> {
    advance(state, NodeState::Completing)?;
    advance(state, NodeState::Complete)
}

fn finish_failed(state: &mut NodeStateMachine) -> Result<(), TsqError> {
    if state.state() != NodeState::Failed {
        advance(state, NodeState::Failed)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Streaming pass-through
// ---------------------------------------------------------------------

pub struct FilterNode {
    id: String,
    state: NodeStateMachine,
    types: Vec<TypeToken>,
    predicate: Predicate,
}

impl FilterNode {
    pub fn new(id: impl Into<String>, predicate: Predicate) -> Self {
        let id = id.into();
        Self {
            state: NodeStateMachine::new(id.clone()),
            id,
            types: vec![TypeToken::NUMERIC, TypeToken::NUMERIC_ARRAY, TypeToken::NUMERIC_SUMMARY],
            predicate,
        }
    }
}

#[async_trait]
impl Node for FilterNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor { id: self.id.clone(), kind: NodeKind::Filter, config_summary: "filter".to_string() }
    }

    fn types(&self) -> &[TypeToken] {
        &self.types
    }

    fn state(&self) -> NodeState {
        self.state.state()
    }

    async fn on_next(&mut self, _source: &str, result: QueryResult, out: &mut NodeOutput) -> Result<(), TsqError> {
        start_if_needed(&mut self.state)?;
        let ids: Vec<_> = result.series.iter().map(|s| s.id()).collect();
        let kept = filter_ids(ids, &self.predicate);
        let series: Vec<Arc<dyn TimeSeries>> = result
            .series
            .iter()
            .filter(|s| kept.iter().any(|id| *id == s.id()))
            .cloned()
            .collect();
        let mut next = QueryResult::new(self.id.clone(), self.id.clone(), 0, result.resolution, series);
        next.time_spec = result.time_spec;
        out.emit_next(&self.id, next).await
    }

    async fn on_error(&mut self, _source: &str, err: TsqError, out: &mut NodeOutput) -> Result<(), TsqError> {
        out.emit_error(&self.id, TsqError::Internal(err.to_string())).await;
        finish_failed(&mut self.state)?;
        Err(err)
    }

    async fn on_complete(&mut self, _source: &str, out: &mut NodeOutput) -> Result<(), TsqError> {
        out.emit_complete(&self.id).await;
        finish_ok(&mut self.state)
    }
}

pub struct DownsampleNode {
    id: String,
    state: NodeStateMachine,
    types: Vec<TypeToken>,
    config: DownsampleConfig,
    start: Timestamp,
    end: Timestamp,
}

impl DownsampleNode {
    pub fn new(id: impl Into<String>, config: DownsampleConfig, start: Timestamp, end: Timestamp) -> Self {
        let id = id.into();
        Self {
            state: NodeStateMachine::new(id.clone()),
            id,
            types: vec![TypeToken::NUMERIC_ARRAY],
            config,
            start,
            end,
        }
    }
}

#[async_trait]
impl Node for DownsampleNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor { id: self.id.clone(), kind: NodeKind::Downsample, config_summary: format!("interval={}", self.config.interval_nanos) }
    }

    fn types(&self) -> &[TypeToken] {
        &self.types
    }

    fn state(&self) -> NodeState {
        self.state.state()
    }

    async fn on_next(&mut self, _source: &str, result: QueryResult, out: &mut NodeOutput) -> Result<(), TsqError> {
        start_if_needed(&mut self.state)?;
        let mut series: Vec<Arc<dyn TimeSeries>> = Vec::with_capacity(result.series.len());
        for s in &result.series {
            let downsampled = downsample_series(s.as_ref(), &self.config, self.start, self.end)?;
            series.push(Arc::new(downsampled));
        }
        let mut next = QueryResult::new(self.id.clone(), self.id.clone(), 0, result.resolution, series);
        next.time_spec = Some(emitted_time_spec(&self.config, self.start, self.end));
        out.emit_next(&self.id, next).await
    }

    async fn on_error(&mut self, _source: &str, err: TsqError, out: &mut NodeOutput) -> Result<(), TsqError> {
        out.emit_error(&self.id, TsqError::Internal(err.to_string())).await;
        finish_failed(&mut self.state)?;
        Err(err)
    }

    async fn on_complete(&mut self, _source: &str, out: &mut NodeOutput) -> Result<(), TsqError> {
        out.emit_complete(&self.id).await;
        finish_ok(&mut self.state)
    }
}

pub struct RateNode {
    id: String,
    state: NodeStateMachine,
    types: Vec<TypeToken>,
    config: RateConfig,
}

impl RateNode {
    pub fn new(id: impl Into<String>, config: RateConfig) -> Self {
        let id = id.into();
        Self {
            state: NodeStateMachine::new(id.clone()),
            id,
            types: vec![TypeToken::NUMERIC],
            config,
        }
    }
}

#[async_trait]
impl Node for RateNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor { id: self.id.clone(), kind: NodeKind::Rate, config_summary: format!("is_counter={}", self.config.is_counter) }
    }

    fn types(&self) -> &[TypeToken] {
        &self.types
    }

    fn state(&self) -> NodeState {
        self.state.state()
    }

    async fn on_next(&mut self, _source: &str, result: QueryResult, out: &mut NodeOutput) -> Result<(), TsqError> {
        start_if_needed(&mut self.state)?;
        let series: Vec<Arc<dyn TimeSeries>> = result
            .series
            .iter()
            .map(|s| Arc::new(compute_rate(s.as_ref(), &self.config)) as Arc<dyn TimeSeries>)
            .collect();
        let mut next = QueryResult::new(self.id.clone(), self.id.clone(), 0, result.resolution, series);
        next.time_spec = result.time_spec;
        out.emit_next(&self.id, next).await
    }

    async fn on_error(&mut self, _source: &str, err: TsqError, out: &mut NodeOutput) -> Result<(), TsqError> {
        out.emit_error(&self.id, TsqError::Internal(err.to_string())).await;
        finish_failed(&mut self.state)?;
        Err(err)
    }

    async fn on_complete(&mut self, _source: &str, out: &mut NodeOutput) -> Result<(), TsqError> {
        out.emit_complete(&self.id).await;
        finish_ok(&mut self.state)
    }
}

pub struct GroupByNode {
    id: String,
    state: NodeStateMachine,
    types: Vec<TypeToken>,
    config: GroupByConfig,
    fill: NumericFillPolicy,
}

impl GroupByNode {
    pub fn new(id: impl Into<String>, config: GroupByConfig, fill: NumericFillPolicy) -> Self {
        let id = id.into();
        Self {
            state: NodeStateMachine::new(id.clone()),
            id,
            types: vec![TypeToken::NUMERIC, TypeToken::NUMERIC_ARRAY],
            config,
            fill,
        }
    }
}

#[async_trait]
impl Node for GroupByNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor { id: self.id.clone(), kind: NodeKind::GroupBy, config_summary: format!("keys={}", self.config.group_keys.join(",")) }
    }

    fn types(&self) -> &[TypeToken] {
        &self.types
    }

    fn state(&self) -> NodeState {
        self.state.state()
    }

    async fn on_next(&mut self, _source: &str, result: QueryResult, out: &mut NodeOutput) -> Result<(), TsqError> {
        start_if_needed(&mut self.state)?;
        let (array_series, numeric_series): (Vec<_>, Vec<_>) =
            result.series.iter().cloned().partition(|s| s.types().contains(&TypeToken::NUMERIC_ARRAY));

        let mut series: Vec<Arc<dyn TimeSeries>> = group_by_numeric(&numeric_series, &self.config, self.fill)
            .into_iter()
            .map(|s| Arc::new(s) as Arc<dyn TimeSeries>)
            .collect();
        series.extend(
            group_by_array(&array_series, &self.config, self.fill)
                .into_iter()
                .map(|s| Arc::new(s) as Arc<dyn TimeSeries>),
        );

        let mut next = QueryResult::new(self.id.clone(), self.id.clone(), 0, result.resolution, series);
        next.time_spec = result.time_spec;
        out.emit_next(&self.id, next).await
    }

    async fn on_error(&mut self, _source: &str, err: TsqError, out: &mut NodeOutput) -> Result<(), TsqError> {
        out.emit_error(&self.id, TsqError::Internal(err.to_string())).await;
        finish_failed(&mut self.state)?;
        Err(err)
    }

    async fn on_complete(&mut self, _source: &str, out: &mut NodeOutput) -> Result<(), TsqError> {
        out.emit_complete(&self.id).await;
        finish_ok(&mut self.state)
    }
}

// ---------------------------------------------------------------------
// Aggregation barriers
// ---------------------------------------------------------------------

enum MergerMode {
    Ha { reducer: AggregatorKind },
    Shard { allow_partial_policy: crate::config::ShardPartialFailurePolicy },
}

/// HA or Shard merger (§4.3, §8 scenario 2): buffers every replica/shard's
/// contribution behind a [`ChildBarrier`] keyed by upstream node id, and
/// emits exactly once, when every expected upstream has completed or
/// failed.
pub struct MergerNode {
    id: String,
    state: NodeStateMachine,
    types: Vec<TypeToken>,
    mode: MergerMode,
    barrier: ChildBarrier,
    expected: Vec<String>,
    buffers: HashMap<String, Vec<Arc<dyn TimeSeries>>>,
    errors: HashMap<String, String>,
    resolution: Resolution,
}

impl MergerNode {
    pub fn new_ha(id: impl Into<String>, expected: Vec<String>, reducer: AggregatorKind) -> Self {
        Self::new(id, expected, MergerMode::Ha { reducer })
    }

    pub fn new_shard(id: impl Into<String>, expected: Vec<String>, allow_partial_policy: crate::config::ShardPartialFailurePolicy) -> Self {
        Self::new(id, expected, MergerMode::Shard { allow_partial_policy })
    }

    fn new(id: impl Into<String>, expected: Vec<String>, mode: MergerMode) -> Self {
        let id = id.into();
        Self {
            state: NodeStateMachine::new(id.clone()),
            id,
            types: vec![TypeToken::NUMERIC],
            barrier: ChildBarrier::new(expected.clone()),
            expected,
            mode,
            buffers: HashMap::new(),
            errors: HashMap::new(),
            resolution: Resolution::Millis,
        }
    }

    async fn finalize(&mut self, out: &mut NodeOutput) -> Result<(), TsqError> {
        let mut outcomes = Vec::with_capacity(self.expected.len());
        for src in &self.expected {
            if let Some(series) = self.buffers.remove(src) {
                outcomes.push(ReplicaOutcome::Ok(series));
            } else if let Some(reason) = self.errors.remove(src) {
                outcomes.push(ReplicaOutcome::Err {
                    replica: src.clone(),
                    err: TsqError::SourceFailed { source: src.clone(), reason },
                });
            }
        }

        let merged = match &self.mode {
            MergerMode::Ha { reducer } => merge_ha(outcomes, *reducer)
                .map(|(series, warnings)| (series.into_iter().map(|s| Arc::new(s) as Arc<dyn TimeSeries>).collect::<Vec<_>>(), warnings)),
            MergerMode::Shard { allow_partial_policy } => {
                let failed_count = outcomes.iter().filter(|o| matches!(o, ReplicaOutcome::Err { .. })).count();
                let allow_partial = shard_allows_partial(*allow_partial_policy, failed_count);
                merge_shard(outcomes, allow_partial)
            }
        };

        match merged {
            Ok((series, warnings)) => {
                let mut result = QueryResult::new(self.id.clone(), self.id.clone(), 0, self.resolution, series);
                for w in warnings {
                    result = result.with_warning(w);
                }
                out.emit_next(&self.id, result).await?;
                out.emit_complete(&self.id).await;
                finish_ok(&mut self.state)
            }
            Err(e) => {
                warn!(node = %self.id, error = %e, "merge failed");
                out.emit_error(&self.id, TsqError::Internal(e.to_string())).await;
                finish_failed(&mut self.state)
            }
        }
    }
}

#[async_trait]
impl Node for MergerNode {
    fn descriptor(&self) -> NodeDescriptor {
        let kind = match self.mode {
            MergerMode::Ha { .. } => NodeKind::MergerHa,
            MergerMode::Shard { .. } => NodeKind::MergerShard,
        };
        NodeDescriptor { id: self.id.clone(), kind, config_summary: format!("expected={}", self.expected.len()) }
    }

    fn types(&self) -> &[TypeToken] {
        &self.types
    }

    fn state(&self) -> NodeState {
        self.state.state()
    }

    async fn on_next(&mut self, source: &str, result: QueryResult, _out: &mut NodeOutput) -> Result<(), TsqError> {
        start_if_needed(&mut self.state)?;
        self.resolution = result.resolution;
        self.buffers.entry(source.to_string()).or_default().extend(result.series);
        Ok(())
    }

    async fn on_error(&mut self, source: &str, err: TsqError, out: &mut NodeOutput) -> Result<(), TsqError> {
        start_if_needed(&mut self.state)?;
        self.errors.insert(source.to_string(), err.to_string());
        self.barrier.mark_failed(source, TsqError::Internal(err.to_string()));
        if self.barrier.is_satisfied() {
            self.finalize(out).await?;
        }
        Ok(())
    }

    async fn on_complete(&mut self, source: &str, out: &mut NodeOutput) -> Result<(), TsqError> {
        start_if_needed(&mut self.state)?;
        self.barrier.mark_complete(source);
        if self.barrier.is_satisfied() {
            self.finalize(out).await?;
        }
        Ok(())
    }
}

/// Fused `Join` + `Expression` (§4.3, §8 scenario 4): buffers one series
/// per expression variable behind a [`ChildBarrier`] keyed by variable
/// name (the planner labels each incoming edge with the variable it feeds,
/// since the variable name has no other runtime representation), then
/// aligns and evaluates once every variable's upstream has completed.
pub struct JoinExpressionNode {
    id: String,
    state: NodeStateMachine,
    types: Vec<TypeToken>,
    mode: JoinMode,
    fill: NumericFillPolicy,
    expr: Expr,
    barrier: ChildBarrier,
    expected: Vec<String>,
    buffers: HashMap<String, Vec<Arc<dyn TimeSeries>>>,
    resolution: Resolution,
}

impl JoinExpressionNode {
    pub fn new(id: impl Into<String>, expected: Vec<String>, mode: JoinMode, fill: NumericFillPolicy, expr: Expr) -> Self {
        let id = id.into();
        Self {
            state: NodeStateMachine::new(id.clone()),
            id,
            types: vec![TypeToken::NUMERIC],
            mode,
            fill,
            expr,
            barrier: ChildBarrier::new(expected.clone()),
            expected,
            buffers: HashMap::new(),
            resolution: Resolution::Millis,
        }
    }

    async fn finalize(&mut self, out: &mut NodeOutput) -> Result<(), TsqError> {
        let empty = InMemoryTimeSeries::new(tsq_core::TimeSeriesId::metric_only(&self.id));
        let mut owned: HashMap<String, Arc<dyn TimeSeries>> = HashMap::new();
        for var in &self.expected {
            let series = self.buffers.remove(var).unwrap_or_default();
            match series.len() {
                0 => {
                    owned.insert(var.clone(), Arc::new(InMemoryTimeSeries::new(empty.id().clone())));
                }
                1 => {
                    owned.insert(var.clone(), series.into_iter().next().unwrap());
                }
                _ => {
                    warn!(node = %self.id, var = %var, count = series.len(), "expression variable resolved to more than one series; using the first");
                    owned.insert(var.clone(), series.into_iter().next().unwrap());
                }
            }
        }
        let refs: HashMap<String, &dyn TimeSeries> = owned.iter().map(|(k, v)| (k.clone(), v.as_ref())).collect();

        let env_rows = join_align(&refs, self.mode, self.fill);
        let mut points = Vec::with_capacity(env_rows.len());
        for (ts, env) in env_rows {
            match self.expr.evaluate(&env) {
                Ok(v) => points.push((ts, tsq_core::TypedValue::Numeric(tsq_core::NumericValue::Float(v)))),
                Err(e) => {
                    out.emit_error(&self.id, TsqError::Internal(e.to_string())).await;
                    finish_failed(&mut self.state)?;
                    return Err(e);
                }
            }
        }

        let out_id = tsq_core::TimeSeriesId::metric_only(&self.id);
        let series: Vec<Arc<dyn TimeSeries>> = vec![Arc::new(InMemoryTimeSeries::new(out_id).with_points(TypeToken::NUMERIC, points))];
        let result = QueryResult::new(self.id.clone(), self.id.clone(), 0, self.resolution, series);
        out.emit_next(&self.id, result).await?;
        out.emit_complete(&self.id).await;
        finish_ok(&mut self.state)
    }
}

#[async_trait]
impl Node for JoinExpressionNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor { id: self.id.clone(), kind: NodeKind::Expression, config_summary: format!("vars={}", self.expected.len()) }
    }

    fn types(&self) -> &[TypeToken] {
        &self.types
    }

    fn state(&self) -> NodeState {
        self.state.state()
    }

    async fn on_next(&mut self, source: &str, result: QueryResult, _out: &mut NodeOutput) -> Result<(), TsqError> {
        start_if_needed(&mut self.state)?;
        self.resolution = result.resolution;
        self.buffers.entry(source.to_string()).or_default().extend(result.series);
        Ok(())
    }

    async fn on_error(&mut self, source: &str, err: TsqError, out: &mut NodeOutput) -> Result<(), TsqError> {
        start_if_needed(&mut self.state)?;
        self.barrier.mark_failed(source, TsqError::Internal(err.to_string()));
        if self.barrier.is_satisfied() {
            self.finalize(out).await?;
        }
        Ok(())
    }

    async fn on_complete(&mut self, source: &str, out: &mut NodeOutput) -> Result<(), TsqError> {
        start_if_needed(&mut self.state)?;
        self.barrier.mark_complete(source);
        if self.barrier.is_satisfied() {
            self.finalize(out).await?;
        }
        Ok(())
    }
}

/// `TopN` (§4.3): not reachable from the declarative query grammar today
/// (`tsq-planner::query` has no top-N clause), but kept as a usable node
/// for embedders that build a `Plan` programmatically and append one.
pub struct TopNNode {
    id: String,
    state: NodeStateMachine,
    types: Vec<TypeToken>,
    aggregator: AggregatorKind,
    n: usize,
    barrier: ChildBarrier,
    buffer: Vec<Arc<dyn TimeSeries>>,
    resolution: Resolution,
}

impl TopNNode {
    pub fn new(id: impl Into<String>, expected: Vec<String>, aggregator: AggregatorKind, n: usize) -> Self {
        let id = id.into();
        Self {
            state: NodeStateMachine::new(id.clone()),
            id,
            types: vec![TypeToken::NUMERIC],
            aggregator,
            n,
            barrier: ChildBarrier::new(expected),
            buffer: Vec::new(),
            resolution: Resolution::Millis,
        }
    }

    async fn finalize(&mut self, out: &mut NodeOutput) -> Result<(), TsqError> {
        let series = top_n(std::mem::take(&mut self.buffer), self.aggregator, self.n);
        let result = QueryResult::new(self.id.clone(), self.id.clone(), 0, self.resolution, series);
        out.emit_next(&self.id, result).await?;
        out.emit_complete(&self.id).await;
        finish_ok(&mut self.state)
    }
}

#[async_trait]
impl Node for TopNNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor { id: self.id.clone(), kind: NodeKind::TopN, config_summary: format!("n={}", self.n) }
    }

    fn types(&self) -> &[TypeToken] {
        &self.types
    }

    fn state(&self) -> NodeState {
        self.state.state()
    }

    async fn on_next(&mut self, source: &str, result: QueryResult, _out: &mut NodeOutput) -> Result<(), TsqError> {
        start_if_needed(&mut self.state)?;
        self.resolution = result.resolution;
        self.buffer.extend(result.series);
        let _ = source;
        Ok(())
    }

    async fn on_error(&mut self, source: &str, err: TsqError, out: &mut NodeOutput) -> Result<(), TsqError> {
        start_if_needed(&mut self.state)?;
        self.barrier.mark_failed(source, TsqError::Internal(err.to_string()));
        if self.barrier.is_satisfied() {
            self.finalize(out).await?;
        }
        Ok(())
    }

    async fn on_complete(&mut self, source: &str, out: &mut NodeOutput) -> Result<(), TsqError> {
        start_if_needed(&mut self.state)?;
        self.barrier.mark_complete(source);
        if self.barrier.is_satisfied() {
            self.finalize(out).await?;
        }
        Ok(())
    }
}

/// `Summarizer` (§4.3): same embedder-only reachability note as [`TopNNode`].
pub struct SummarizerNode {
    id: String,
    state: NodeStateMachine,
    types: Vec<TypeToken>,
    wanted: Vec<SummaryId>,
    at: Timestamp,
    barrier: ChildBarrier,
    buffer: Vec<Arc<dyn TimeSeries>>,
    resolution: Resolution,
}

impl SummarizerNode {
    pub fn new(id: impl Into<String>, expected: Vec<String>, wanted: Vec<SummaryId>, at: Timestamp) -> Self {
        let id = id.into();
        Self {
            state: NodeStateMachine::new(id.clone()),
            id,
            types: vec![TypeToken::NUMERIC_SUMMARY],
            wanted,
            at,
            barrier: ChildBarrier::new(expected),
            buffer: Vec::new(),
            resolution: Resolution::Millis,
        }
    }

    async fn finalize(&mut self, out: &mut NodeOutput) -> Result<(), TsqError> {
        let series: Vec<Arc<dyn TimeSeries>> = std::mem::take(&mut self.buffer)
            .iter()
            .map(|s| Arc::new(summarize(s.as_ref(), &self.wanted, self.at)) as Arc<dyn TimeSeries>)
            .collect();
        let result = QueryResult::new(self.id.clone(), self.id.clone(), 0, self.resolution, series);
        out.emit_next(&self.id, result).await?;
        out.emit_complete(&self.id).await;
        finish_ok(&mut self.state)
    }
}

#[async_trait]
impl Node for SummarizerNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor { id: self.id.clone(), kind: NodeKind::Summarizer, config_summary: format!("wanted={}", self.wanted.len()) }
    }

    fn types(&self) -> &[TypeToken] {
        &self.types
    }

    fn state(&self) -> NodeState {
        self.state.state()
    }

    async fn on_next(&mut self, source: &str, result: QueryResult, _out: &mut NodeOutput) -> Result<(), TsqError> {
        start_if_needed(&mut self.state)?;
        self.resolution = result.resolution;
        self.buffer.extend(result.series);
        let _ = source;
        Ok(())
    }

    async fn on_error(&mut self, source: &str, err: TsqError, out: &mut NodeOutput) -> Result<(), TsqError> {
        start_if_needed(&mut self.state)?;
        self.barrier.mark_failed(source, TsqError::Internal(err.to_string()));
        if self.barrier.is_satisfied() {
            self.finalize(out).await?;
        }
        Ok(())
    }

    async fn on_complete(&mut self, source: &str, out: &mut NodeOutput) -> Result<(), TsqError> {
        start_if_needed(&mut self.state)?;
        self.barrier.mark_complete(source);
        if self.barrier.is_satisfied() {
            self.finalize(out).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tsq_core::{NumericValue, Resolution, TimeSeriesId, Timestamp, TypedValue};
    use tsq_nodes::{NodeEvent, TagOp};

    fn series(metric: &str, tag: Option<(&str, &str)>, points: Vec<(i64, f64)>) -> Arc<dyn TimeSeries> {
        let mut id = TimeSeriesId::metric_only(metric);
        if let Some((k, v)) = tag {
            id = id.with_tag(k, v);
        }
        let pts = points
            .into_iter()
            .map(|(ts, v)| (Timestamp::new(ts, Resolution::Millis), TypedValue::Numeric(NumericValue::Float(v))))
            .collect();
        Arc::new(InMemoryTimeSeries::new(id).with_points(TypeToken::NUMERIC, pts))
    }

    async fn drain_one(rx: &mut mpsc::Receiver<NodeEvent>) -> NodeEvent {
        rx.recv().await.expect("downstream channel open")
    }

    #[tokio::test]
    async fn filter_node_drops_series_not_matching_predicate() {
        let predicate = Predicate::tag("host", TagOp::literal("web01"));
        let mut node = FilterNode::new("f1", predicate);
        let (tx, mut rx) = mpsc::channel(4);
        let mut out = NodeOutput::new("f1", vec![tx]);

        let batch = vec![
            series("sys.cpu", Some(("host", "web01")), vec![(0, 1.0)]),
            series("sys.cpu", Some(("host", "web02")), vec![(0, 2.0)]),
        ];
        let result = QueryResult::new("src", "src", 0, Resolution::Millis, batch);
        node.on_next("src", result, &mut out).await.unwrap();

        match drain_one(&mut rx).await {
            NodeEvent::Next(r) => {
                assert_eq!(r.series.len(), 1);
                assert_eq!(r.series[0].id().tags.get("host").unwrap(), "web01");
            }
            other => panic!("expected Next, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn merger_ha_survives_one_replica_failure() {
        let mut node = MergerNode::new_ha("m1", vec!["r1".into(), "r2".into()], AggregatorKind::Last);
        let (tx, mut rx) = mpsc::channel(4);
        let mut out = NodeOutput::new("m1", vec![tx]);

        let r1 = QueryResult::new("src", "r1", 0, Resolution::Millis, vec![series("sys.cpu", None, vec![(0, 42.0)])]);
        node.on_next("r1", r1, &mut out).await.unwrap();
        node.on_complete("r1", &mut out).await.unwrap();
        node.on_error("r2", TsqError::SourceTimeout { source: "r2".into() }, &mut out).await.unwrap();

        match drain_one(&mut rx).await {
            NodeEvent::Next(r) => {
                assert_eq!(r.series.len(), 1);
                assert_eq!(r.warnings.len(), 1);
            }
            other => panic!("expected Next, got {other:?}"),
        }
        match drain_one(&mut rx).await {
            NodeEvent::Complete { .. } => {}
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn merger_shard_propagates_failure_when_policy_disallows_partial() {
        let mut node = MergerNode::new_shard("m1", vec!["s1".into(), "s2".into()], crate::config::ShardPartialFailurePolicy::None);
        let (tx, mut rx) = mpsc::channel(4);
        let mut out = NodeOutput::new("m1", vec![tx]);

        node.on_complete("s1", &mut out).await.unwrap();
        node.on_error(
            "s2",
            TsqError::SourceFailed { source: "s2".into(), reason: "boom".into() },
            &mut out,
        )
        .await
        .unwrap();

        match drain_one(&mut rx).await {
            NodeEvent::Error { .. } => {}
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn join_expression_unions_inputs_with_nan_fill() {
        let expr = Expr::parse("a + b").unwrap();
        let mut node = JoinExpressionNode::new(
            "e1",
            vec!["a".into(), "b".into()],
            JoinMode::Union,
            NumericFillPolicy::NotANumber,
            expr,
        );
        let (tx, mut rx) = mpsc::channel(4);
        let mut out = NodeOutput::new("e1", vec![tx]);

        let a = QueryResult::new("src", "a", 0, Resolution::Millis, vec![series("a", None, vec![(0, 1.0), (1, 2.0)])]);
        let b = QueryResult::new("src", "b", 0, Resolution::Millis, vec![series("b", None, vec![(0, 10.0)])]);
        node.on_next("a", a, &mut out).await.unwrap();
        node.on_complete("a", &mut out).await.unwrap();
        node.on_next("b", b, &mut out).await.unwrap();
        node.on_complete("b", &mut out).await.unwrap();

        match drain_one(&mut rx).await {
            NodeEvent::Next(r) => {
                assert_eq!(r.series.len(), 1);
                let mut cursor = r.series[0].cursor(TypeToken::NUMERIC).unwrap();
                let (_, first) = cursor.next().unwrap();
                assert_eq!(first, TypedValue::Numeric(NumericValue::Float(11.0)));
                let (_, second) = cursor.next().unwrap();
                assert!(matches!(second, TypedValue::Numeric(NumericValue::Float(v)) if v.is_nan()));
            }
            other => panic!("expected Next, got {other:?}"),
        }
    }
}
