//! Wires a [`Plan`] into a running DAG of node tasks and drives it to
//! completion (§4.5). Grounded in the teacher's `rde-cli` main loop: one
//! `mpsc` channel per edge, one `tokio::spawn` per operator, a shared
//! [`tokio_util::sync::CancellationToken`] threaded through every task, and
//! a single terminal callback delivered to the caller's [`Sink`] — except
//! here the teacher's linear operator chain becomes a full DAG, addressed
//! by the planner's [`PlanEdge`] labels rather than positional wiring.
//!
//! Two edge-label rewrites happen at the per-edge forwarder, not at the
//! emitting node: an edge feeding a `Join` node is retagged to the
//! expression variable name it binds (already the planner's edge weight —
//! see [`tsq_planner::PlanEdge`]'s doc comment), and an edge feeding a
//! `Sink` node is retagged to that sink's own id, so a query with more than
//! one `output` barriers its single terminal callback across every output
//! rather than firing once per output.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::graph::NodeIndex;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use tokio::sync::mpsc;

use tsq_core::{DataSource, Sink, TsqError};
use tsq_nodes::{ChildBarrier, Node, NodeEvent, NodeKind, NodeOutput, NodeState, SourceNode};
use tsq_planner::{Plan, PlanNodeKind};

use crate::builder;
use crate::config::EngineConfig;
use crate::context::{PipelineContext, WorkerPool};
use crate::operator::{DownsampleNode, FilterNode, GroupByNode, JoinExpressionNode, MergerNode, RateNode};

const EDGE_CHANNEL_CAPACITY: usize = 64;

/// Constructs a `DataSource` instance for one planner source node, keyed by
/// the bare source name (e.g. `"hbase"`) the query's `MetricQuery.sources`
/// names. Each call must hand back a fresh instance — the same source name
/// may back more than one planner source node (HA replicas, multiple
/// metrics), and `DataSource` isn't `Clone`.
pub type SourceFactory = dyn Fn(&str) -> Result<Box<dyn DataSource>, TsqError> + Send + Sync;

fn retag(ev: NodeEvent, label: &str) -> NodeEvent {
    match ev {
        NodeEvent::Next(mut result) => {
            result.data_source = label.to_string();
            NodeEvent::Next(result)
        }
        NodeEvent::Complete { .. } => NodeEvent::Complete { source: label.to_string() },
        NodeEvent::Error { err, .. } => NodeEvent::Error { source: label.to_string(), err },
    }
}

/// Drive one non-source, non-sink node: pull events off its combined
/// inbox, dispatch to the `Node` trait, stop once the node reaches a
/// terminal state or its inbox drains. Cancellation is checked against the
/// inbox wait itself (`tokio::select!`) rather than only between messages,
/// so a node blocked on a hung upstream still responds to cancel.
async fn drive_node(mut node: Box<dyn Node>, mut inbox: mpsc::Receiver<NodeEvent>, mut out: NodeOutput, ctx: Arc<PipelineContext>) {
    ctx.metrics.node_started();
    loop {
        let ev = tokio::select! {
            _ = ctx.cancellation.cancelled() => {
                let _ = node.on_error("pipeline", TsqError::cancelled(None), &mut out).await;
                ctx.metrics.node_failed();
                return;
            }
            maybe_ev = inbox.recv() => {
                match maybe_ev {
                    Some(ev) => ev,
                    None => return,
                }
            }
        };

        let outcome = match ev {
            NodeEvent::Next(result) => {
                ctx.metrics.batch_emitted(result.series.len());
                let source = result.data_source.clone();
                node.on_next(&source, result, &mut out).await
            }
            NodeEvent::Complete { source } => node.on_complete(&source, &mut out).await,
            NodeEvent::Error { source, err } => node.on_error(&source, err, &mut out).await,
        };

        if outcome.is_err() {
            ctx.metrics.node_failed();
            return;
        }
        if node.state().is_terminal() {
            if node.state() == NodeState::Complete {
                ctx.metrics.node_completed();
            } else {
                ctx.metrics.node_failed();
            }
            return;
        }
    }
}

async fn drive_source(mut source_node: SourceNode, mut out: NodeOutput, ctx: Arc<PipelineContext>) {
    ctx.metrics.node_started();
    tokio::select! {
        _ = ctx.cancellation.cancelled() => {
            out.emit_error("pipeline", TsqError::cancelled(None)).await;
            ctx.metrics.node_failed();
        }
        result = source_node.run(ctx.deadline, &mut out) => {
            match result {
                Ok(()) => ctx.metrics.node_completed(),
                Err(_) => ctx.metrics.node_failed(),
            }
        }
    }
}

/// Run `plan` to completion, delivering every batch and the single terminal
/// callback to `sink`. The returned future resolves only once that terminal
/// callback has fired, so a caller can race it against its own cancellation
/// source (e.g. `ctrl_c`) with `tokio::select!` and know the pipeline is
/// fully wound down whenever the `run` arm wins. Returns `Err` only for a
/// setup-time failure (an unbuildable node config, a source factory that
/// can't produce an instance) that happens before any node starts running;
/// data-plane failures are reported to `sink.on_error` instead, per §8's
/// "the Sink is the terminal" contract.
pub async fn run(
    plan: &Plan,
    ctx: Arc<PipelineContext>,
    pool: Arc<WorkerPool>,
    engine: &EngineConfig,
    sources: &SourceFactory,
    sink: Box<dyn Sink>,
) -> Result<(), TsqError> {
    // A `Join` node's natural output has no `TimeSeries` shape (§4.3), so it
    // is fused at runtime into its single `Expression` successor; find that
    // pairing before wiring so join-targeting edges route into the fused
    // node's inbox and the fused node's own outgoing edges are read off its
    // expression half.
    let mut join_to_expr: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    for idx in plan.graph.node_indices() {
        if matches!(plan.node(idx).kind, PlanNodeKind::Operator(NodeKind::Join)) {
            let expr_idx = plan
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .next()
                .ok_or_else(|| TsqError::Internal(format!("join node '{}' has no expression successor", plan.node(idx).id)))?;
            join_to_expr.insert(idx, expr_idx);
        }
    }

    // One combined inbox per node that is ever an edge target, except
    // `Source` (never a target) and `Expression` (its inbox lives at the
    // paired `Join` index instead, since incoming edges target the join).
    let mut inbox_tx: HashMap<NodeIndex, mpsc::Sender<NodeEvent>> = HashMap::new();
    let mut inbox_rx: HashMap<NodeIndex, mpsc::Receiver<NodeEvent>> = HashMap::new();
    for idx in plan.graph.node_indices() {
        match plan.node(idx).kind {
            PlanNodeKind::Operator(NodeKind::Source) | PlanNodeKind::Sink | PlanNodeKind::Operator(NodeKind::Expression) => continue,
            _ => {
                let (tx, rx) = mpsc::channel(EDGE_CHANNEL_CAPACITY);
                inbox_tx.insert(idx, tx);
                inbox_rx.insert(idx, rx);
            }
        }
    }

    let (sink_tx, mut sink_rx) = mpsc::channel::<NodeEvent>(EDGE_CHANNEL_CAPACITY);
    let sink_ids: Vec<String> = plan
        .graph
        .node_indices()
        .filter(|&idx| plan.node(idx).kind == PlanNodeKind::Sink)
        .map(|idx| plan.node(idx).id.clone())
        .collect();

    // Per-edge retagging forwarders: one small task per edge that rewrites
    // the emitting node's own id to whatever label the *downstream* barrier
    // addresses it by (itself for ordinary edges, the variable name for a
    // join-feeding edge, the sink's own id for a sink-feeding edge).
    let mut downstreams: HashMap<NodeIndex, Vec<mpsc::Sender<NodeEvent>>> = HashMap::new();
    for edge in plan.graph.edge_references() {
        let (u, d) = (edge.source(), edge.target());
        if join_to_expr.get(&u) == Some(&d) {
            continue; // internal join->expression hop, fused away
        }
        let target_tx = if plan.node(d).kind == PlanNodeKind::Sink {
            sink_tx.clone()
        } else {
            inbox_tx
                .get(&d)
                .cloned()
                .ok_or_else(|| TsqError::Internal(format!("node '{}' has no registered inbox", plan.node(d).id)))?
        };
        let label = if plan.node(d).kind == PlanNodeKind::Sink {
            plan.node(d).id.clone()
        } else {
            edge.weight().clone().unwrap_or_else(|| plan.node(u).id.clone())
        };

        let (edge_tx, mut edge_rx) = mpsc::channel::<NodeEvent>(EDGE_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(ev) = edge_rx.recv().await {
                if target_tx.send(retag(ev, &label)).await.is_err() {
                    break;
                }
            }
        });
        downstreams.entry(u).or_default().push(edge_tx);
    }

    // Build and spawn every runtime node. Sources are driven via
    // `SourceNode::run`; `Join` nodes are fused with their `Expression`
    // successor into one `JoinExpressionNode`; everything else is a direct
    // `tsq-exec::operator` node driven generically by `drive_node`.
    for idx in plan.graph.node_indices() {
        let id = plan.node(idx).id.clone();
        match plan.node(idx).kind {
            PlanNodeKind::Sink => continue,
            PlanNodeKind::Operator(NodeKind::Expression) => continue, // driven as part of its Join
            PlanNodeKind::Operator(NodeKind::Source) => {
                let src_name = builder::source_name(&id)?;
                let mut source = sources(src_name)?;
                let ds_config = builder::data_source_config(&ctx.query, &id)?;
                source.init(&ds_config).await?;
                let out = NodeOutput::new(id.clone(), downstreams.remove(&idx).unwrap_or_default());
                let node = SourceNode::new(id, source);
                let ctx = ctx.clone();
                let pool = pool.clone();
                tokio::spawn(async move { pool.submit(drive_source(node, out, ctx)).await });
            }
            PlanNodeKind::Operator(NodeKind::Join) => {
                let expr_idx = *join_to_expr
                    .get(&idx)
                    .ok_or_else(|| TsqError::Internal(format!("join node '{id}' missing its expression pairing")))?;
                let expr_id = plan.node(expr_idx).id.clone();
                let cfg = builder::join_expression_config(&ctx.query, &expr_id)?;
                let expected: Vec<String> = plan
                    .graph
                    .edges_directed(idx, Direction::Incoming)
                    .map(|e| e.weight().clone().unwrap_or_else(|| plan.node(e.source()).id.clone()))
                    .collect();
                let out = NodeOutput::new(expr_id.clone(), downstreams.remove(&expr_idx).unwrap_or_default());
                let inbox = inbox_rx.remove(&idx).ok_or_else(|| TsqError::Internal(format!("join node '{id}' has no registered inbox")))?;
                let node: Box<dyn Node> = Box::new(JoinExpressionNode::new(expr_id, expected, cfg.mode, cfg.fill, cfg.expr));
                let ctx = ctx.clone();
                let pool = pool.clone();
                tokio::spawn(async move { pool.submit(drive_node(node, inbox, out, ctx)).await });
            }
            PlanNodeKind::Operator(kind) => {
                let out = NodeOutput::new(id.clone(), downstreams.remove(&idx).unwrap_or_default());
                let inbox = inbox_rx.remove(&idx).ok_or_else(|| TsqError::Internal(format!("node '{id}' has no registered inbox")))?;
                let node: Box<dyn Node> = match kind {
                    NodeKind::Filter => Box::new(FilterNode::new(id.clone(), builder::filter_config(&ctx.query, &id)?.predicate)),
                    NodeKind::Downsample => {
                        let cfg = builder::downsample_config(&ctx.query, &id)?;
                        Box::new(DownsampleNode::new(id.clone(), cfg.config, cfg.start, cfg.end))
                    }
                    NodeKind::Rate => Box::new(RateNode::new(id.clone(), builder::rate_config(&ctx.query, &id)?.config)),
                    NodeKind::GroupBy => {
                        let cfg = builder::group_by_config(&ctx.query, &id)?;
                        Box::new(GroupByNode::new(id.clone(), cfg.config, cfg.fill))
                    }
                    NodeKind::MergerHa => {
                        let cfg = builder::merger_ha_config(&ctx.query, &id)?;
                        Box::new(MergerNode::new_ha(id.clone(), plan.upstream_ids(idx), cfg.reducer))
                    }
                    NodeKind::MergerShard => {
                        let cfg = builder::merger_shard_config(engine);
                        Box::new(MergerNode::new_shard(id.clone(), plan.upstream_ids(idx), cfg.allow_partial_policy))
                    }
                    NodeKind::Source | NodeKind::Expression | NodeKind::Join => unreachable!("handled above"),
                    NodeKind::TopN | NodeKind::Summarizer | NodeKind::MergerSplit => {
                        return Err(TsqError::Internal(format!(
                            "node '{id}': {} has no declarative-query construction path (embedder-only node)",
                            kind.as_str()
                        )));
                    }
                };
                let ctx = ctx.clone();
                let pool = pool.clone();
                tokio::spawn(async move { pool.submit(drive_node(node, inbox, out, ctx)).await });
            }
        }
    }

    // The sink barrier fires `on_complete` exactly once every output has
    // completed, mirroring every other barrier in this engine; the first
    // fatal error reaching the sink short-circuits it immediately instead
    // (§7 "fatal errors cancel the whole pipeline"). `run` awaits this task
    // so the caller's `.await` only resolves once the terminal callback has
    // actually fired, rather than as soon as the DAG is wired and spawned.
    let sink_task = tokio::spawn(async move {
        let mut sink = sink;
        if sink_ids.is_empty() {
            let _ = sink.on_complete().await;
            return;
        }
        let mut barrier = ChildBarrier::new(sink_ids);
        loop {
            match sink_rx.recv().await {
                None => break,
                Some(NodeEvent::Next(result)) => {
                    let _ = sink.on_next(result).await;
                }
                Some(NodeEvent::Complete { source }) => {
                    barrier.mark_complete(&source);
                    if barrier.is_satisfied() {
                        let _ = sink.on_complete().await;
                        break;
                    }
                }
                Some(NodeEvent::Error { source, err }) => {
                    barrier.mark_failed(&source, TsqError::Internal(err.to_string()));
                    let _ = sink.on_error(err).await;
                    break;
                }
            }
        }
    });

    sink_task.await.map_err(|e| TsqError::Internal(format!("sink aggregation task panicked: {e}")))?;
    Ok(())
}
