//! The 7-step planner (§4.4): validate, expand, push down, compose,
//! insert mergers, attach sinks, fingerprint. Produces an immutable DAG
//! description over a [`petgraph::graph::DiGraph`] plus a topological
//! order (node id lexicographic tie-break) and a fingerprint stable under
//! tag-map/filter-set-ordering permutation.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use tsq_core::datasource::SourceCapabilities;
use tsq_core::TsqError;
use tsq_nodes::NodeKind;

use crate::query::{FilterSet, JoinModeSpec, MetricQuery, TimeSeriesQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanNodeKind {
    Operator(NodeKind),
    Sink,
}

impl PlanNodeKind {
    fn as_str(self) -> &'static str {
        match self {
            PlanNodeKind::Operator(k) => k.as_str(),
            PlanNodeKind::Sink => "sink",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannedNode {
    pub id: String,
    pub kind: PlanNodeKind,
    pub config_summary: String,
}

/// Edge label: the key the downstream node addresses this edge by. For an
/// ordinary pass-through or merger-feeding edge this is the upstream node's
/// own id (so a barrier's expected set is just its incoming edge labels —
/// no separate bookkeeping needed). On an edge feeding a `Join` node it's
/// instead the expression variable name that edge's upstream output binds
/// to, since a join's barrier is keyed by variable, not by upstream id.
pub type PlanEdge = Option<String>;

/// The planner's immutable output: a DAG of [`PlannedNode`]s, a
/// topological execution order, and a deterministic fingerprint.
pub struct Plan {
    pub graph: DiGraph<PlannedNode, PlanEdge>,
    pub order: Vec<NodeIndex>,
    pub fingerprint: String,
}

impl Plan {
    pub fn node(&self, idx: NodeIndex) -> &PlannedNode {
        &self.graph[idx]
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn upstream_ids(&self, idx: NodeIndex) -> Vec<String> {
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|n| self.graph[n].id.clone())
            .collect()
    }
}

/// Plan a declarative query against a source-capability table (source id
/// -> capabilities, step 3's "capability set published by the data-source
/// plugin").
pub fn plan(query: &TimeSeriesQuery, capabilities: &HashMap<String, SourceCapabilities>) -> Result<Plan, TsqError> {
    validate(query)?;

    let mut graph: DiGraph<PlannedNode, PlanEdge> = DiGraph::new();

    // Step 2 + 3: expand each metric into source(s) + operator chain,
    // pushing filter/downsample into the source when it advertises support.
    let filter_sets = query.filter_set_ids();
    let mut metric_terminal: HashMap<&str, NodeIndex> = HashMap::new();

    for metric in &query.metrics {
        let sources = if metric.sources.is_empty() {
            vec![metric.metric.clone()]
        } else {
            metric.sources.clone()
        };

        let filter_set = metric
            .filter_set
            .as_ref()
            .map(|fs_id| {
                filter_sets
                    .get(fs_id.as_str())
                    .copied()
                    .ok_or_else(|| TsqError::ParseError(format!("metric '{}': unknown filter_set '{}'", metric.id, fs_id)))
            })
            .transpose()?;

        let mut source_terminals = Vec::new();
        for src in &sources {
            let caps = capabilities.get(src).copied().unwrap_or_default();
            let source_id = format!("{}::source::{}", metric.id, src);
            let source_idx = graph.add_node(PlannedNode {
                id: source_id,
                kind: PlanNodeKind::Operator(NodeKind::Source),
                config_summary: format!("source={src}"),
            });

            let terminal = push_operator_chain(&mut graph, &metric.id, source_idx, filter_set, metric, &caps);
            source_terminals.push(terminal);
        }

        // Step 5: insert mergers when a metric resolves to >1 source.
        let after_merge = if source_terminals.len() > 1 {
            let kind = if metric.ha { NodeKind::MergerHa } else { NodeKind::MergerShard };
            let merger_id = format!("{}::merger", metric.id);
            let merger_idx = graph.add_node(PlannedNode {
                id: merger_id,
                kind: PlanNodeKind::Operator(kind),
                config_summary: format!("mode={}", if metric.ha { "ha" } else { "shard" }),
            });
            for t in &source_terminals {
                let label = graph[*t].id.clone();
                graph.add_edge(*t, merger_idx, Some(label));
            }
            merger_idx
        } else {
            source_terminals[0]
        };

        // Optional group-by, applied after merging (so it sees the full
        // replica/shard-unioned series).
        let final_idx = if !metric.group_by.is_empty() {
            let gid = format!("{}::group_by", metric.id);
            let idx = graph.add_node(PlannedNode {
                id: gid,
                kind: PlanNodeKind::Operator(NodeKind::GroupBy),
                config_summary: format!("keys={}", metric.group_by.join(",")),
            });
            let label = graph[after_merge].id.clone();
            graph.add_edge(after_merge, idx, Some(label));
            idx
        } else {
            after_merge
        };

        metric_terminal.insert(metric.id.as_str(), final_idx);
    }

    // Step 4: compose expressions; children are metric or sub-expression
    // outputs referenced by identifier in the grammar. Expressions may
    // reference each other in either declaration order, so every
    // expression's join/expr node pair is created in a first pass before
    // any child edges are wired in a second pass — otherwise a forward
    // reference would look like an unresolved id rather than a cycle.
    let expr_children = resolve_expression_children(query)?;
    let mut expr_terminal: HashMap<&str, NodeIndex> = HashMap::new();
    let mut expr_join_idx: HashMap<&str, NodeIndex> = HashMap::new();

    for expr in &query.expressions {
        let join_kind = match expr.join {
            JoinModeSpec::Intersection | JoinModeSpec::Union => NodeKind::Join,
        };
        let join_id = format!("{}::join", expr.id);
        let join_idx = graph.add_node(PlannedNode {
            id: join_id,
            kind: PlanNodeKind::Operator(join_kind),
            config_summary: format!("join={:?} fill={:?}", expr.join, expr.fill),
        });
        let expr_id = format!("{}::expr", expr.id);
        let expr_idx = graph.add_node(PlannedNode {
            id: expr_id,
            kind: PlanNodeKind::Operator(NodeKind::Expression),
            config_summary: expr.expr.clone(),
        });
        let join_label = graph[join_idx].id.clone();
        graph.add_edge(join_idx, expr_idx, Some(join_label));
        expr_terminal.insert(expr.id.as_str(), expr_idx);
        expr_join_idx.insert(expr.id.as_str(), join_idx);
    }

    for expr in &query.expressions {
        let join_idx = expr_join_idx[expr.id.as_str()];
        for child in &expr_children[expr.id.as_str()] {
            let child_idx = metric_terminal
                .get(child.as_str())
                .copied()
                .or_else(|| expr_terminal.get(child.as_str()).copied())
                .ok_or_else(|| TsqError::Internal(format!("expression '{}': child '{}' not yet planned", expr.id, child)))?;
            graph.add_edge(child_idx, join_idx, Some(child.clone()));
        }
    }

    // Cycle detection (§8 scenario 5): toposort fails iff the graph has a
    // cycle; report the offending node's planner id.
    toposort(&graph, None).map_err(|cycle| TsqError::PlanCycle(graph[cycle.node_id()].id.clone()))?;

    // Step 6: attach sinks named in `outputs`.
    for output in &query.outputs {
        let from_idx = metric_terminal
            .get(output.from.as_str())
            .copied()
            .or_else(|| expr_terminal.get(output.from.as_str()).copied())
            .ok_or_else(|| TsqError::ParseError(format!("output '{}': unknown 'from' id '{}'", output.id, output.from)))?;
        let sink_id = format!("{}::sink", output.id);
        let sink_idx = graph.add_node(PlannedNode {
            id: sink_id,
            kind: PlanNodeKind::Sink,
            config_summary: output.alias.clone().unwrap_or_else(|| output.id.clone()),
        });
        let from_label = graph[from_idx].id.clone();
        graph.add_edge(from_idx, sink_idx, Some(from_label));
    }

    // Sinks are always leaves, so attaching them cannot introduce a cycle;
    // re-run toposort now that they're in the graph to get the final order.
    toposort(&graph, None).map_err(|cycle| TsqError::PlanCycle(graph[cycle.node_id()].id.clone()))?;
    let order = lexicographic_stable_order(&graph);

    let fingerprint = fingerprint_plan(&graph, &order);

    Ok(Plan { graph, order, fingerprint })
}

fn push_operator_chain(
    graph: &mut DiGraph<PlannedNode, PlanEdge>,
    metric_id: &str,
    mut terminal: NodeIndex,
    filter_set: Option<&FilterSet>,
    metric: &MetricQuery,
    caps: &SourceCapabilities,
) -> NodeIndex {
    if let Some(fs) = filter_set {
        if !caps.push_down_filter {
            let id = format!("{}::filter::{}", metric_id, fs.id);
            let idx = graph.add_node(PlannedNode {
                id,
                kind: PlanNodeKind::Operator(NodeKind::Filter),
                config_summary: format!("filter_set={}", fs.id),
            });
            let label = graph[terminal].id.clone();
            graph.add_edge(terminal, idx, Some(label));
            terminal = idx;
        }
    }

    if let Some(downsampler) = &metric.downsampler {
        if !caps.push_down_downsample {
            let id = format!("{}::downsample", metric_id);
            let idx = graph.add_node(PlannedNode {
                id,
                kind: PlanNodeKind::Operator(NodeKind::Downsample),
                config_summary: format!("interval={downsampler} aggregator={:?}", metric.aggregator),
            });
            let label = graph[terminal].id.clone();
            graph.add_edge(terminal, idx, Some(label));
            terminal = idx;
        }
    }

    if let Some(rate) = &metric.rate {
        let id = format!("{}::rate", metric_id);
        let idx = graph.add_node(PlannedNode {
            id,
            kind: PlanNodeKind::Operator(NodeKind::Rate),
            config_summary: format!("is_counter={}", rate.is_counter),
        });
        let label = graph[terminal].id.clone();
        graph.add_edge(terminal, idx, Some(label));
        terminal = idx;
    }

    terminal
}

/// Step 1: every filter/metric/expression/output reference resolves, and
/// every metric has at least one resolvable source id.
fn validate(query: &TimeSeriesQuery) -> Result<(), TsqError> {
    let filter_sets = query.filter_set_ids();
    let metric_ids = query.metric_ids();
    let expr_ids = query.expression_ids();

    for metric in &query.metrics {
        if let Some(fs) = &metric.filter_set {
            if !filter_sets.contains_key(fs.as_str()) {
                return Err(TsqError::ParseError(format!("metric '{}': unknown filter_set '{}'", metric.id, fs)));
            }
        }
    }

    for expr in &query.expressions {
        let mut idents = std::collections::BTreeSet::new();
        tsq_nodes::Expr::parse(&expr.expr)
            .map_err(|e| TsqError::ParseError(format!("expression '{}': {e}", expr.id)))?
            .identifiers(&mut idents);
        for child in idents {
            if !metric_ids.contains_key(child.as_str()) && !expr_ids.contains_key(child.as_str()) && child != expr.id {
                return Err(TsqError::ParseError(format!(
                    "expression '{}': unresolved reference '{}'",
                    expr.id, child
                )));
            }
        }
    }

    for output in &query.outputs {
        if !metric_ids.contains_key(output.from.as_str()) && !expr_ids.contains_key(output.from.as_str()) {
            return Err(TsqError::ParseError(format!(
                "output '{}': 'from' references unknown id '{}'",
                output.id, output.from
            )));
        }
    }

    Ok(())
}

fn resolve_expression_children<'a>(query: &'a TimeSeriesQuery) -> Result<HashMap<&'a str, Vec<String>>, TsqError> {
    let mut out = HashMap::new();
    for expr in &query.expressions {
        let mut idents = std::collections::BTreeSet::new();
        tsq_nodes::Expr::parse(&expr.expr)
            .map_err(|e| TsqError::ParseError(format!("expression '{}': {e}", expr.id)))?
            .identifiers(&mut idents);
        out.insert(expr.id.as_str(), idents.into_iter().collect());
    }
    Ok(out)
}

/// Topological order with a lexicographic node-id tie-break (§4.4 "Tie-break
/// in topological order: node id lexicographic"). `petgraph::algo::toposort`
/// gives *a* valid order but not necessarily the lexicographically smallest
/// one at each choice point, so we re-derive it with Kahn's algorithm using a
/// sorted-by-id ready set.
fn lexicographic_stable_order(graph: &DiGraph<PlannedNode, PlanEdge>) -> Vec<NodeIndex> {
    let mut indegree: HashMap<NodeIndex, usize> = graph.node_indices().map(|n| (n, 0)).collect();
    for edge in graph.edge_indices() {
        if let Some((_, target)) = graph.edge_endpoints(edge) {
            *indegree.get_mut(&target).unwrap() += 1;
        }
    }

    let mut ready: BTreeMap<String, NodeIndex> = indegree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&idx, _)| (graph[idx].id.clone(), idx))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some((_, idx)) = ready.iter().next().map(|(k, v)| (k.clone(), *v)) {
        ready.remove(&graph[idx].id);
        order.push(idx);
        for neighbor in graph.neighbors_directed(idx, Direction::Outgoing) {
            let deg = indegree.get_mut(&neighbor).unwrap();
            *deg -= 1;
            if *deg == 0 {
                ready.insert(graph[neighbor].id.clone(), neighbor);
            }
        }
    }

    order
}

/// Hash the plan into a fingerprint stable under tag-map-key permutation and
/// filter-set ordering (§4.4 step 7, §8 "Plan fingerprint stability"): the
/// canonical form sorts nodes and edges by id before hashing, so any
/// permutation of construction order that produces the same graph shape
/// yields the same bytes.
fn fingerprint_plan(graph: &DiGraph<PlannedNode, PlanEdge>, order: &[NodeIndex]) -> String {
    let mut node_lines: Vec<String> = order
        .iter()
        .map(|&idx| {
            let node = &graph[idx];
            format!("N|{}|{}|{}", node.id, node.kind.as_str(), node.config_summary)
        })
        .collect();
    node_lines.sort();

    let mut edge_lines: Vec<String> = graph
        .edge_indices()
        .filter_map(|e| graph.edge_endpoints(e).map(|(a, b)| (a, b, graph.edge_weight(e))))
        .map(|(a, b, label)| format!("E|{}|{}|{}", graph[a].id, graph[b].id, label.and_then(|l| l.as_deref()).unwrap_or("")))
        .collect();
    edge_lines.sort();

    let mut hasher = DefaultHasher::new();
    for line in node_lines.iter().chain(edge_lines.iter()) {
        line.hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{ExpressionQuery, FillSpec, JoinModeSpec, MetricQuery, OutputSpec, TimeRange};

    fn base_time() -> TimeRange {
        TimeRange {
            start: "now-1h".to_string(),
            end: "now".to_string(),
            aggregator: Some("sum".to_string()),
            downsampler: None,
            rate: None,
            timezone: "UTC".to_string(),
        }
    }

    fn metric(id: &str, name: &str) -> MetricQuery {
        MetricQuery {
            id: id.to_string(),
            metric: name.to_string(),
            namespace: None,
            filter_set: None,
            group_by: Vec::new(),
            aggregator: None,
            downsampler: None,
            rate: None,
            sources: Vec::new(),
            ha: false,
        }
    }

    #[test]
    fn single_metric_single_output_plans_source_to_sink() {
        let query = TimeSeriesQuery {
            time: base_time(),
            filter_sets: Vec::new(),
            metrics: vec![metric("m1", "sys.cpu")],
            expressions: Vec::new(),
            outputs: vec![OutputSpec { id: "o1".to_string(), from: "m1".to_string(), alias: None }],
            use_cache: false,
            trace: false,
        };
        let p = plan(&query, &HashMap::new()).expect("plans cleanly");
        assert_eq!(p.node_count(), 2); // source + sink
        assert_eq!(p.order.len(), 2);
    }

    #[test]
    fn seed_scenario_5_cycle_rejection() {
        let query = TimeSeriesQuery {
            time: base_time(),
            filter_sets: Vec::new(),
            metrics: Vec::new(),
            expressions: vec![
                ExpressionQuery {
                    id: "e1".to_string(),
                    expr: "e2 + 1".to_string(),
                    join: JoinModeSpec::Union,
                    fill: FillSpec::Nan,
                },
                ExpressionQuery {
                    id: "e2".to_string(),
                    expr: "e1 + 1".to_string(),
                    join: JoinModeSpec::Union,
                    fill: FillSpec::Nan,
                },
            ],
            outputs: vec![OutputSpec { id: "o1".to_string(), from: "e1".to_string(), alias: None }],
            use_cache: false,
            trace: false,
        };
        let err = plan(&query, &HashMap::new()).unwrap_err();
        assert_eq!(err.code(), tsq_core::ErrorCode::PlanCycle);
    }

    #[test]
    fn multi_source_metric_inserts_ha_merger() {
        let mut m = metric("m1", "sys.cpu");
        m.sources = vec!["r1".to_string(), "r2".to_string()];
        m.ha = true;
        let query = TimeSeriesQuery {
            time: base_time(),
            filter_sets: Vec::new(),
            metrics: vec![m],
            expressions: Vec::new(),
            outputs: vec![OutputSpec { id: "o1".to_string(), from: "m1".to_string(), alias: None }],
            use_cache: false,
            trace: false,
        };
        let p = plan(&query, &HashMap::new()).expect("plans cleanly");
        let has_merger = (0..p.node_count())
            .map(NodeIndex::new)
            .any(|idx| matches!(p.node(idx).kind, PlanNodeKind::Operator(NodeKind::MergerHa)));
        assert!(has_merger);
    }

    #[test]
    fn fingerprint_is_stable_across_filter_set_reordering() {
        let mk_query = |filter_sets: Vec<FilterSet>| TimeSeriesQuery {
            time: base_time(),
            filter_sets,
            metrics: vec![metric("m1", "sys.cpu")],
            expressions: Vec::new(),
            outputs: vec![OutputSpec { id: "o1".to_string(), from: "m1".to_string(), alias: None }],
            use_cache: false,
            trace: false,
        };
        let fs_a = FilterSet {
            id: "fs1".to_string(),
            filters: vec![crate::query::FilterSpec {
                tag: "host".to_string(),
                kind: crate::query::FilterKind::Literal,
                value: "a".to_string(),
            }],
        };
        let fs_b = FilterSet {
            id: "fs2".to_string(),
            filters: vec![crate::query::FilterSpec {
                tag: "dc".to_string(),
                kind: crate::query::FilterKind::Literal,
                value: "us-east".to_string(),
            }],
        };
        let p1 = plan(&mk_query(vec![fs_a.clone(), fs_b.clone()]), &HashMap::new()).unwrap();
        let p2 = plan(&mk_query(vec![fs_b, fs_a]), &HashMap::new()).unwrap();
        assert_eq!(p1.fingerprint, p2.fingerprint);
    }

    #[test]
    fn unknown_output_reference_is_rejected() {
        let query = TimeSeriesQuery {
            time: base_time(),
            filter_sets: Vec::new(),
            metrics: vec![metric("m1", "sys.cpu")],
            expressions: Vec::new(),
            outputs: vec![OutputSpec { id: "o1".to_string(), from: "nope".to_string(), alias: None }],
            use_cache: false,
            trace: false,
        };
        assert!(plan(&query, &HashMap::new()).is_err());
    }
}
