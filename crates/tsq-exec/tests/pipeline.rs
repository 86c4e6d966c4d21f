//! End-to-end DAG runs: plan a declarative query, execute it with
//! `tsq_exec::pipeline::run` against in-memory sources, and observe the
//! result through a `ChannelSink`. One test per documented seed scenario.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tsq_core::{
    ChannelSink, DataSource, DataSourceConfig, FetchOutcome, InMemoryTimeSeries, MemoryDataSource,
    NumericValue, QueryResult, Resolution, SinkEvent, SourceCapabilities, TimeSeries, TimeSeriesId,
    Timestamp, TsqError, TypeToken, TypedValue,
};
use tsq_exec::{pipeline, EngineConfig, PipelineContext, WorkerPool};
use tsq_planner::{
    ExpressionQuery, FillSpec, JoinModeSpec, MetricQuery, OutputSpec, RateSpec, TimeRange,
    TimeSeriesQuery,
};

fn numeric_series(metric: &str, points: &[(i64, f64)]) -> Arc<dyn TimeSeries> {
    let id = TimeSeriesId::metric_only(metric.to_string());
    let data: Vec<(Timestamp, TypedValue)> = points
        .iter()
        .map(|(ts, v)| (Timestamp::new(*ts, Resolution::Millis), TypedValue::Numeric(NumericValue::Float(*v))))
        .collect();
    Arc::new(InMemoryTimeSeries::new(id).with_points(TypeToken::NUMERIC, data))
}

fn one_batch_source(name: &str, points: &[(i64, f64)]) -> Box<dyn DataSource> {
    replica_source(name, name, points)
}

/// Like [`one_batch_source`], but with the emitted series' own identity
/// (`series_id`) kept independent of the `DataSource`'s replica name — two
/// replicas of one logical metric share a `series_id` so an HA merger's
/// per-id grouping actually has something to merge.
fn replica_source(ds_name: &str, series_id: &str, points: &[(i64, f64)]) -> Box<dyn DataSource> {
    let source = MemoryDataSource::new(ds_name).with_capabilities(SourceCapabilities::default());
    let result = QueryResult::new(ds_name, ds_name, 0, Resolution::Millis, vec![numeric_series(series_id, points)]);
    source.push_result(result);
    Box::new(source)
}

fn collect_numeric(series: &Arc<dyn TimeSeries>) -> Vec<(i64, f64)> {
    let mut out = Vec::new();
    let mut cursor = series.cursor(TypeToken::NUMERIC).expect("series exposes NUMERIC");
    while let Some((ts, value)) = cursor.next() {
        if let TypedValue::Numeric(n) = value {
            let v = match n {
                NumericValue::Float(f) => f,
                NumericValue::Int(i) => i as f64,
            };
            out.push((ts.epoch(), v));
        }
    }
    out
}

/// A downsample result packs its whole bucketed window into one point
/// holding a dense `NumericArrayValue`, not a `NUMERIC`-typed stream.
fn collect_downsample_array(series: &Arc<dyn TimeSeries>) -> (Vec<f64>, Vec<bool>) {
    let mut cursor = series.cursor(TypeToken::NUMERIC_ARRAY).expect("downsample output exposes NUMERIC_ARRAY");
    let (_, value) = cursor.next().expect("downsample output carries exactly one point");
    match value {
        TypedValue::Array(arr) => (arr.values, arr.present),
        other => panic!("expected a NUMERIC_ARRAY value, got {other:?}"),
    }
}

fn time_range(start: &str, end: &str) -> TimeRange {
    TimeRange { start: start.into(), end: end.into(), aggregator: None, downsampler: None, rate: None, timezone: "UTC".into() }
}

async fn run_query(
    query: TimeSeriesQuery,
    capabilities: HashMap<String, SourceCapabilities>,
    sources: impl Fn(&str) -> Result<Box<dyn DataSource>, TsqError> + Send + Sync + 'static,
) -> (Result<(), TsqError>, Vec<SinkEvent>) {
    let plan = tsq_planner::plan(&query, &capabilities).expect("plan succeeds");
    let engine = EngineConfig::default();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let ctx = PipelineContext::new(query, plan.fingerprint.clone(), deadline);
    let pool = Arc::new(WorkerPool::new(engine.pool_size));
    let (sink, mut rx) = ChannelSink::new(32);

    let result = pipeline::run(&plan, ctx, pool, &engine, &sources, Box::new(sink)).await;

    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    (result, events)
}

/// Scenario 1: a simple downsample over four raw points bucketed into three
/// 2-second windows, summed, with the same window used by
/// `tsq_nodes::downsample`'s own unit test.
#[tokio::test]
async fn simple_downsample_over_a_metric() {
    let query = TimeSeriesQuery {
        time: time_range("0", "6000"),
        filter_sets: vec![],
        metrics: vec![MetricQuery {
            id: "m1".into(),
            metric: "sys.cpu".into(),
            namespace: None,
            filter_set: None,
            group_by: vec![],
            aggregator: Some("sum".into()),
            downsampler: Some("2s".into()),
            rate: None,
            sources: vec![],
            ha: false,
        }],
        expressions: vec![],
        outputs: vec![OutputSpec { id: "o1".into(), from: "m1".into(), alias: None }],
        use_cache: false,
        trace: false,
    };
    let capabilities: HashMap<String, SourceCapabilities> =
        [("sys.cpu".to_string(), SourceCapabilities::default())].into_iter().collect();
    let points = [(1000, 42.0), (2000, 8.0), (3000, 10.0), (4000, 6.0)];

    let (result, events) = run_query(query, capabilities, move |name| match name {
        "sys.cpu" => Ok(one_batch_source(name, &points)),
        other => Err(TsqError::UnknownSource(other.to_string())),
    })
    .await;

    result.expect("pipeline run succeeds");
    let mut completes = 0;
    let mut bucketed = None;
    for ev in events {
        match ev {
            SinkEvent::Next(r) => {
                assert_eq!(r.series.len(), 1);
                bucketed = Some(collect_downsample_array(&r.series[0]));
            }
            SinkEvent::Complete => completes += 1,
            SinkEvent::Error(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(completes, 1);
    let (values, present) = bucketed.expect("one result batch");
    assert_eq!(values, vec![42.0, 18.0, 6.0]);
    assert_eq!(present, vec![true, true, true]);
}

/// Scenario 2: an HA metric with two replicas, one of which fails
/// transiently; the merger tolerates it and surfaces a warning.
#[tokio::test]
async fn ha_merge_survives_one_failed_replica() {
    let query = TimeSeriesQuery {
        time: time_range("0", "1000"),
        filter_sets: vec![],
        metrics: vec![MetricQuery {
            id: "m1".into(),
            metric: "sys.cpu".into(),
            namespace: None,
            filter_set: None,
            group_by: vec![],
            aggregator: None,
            downsampler: None,
            rate: None,
            sources: vec!["r1".into(), "r2".into()],
            ha: true,
        }],
        expressions: vec![],
        outputs: vec![OutputSpec { id: "o1".into(), from: "m1".into(), alias: None }],
        use_cache: false,
        trace: false,
    };
    let capabilities: HashMap<String, SourceCapabilities> = ["r1", "r2"]
        .into_iter()
        .map(|s| (s.to_string(), SourceCapabilities::default()))
        .collect();

    let (result, events) = run_query(query, capabilities, |name| match name {
        "r1" => Ok(replica_source("r1", "sys.cpu", &[(0, 42.0)])),
        "r2" => {
            let source = MemoryDataSource::new("r2").with_capabilities(SourceCapabilities::default());
            source.push_failure(TsqError::SourceFailed { source: "r2".into(), reason: "connection reset".into() });
            Ok(Box::new(source))
        }
        other => Err(TsqError::UnknownSource(other.to_string())),
    })
    .await;

    result.expect("pipeline run succeeds despite the failed replica");
    let mut completes = 0;
    let mut saw_warning = false;
    let mut values = Vec::new();
    for ev in events {
        match ev {
            SinkEvent::Next(r) => {
                if !r.warnings.is_empty() {
                    saw_warning = true;
                    assert!(r.warnings.iter().any(|w| w.contains("m1::source::r2")));
                }
                for s in &r.series {
                    values.extend(collect_numeric(s));
                }
            }
            SinkEvent::Complete => completes += 1,
            SinkEvent::Error(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(completes, 1);
    assert!(saw_warning, "expected the surviving batch to carry a warning about the failed replica");
    assert_eq!(values, vec![(0, 42.0)]);
}

/// Scenario 3: a rate over a counter that wraps once, the same four points
/// `tsq_nodes::rate`'s own unit test exercises.
#[tokio::test]
async fn rate_on_a_rolling_counter() {
    let query = TimeSeriesQuery {
        time: time_range("0", "3000"),
        filter_sets: vec![],
        metrics: vec![MetricQuery {
            id: "m1".into(),
            metric: "ctr".into(),
            namespace: None,
            filter_set: None,
            group_by: vec![],
            aggregator: None,
            downsampler: None,
            rate: Some(RateSpec { is_counter: true, counter_max: Some(100.0), reset_value: Some(0.0) }),
            sources: vec![],
            ha: false,
        }],
        expressions: vec![],
        outputs: vec![OutputSpec { id: "o1".into(), from: "m1".into(), alias: None }],
        use_cache: false,
        trace: false,
    };
    let capabilities: HashMap<String, SourceCapabilities> =
        [("ctr".to_string(), SourceCapabilities::default())].into_iter().collect();
    let points = [(0, 10.0), (1000, 20.0), (2000, 5.0), (3000, 15.0)];

    let (result, events) = run_query(query, capabilities, move |name| match name {
        "ctr" => Ok(one_batch_source(name, &points)),
        other => Err(TsqError::UnknownSource(other.to_string())),
    })
    .await;

    result.expect("pipeline run succeeds");
    let mut rates = Vec::new();
    for ev in events {
        if let SinkEvent::Next(r) = ev {
            for s in &r.series {
                rates.extend(collect_numeric(s).into_iter().map(|(_, v)| v));
            }
        }
    }
    assert_eq!(rates.len(), 3);
    assert!((rates[0] - 0.01).abs() < 1e-9);
    assert!((rates[1] - 0.085).abs() < 1e-9);
    assert!((rates[2] - 0.01).abs() < 1e-9);
}

/// Scenario 4: a union-joined expression over two metrics whose points only
/// partially overlap; NaN fill propagates a missing operand through `a+b`,
/// zero fill instead lets the present operand pass through unchanged.
#[tokio::test]
async fn expression_union_join_fills_the_missing_operand() {
    let metric = |id: &str| MetricQuery {
        id: id.into(),
        metric: id.into(),
        namespace: None,
        filter_set: None,
        group_by: vec![],
        aggregator: None,
        downsampler: None,
        rate: None,
        sources: vec![],
        ha: false,
    };
    let query = TimeSeriesQuery {
        time: time_range("0", "3000"),
        filter_sets: vec![],
        metrics: vec![metric("a"), metric("b")],
        expressions: vec![
            ExpressionQuery { id: "e1".into(), expr: "a+b".into(), join: JoinModeSpec::Union, fill: FillSpec::Nan },
            ExpressionQuery { id: "e2".into(), expr: "a+b".into(), join: JoinModeSpec::Union, fill: FillSpec::Zero },
        ],
        outputs: vec![
            OutputSpec { id: "o1".into(), from: "e1".into(), alias: None },
            OutputSpec { id: "o2".into(), from: "e2".into(), alias: None },
        ],
        use_cache: false,
        trace: false,
    };
    let capabilities: HashMap<String, SourceCapabilities> =
        ["a", "b"].into_iter().map(|s| (s.to_string(), SourceCapabilities::default())).collect();

    let (result, events) = run_query(query, capabilities, |name| match name {
        "a" => Ok(one_batch_source("a", &[(1000, 3.0), (2000, 4.0)])),
        "b" => Ok(one_batch_source("b", &[(1000, 2.0)])),
        other => Err(TsqError::UnknownSource(other.to_string())),
    })
    .await;

    result.expect("pipeline run succeeds");
    let mut nan_fill: HashMap<i64, f64> = HashMap::new();
    let mut zero_fill: HashMap<i64, f64> = HashMap::new();
    let mut completes = 0;
    for ev in events {
        match ev {
            SinkEvent::Next(r) => {
                let points: Vec<(i64, f64)> = r.series.iter().flat_map(collect_numeric).collect();
                match r.data_source.as_str() {
                    "o1::sink" => nan_fill.extend(points),
                    "o2::sink" => zero_fill.extend(points),
                    other => panic!("unexpected output tag '{other}'"),
                }
            }
            SinkEvent::Complete => completes += 1,
            SinkEvent::Error(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(completes, 1, "both outputs share one terminal callback");
    assert_eq!(nan_fill.get(&1000).copied(), Some(5.0));
    assert!(nan_fill.get(&2000).copied().unwrap().is_nan(), "b is missing at t=2000, NaN fill poisons the sum");
    assert_eq!(zero_fill.get(&1000).copied(), Some(5.0));
    assert_eq!(zero_fill.get(&2000).copied(), Some(4.0), "b is missing at t=2000, zero fill leaves a's value through");
}

/// Scenario 5: two expressions referencing each other form a cycle the
/// planner must reject before any node is ever run.
#[test]
fn mutually_referencing_expressions_are_rejected_as_a_cycle() {
    let query = TimeSeriesQuery {
        time: time_range("now-1h", "now"),
        filter_sets: vec![],
        metrics: vec![],
        expressions: vec![
            ExpressionQuery { id: "e1".into(), expr: "e2 + 1".into(), join: JoinModeSpec::Union, fill: FillSpec::Nan },
            ExpressionQuery { id: "e2".into(), expr: "e1 + 1".into(), join: JoinModeSpec::Union, fill: FillSpec::Nan },
        ],
        outputs: vec![],
        use_cache: false,
        trace: false,
    };
    let err = tsq_planner::plan(&query, &HashMap::new()).expect_err("mutual reference is a cycle");
    assert!(matches!(err, TsqError::PlanCycle(_)), "expected PlanCycle, got {err:?}");
}

/// A `DataSource` whose second fetch never naturally returns, standing in
/// for a hung backend so cancellation mid-stream can be exercised without a
/// real flaky dependency.
struct SlowSource {
    first: Option<QueryResult>,
}

#[async_trait]
impl DataSource for SlowSource {
    fn id(&self) -> &str {
        "slow"
    }

    async fn init(&mut self, _config: &DataSourceConfig) -> Result<(), TsqError> {
        Ok(())
    }

    async fn fetch_next(&mut self, _deadline: tokio::time::Instant) -> Result<FetchOutcome, TsqError> {
        if let Some(r) = self.first.take() {
            return Ok(FetchOutcome::Result(r));
        }
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(FetchOutcome::Exhausted)
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::default()
    }

    async fn close(&mut self) -> Result<(), TsqError> {
        Ok(())
    }
}

/// Scenario 6: cancelling mid-stream yields exactly one terminal callback
/// and `pipeline::run` returns promptly rather than waiting out the hang.
#[tokio::test]
async fn cancellation_mid_stream_yields_exactly_one_terminal_callback() {
    let query = TimeSeriesQuery {
        time: time_range("now-1h", "now"),
        filter_sets: vec![],
        metrics: vec![MetricQuery {
            id: "m1".into(),
            metric: "slow".into(),
            namespace: None,
            filter_set: None,
            group_by: vec![],
            aggregator: None,
            downsampler: None,
            rate: None,
            sources: vec!["slow".into()],
            ha: false,
        }],
        expressions: vec![],
        outputs: vec![OutputSpec { id: "o1".into(), from: "m1".into(), alias: None }],
        use_cache: false,
        trace: false,
    };
    let capabilities: HashMap<String, SourceCapabilities> =
        [("slow".to_string(), SourceCapabilities::default())].into_iter().collect();

    let plan = tsq_planner::plan(&query, &capabilities).expect("plan succeeds");
    let engine = EngineConfig::default();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    let ctx = PipelineContext::new(query, plan.fingerprint.clone(), deadline);
    let pool = Arc::new(WorkerPool::new(engine.pool_size));
    let (sink, mut rx) = ChannelSink::new(16);

    let sources = |name: &str| -> Result<Box<dyn DataSource>, TsqError> {
        match name {
            "slow" => {
                let first = QueryResult::new("slow", "slow", 0, Resolution::Millis, vec![numeric_series("slow", &[(0, 1.0)])]);
                Ok(Box::new(SlowSource { first: Some(first) }))
            }
            other => Err(TsqError::UnknownSource(other.to_string())),
        }
    };

    let ctx_task = ctx.clone();
    let handle = tokio::spawn(async move {
        let plan = plan;
        let engine = engine;
        pipeline::run(&plan, ctx_task, pool, &engine, &sources, Box::new(sink)).await
    });

    let first = rx.recv().await.expect("the first batch arrives before the hang");
    assert!(matches!(first, SinkEvent::Next(_)));

    ctx.cancel(Some("test-cancel".to_string()));

    let run_result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("pipeline::run should return promptly once cancelled, not hang with the source")
        .expect("pipeline task panicked");
    run_result.expect("run() itself reports Ok even when the data plane was cancelled");

    let mut terminal_count = 0;
    while let Some(ev) = rx.recv().await {
        match ev {
            SinkEvent::Next(_) => panic!("no further batches expected once cancellation has fired"),
            SinkEvent::Complete | SinkEvent::Error(_) => terminal_count += 1,
        }
    }
    assert_eq!(terminal_count, 1, "at most one terminal callback reaches the sink");
}
