//! Exercises the demo CLI's own building blocks end to end: load a query
//! file the way `main` does, build synthetic sources, plan, and run the
//! pipeline — without spawning the compiled binary.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tsq_core::{ChannelSink, DataSource, SinkEvent, SourceCapabilities, TsqError};
use tsq_exec::{pipeline, EngineConfig, PipelineContext, WorkerPool};
use tsq_cli::{load_engine_config, load_query, source_names, synthetic_source};

fn write_query_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[tokio::test]
async fn demo_query_plans_and_runs_against_synthetic_sources() {
    let file = write_query_file(
        r#"{
            "time": {"start": "now-1h", "end": "now", "aggregator": null, "downsampler": null, "rate": null, "timezone": "UTC"},
            "filter_sets": [],
            "metrics": [{
                "id": "m1", "metric": "sys.cpu", "namespace": null, "filter_set": null,
                "group_by": [], "aggregator": "avg", "downsampler": "1m", "rate": null,
                "sources": [], "ha": false
            }],
            "expressions": [],
            "outputs": [{"id": "o1", "from": "m1", "alias": null}],
            "use_cache": false,
            "trace": false
        }"#,
    );

    let query = load_query(file.path()).expect("demo query file loads");
    let engine_config = load_engine_config(None).expect("defaults apply with no engine config file");

    let capabilities: HashMap<String, SourceCapabilities> =
        source_names(&query).into_iter().map(|s| (s, SourceCapabilities::default())).collect();
    assert_eq!(capabilities.keys().collect::<Vec<_>>(), vec!["sys.cpu"]);

    let plan = tsq_planner::plan(&query, &capabilities).expect("demo query plans cleanly");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let ctx = PipelineContext::new(query, plan.fingerprint.clone(), deadline);
    let pool = Arc::new(WorkerPool::new(engine_config.pool_size));
    let (sink, mut rx) = ChannelSink::new(32);

    let sources = |name: &str| -> Result<Box<dyn DataSource>, TsqError> { Ok(synthetic_source(name, 20, 60)) };

    pipeline::run(&plan, ctx, pool, &engine_config, &sources, Box::new(sink))
        .await
        .expect("demo pipeline run succeeds against synthetic data");

    let mut saw_batch = false;
    let mut completes = 0;
    while let Some(ev) = rx.recv().await {
        match ev {
            SinkEvent::Next(r) => {
                saw_batch = true;
                assert!(!r.series.is_empty());
            }
            SinkEvent::Complete => completes += 1,
            SinkEvent::Error(e) => panic!("unexpected error from synthetic demo data: {e}"),
        }
    }
    assert!(saw_batch, "expected at least one downsampled batch");
    assert_eq!(completes, 1);
}

#[test]
fn missing_query_file_is_a_readable_error() {
    let missing = std::path::Path::new("/nonexistent/tsq-demo-query.json");
    let err = load_query(missing).expect_err("a missing file cannot be loaded");
    assert!(err.to_string().contains("reading query file"));
}
