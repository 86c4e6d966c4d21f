//! Demo query runner: loads a declarative query file, plans it, and drives
//! it against synthetic in-memory sources, printing every batch to stdout.
//!
//! Grounded in the teacher's `rde-cli` main loop (clap args, `tracing`
//! init via `EnvFilter`, a `tokio::select!` between the running pipeline
//! and `ctrl_c` for graceful shutdown) — here the teacher's fixed
//! source/transform/sink chain becomes a full DAG built by `tsq-planner`
//! and driven by `tsq-exec::pipeline::run`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tsq_core::{DataSource, SourceCapabilities, StdoutSink};
use tsq_exec::{pipeline, PipelineContext, WorkerPool};

use tsq_cli::{load_engine_config, load_query, source_names, synthetic_source};

/// Run a declarative time-series query against synthetic demo data.
#[derive(Parser, Debug)]
#[command(name = "tsq-cli")]
#[command(about = "Plan and execute a tsq time-series query against synthetic demo data")]
struct Args {
    /// Path to the query file (JSON or YAML, by extension).
    #[arg(short, long)]
    query: PathBuf,

    /// Path to an `EngineConfig` file (JSON or YAML); defaults are used if omitted.
    #[arg(long)]
    engine_config: Option<PathBuf>,

    /// Number of synthetic points generated per demo source.
    #[arg(long, default_value_t = 60)]
    points: usize,

    /// Spacing between synthetic points, in seconds.
    #[arg(long, default_value_t = 60)]
    interval_secs: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let query = load_query(&args.query)?;
    let engine_config = load_engine_config(args.engine_config.as_deref())?;

    let capabilities: HashMap<String, SourceCapabilities> =
        source_names(&query).into_iter().map(|s| (s, SourceCapabilities::default())).collect();

    let plan = tsq_planner::plan(&query, &capabilities)?;
    tracing::info!(fingerprint = %plan.fingerprint, nodes = plan.node_count(), "planned query");

    let deadline = tokio::time::Instant::now() + Duration::from_millis(engine_config.query_deadline_ms);
    let ctx = PipelineContext::new(query, plan.fingerprint.clone(), deadline);
    let pool = Arc::new(WorkerPool::new(engine_config.pool_size));

    let points = args.points;
    let interval_secs = args.interval_secs;
    let sources = move |name: &str| -> Result<Box<dyn DataSource>, tsq_core::TsqError> {
        Ok(synthetic_source(name, points, interval_secs))
    };

    let run_ctx = ctx.clone();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("\nreceived ctrl-c, cancelling query...");
            ctx.cancel(Some("ctrl_c".to_string()));
        }
        result = pipeline::run(&plan, run_ctx, pool, &engine_config, &sources, Box::new(StdoutSink::new())) => {
            result?;
        }
    }

    let snapshot = ctx.metrics.snapshot();
    tracing::info!(?snapshot, "query finished");
    Ok(())
}
