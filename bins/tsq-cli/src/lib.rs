//! Query-file loading, engine-config loading, and synthetic demo sources for
//! the `tsq-cli` binary, split out so integration tests can drive them
//! without spawning the compiled binary (mirrors the teacher's pattern of a
//! thin `main.rs` over a testable library crate of the same name).

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use tsq_core::{
    DataSource, InMemoryTimeSeries, MemoryDataSource, NumericValue, QueryResult, Resolution,
    SourceCapabilities, TimeSeriesId, Timestamp, TypeToken, TypedValue,
};
use tsq_exec::EngineConfig;
use tsq_planner::TimeSeriesQuery;

pub fn load_query(path: &Path) -> Result<TimeSeriesQuery> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading query file {}", path.display()))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&text)?),
        _ => Ok(serde_json::from_str(&text)?),
    }
}

pub fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading engine config {}", path.display()))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => Ok(EngineConfig::from_yaml_str(&text)?),
        _ => Ok(EngineConfig::from_json_str(&text)?),
    }
}

/// Collect the source names a query needs to fetch from, defaulting an
/// HA-less metric with no explicit `sources` to its own metric name.
pub fn source_names(query: &TimeSeriesQuery) -> Vec<String> {
    let mut names = Vec::new();
    for metric in &query.metrics {
        if metric.sources.is_empty() {
            names.push(metric.metric.clone());
        } else {
            names.extend(metric.sources.iter().cloned());
        }
    }
    names
}

/// Build a `MemoryDataSource` seeded with a handful of synthetic numeric
/// points, one series per `(source name)`, standing in for a real storage
/// backend (§1 scope — HBase/Redis/Aura/Prometheus/Influx are external
/// collaborators, not something this demo CLI can reach).
pub fn synthetic_source(name: &str, points: usize, interval_secs: i64) -> Box<dyn DataSource> {
    let source = MemoryDataSource::new(name).with_capabilities(SourceCapabilities::default());
    let now_millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;
    let start = now_millis - points as i64 * interval_secs * 1000;

    let mut series: Vec<(Timestamp, TypedValue)> = Vec::with_capacity(points);
    for i in 0..points {
        let ts = Timestamp::new(start + i as i64 * interval_secs * 1000, Resolution::Millis);
        let value = 10.0 + (i as f64 * 0.5).sin() * 5.0 + i as f64 * 0.01;
        series.push((ts, TypedValue::Numeric(NumericValue::Float(value))));
    }

    let id = TimeSeriesId::metric_only(name.to_string()).with_tag("source", name.to_string());
    let ts = InMemoryTimeSeries::new(id).with_points(TypeToken::NUMERIC, series);
    let result = QueryResult::new(name, name, 0, Resolution::Millis, vec![Arc::new(ts)]);
    source.push_result(result);
    Box::new(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_a_json_query_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"time":{{"start":"now-1h","end":"now","aggregator":null,"downsampler":null,"rate":null,"timezone":"UTC"}},"filter_sets":[],"metrics":[{{"id":"m1","metric":"sys.cpu","namespace":null,"filter_set":null,"group_by":[],"aggregator":null,"downsampler":null,"rate":null,"sources":[],"ha":false}}],"expressions":[],"outputs":[{{"id":"o1","from":"m1","alias":null}}],"use_cache":false,"trace":false}}"#
        )
        .unwrap();
        let query = load_query(file.path()).expect("valid query file parses");
        assert_eq!(query.metrics.len(), 1);
        assert_eq!(query.metrics[0].metric, "sys.cpu");
    }

    #[test]
    fn missing_engine_config_path_falls_back_to_defaults() {
        let cfg = load_engine_config(None).expect("defaults always succeed");
        assert_eq!(cfg.pool_size, EngineConfig::default().pool_size);
    }

    #[test]
    fn source_names_defaults_to_the_metric_name_when_sources_is_empty() {
        let query: TimeSeriesQuery = serde_json::from_str(
            r#"{"time":{"start":"now-1h","end":"now","aggregator":null,"downsampler":null,"rate":null,"timezone":"UTC"},"filter_sets":[],"metrics":[{"id":"m1","metric":"sys.cpu","namespace":null,"filter_set":null,"group_by":[],"aggregator":null,"downsampler":null,"rate":null,"sources":[],"ha":false},{"id":"m2","metric":"sys.mem","namespace":null,"filter_set":null,"group_by":[],"aggregator":null,"downsampler":null,"rate":null,"sources":["r1","r2"],"ha":true}],"expressions":[],"outputs":[],"use_cache":false,"trace":false}"#,
        )
        .unwrap();
        assert_eq!(source_names(&query), vec!["sys.cpu", "r1", "r2"]);
    }

    #[test]
    fn synthetic_source_produces_the_requested_point_count() {
        use tsq_core::{FetchOutcome, DataSourceConfig};

        let mut source = synthetic_source("sys.cpu", 5, 60);
        let config = DataSourceConfig::default();
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            source.init(&config).await.unwrap();
            let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
            match source.fetch_next(deadline).await.unwrap() {
                FetchOutcome::Result(r) => {
                    assert_eq!(r.series.len(), 1);
                }
                FetchOutcome::Exhausted => panic!("expected a result batch, got Exhausted"),
            }
        });
    }
}
