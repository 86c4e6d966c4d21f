//! Engine-wide knobs (§6 "Environment"), loadable from YAML/JSON the way
//! `rde_core::PipelineSpec` is loaded from YAML in the teacher's CLI.

use serde::{Deserialize, Serialize};

use tsq_core::TsqError;

/// Partial-failure policy for shard mergers — left pluggable per §9's open
/// question rather than a single hardcoded threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardPartialFailurePolicy {
    /// Any shard failure fails the whole merge.
    None,
    /// Any number of shard failures are tolerated as long as one shard
    /// survives (matches `merge_shard`'s `allow_partial` flag).
    AllowAny,
    /// At most `max_failed` shards may fail.
    MaxFailed(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// `WorkerPool` concurrency cap (§5 "query thread pool").
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Per-query deadline in milliseconds (§4.5).
    #[serde(default = "default_deadline_ms")]
    pub query_deadline_ms: u64,
    /// §5 "max series per result" — a batch exceeding this is rejected with
    /// `OUT_OF_MEMORY` rather than silently truncated.
    #[serde(default = "default_max_series_per_result")]
    pub max_series_per_result: usize,
    /// §5 "max in-flight queries" across the whole process.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight_queries: usize,
    #[serde(default)]
    pub shard_partial_failure: ShardPartialFailurePolicy,
}

fn default_pool_size() -> usize {
    16
}

fn default_deadline_ms() -> u64 {
    30_000
}

fn default_max_series_per_result() -> usize {
    10_000
}

fn default_max_in_flight() -> usize {
    64
}

impl Default for ShardPartialFailurePolicy {
    fn default() -> Self {
        ShardPartialFailurePolicy::None
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            query_deadline_ms: default_deadline_ms(),
            max_series_per_result: default_max_series_per_result(),
            max_in_flight_queries: default_max_in_flight(),
            shard_partial_failure: ShardPartialFailurePolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self, TsqError> {
        serde_yaml::from_str(s).map_err(|e| TsqError::ParseError(format!("engine config: {e}")))
    }

    pub fn from_json_str(s: &str) -> Result<Self, TsqError> {
        serde_json::from_str(s).map_err(|e| TsqError::ParseError(format!("engine config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_populated_without_any_input() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.pool_size, 16);
        assert_eq!(cfg.shard_partial_failure, ShardPartialFailurePolicy::None);
    }

    #[test]
    fn yaml_overrides_merge_with_defaults() {
        let cfg = EngineConfig::from_yaml_str("pool_size: 4\nshard_partial_failure: allow_any\n").unwrap();
        assert_eq!(cfg.pool_size, 4);
        assert_eq!(cfg.query_deadline_ms, default_deadline_ms());
        assert_eq!(cfg.shard_partial_failure, ShardPartialFailurePolicy::AllowAny);
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(EngineConfig::from_yaml_str("bogus_field: 1\n").is_err());
    }
}
