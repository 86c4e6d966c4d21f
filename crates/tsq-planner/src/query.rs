//! The declarative query shape (§6 "Declarative query input"): `time`,
//! `filter_sets[]`, `metrics[]`, `expressions[]`, `outputs[]`, plus the
//! `use_cache`/`trace` flags. `#[serde(deny_unknown_fields)]` enforces
//! "unknown fields are rejected" at the deserialization boundary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub aggregator: Option<String>,
    #[serde(default)]
    pub downsampler: Option<String>,
    #[serde(default)]
    pub rate: Option<RateSpec>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateSpec {
    #[serde(default)]
    pub is_counter: bool,
    #[serde(default)]
    pub counter_max: Option<f64>,
    #[serde(default)]
    pub reset_value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Literal,
    Wildcard,
    Regex,
    Range,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterSpec {
    pub tag: String,
    #[serde(rename = "type")]
    pub kind: FilterKind,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterSet {
    pub id: String,
    pub filters: Vec<FilterSpec>,
}

/// One resolved metric reference: a metric name, an optional filter-set
/// reference, and the per-metric operator chain (downsample/rate/groupby)
/// overriding `time`'s defaults when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricQuery {
    pub id: String,
    pub metric: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub filter_set: Option<String>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub aggregator: Option<String>,
    #[serde(default)]
    pub downsampler: Option<String>,
    #[serde(default)]
    pub rate: Option<RateSpec>,
    /// Replica/shard source ids this metric resolves to. More than one
    /// triggers merger insertion in planning step 5.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub ha: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinModeSpec {
    Intersection,
    Union,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FillSpec {
    Nan,
    Null,
    Zero,
    None,
}

/// An expression node: children are metric or sub-expression ids it
/// references by name in its grammar (§4.3 `Expression`, §4.4 step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpressionQuery {
    pub id: String,
    pub expr: String,
    #[serde(default = "default_join_mode")]
    pub join: JoinModeSpec,
    #[serde(default = "default_fill")]
    pub fill: FillSpec,
}

fn default_join_mode() -> JoinModeSpec {
    JoinModeSpec::Union
}

fn default_fill() -> FillSpec {
    FillSpec::Nan
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSpec {
    pub id: String,
    /// Id of the metric or expression this output pulls from.
    pub from: String,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeSeriesQuery {
    pub time: TimeRange,
    #[serde(default)]
    pub filter_sets: Vec<FilterSet>,
    pub metrics: Vec<MetricQuery>,
    #[serde(default)]
    pub expressions: Vec<ExpressionQuery>,
    pub outputs: Vec<OutputSpec>,
    #[serde(default)]
    pub use_cache: bool,
    #[serde(default)]
    pub trace: bool,
}

impl TimeSeriesQuery {
    pub fn filter_set_ids(&self) -> HashMap<&str, &FilterSet> {
        self.filter_sets.iter().map(|fs| (fs.id.as_str(), fs)).collect()
    }

    pub fn metric_ids(&self) -> HashMap<&str, &MetricQuery> {
        self.metrics.iter().map(|m| (m.id.as_str(), m)).collect()
    }

    pub fn expression_ids(&self) -> HashMap<&str, &ExpressionQuery> {
        self.expressions.iter().map(|e| (e.id.as_str(), e)).collect()
    }
}
