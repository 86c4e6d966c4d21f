//! Translation from the declarative query model (`tsq-planner::query`) into
//! the runtime configs the node library (`tsq-nodes`, `tsq-kernel`) actually
//! consumes. Kept as its own module the way the teacher splits "what the
//! user asked for" from "what the transform engine runs" into a dedicated
//! config-building layer rather than inlining parsing into the executor.

use tsq_core::{Resolution, Timestamp, TsqError};
use tsq_kernel::{AggregatorKind, NumericFillPolicy};
use tsq_nodes::{parse_interval, Predicate, TagOp};
use tsq_planner::{FillSpec, FilterKind, FilterSet, FilterSpec, TimeRange};

use crate::config::ShardPartialFailurePolicy;

/// Parse an aggregator name from the query grammar ("sum", "avg", "p95", …)
/// into the kernel's closed `AggregatorKind`.
pub fn parse_aggregator(name: &str) -> Result<AggregatorKind, TsqError> {
    let lower = name.to_ascii_lowercase();
    Ok(match lower.as_str() {
        "sum" => AggregatorKind::Sum,
        "count" => AggregatorKind::Count,
        "min" => AggregatorKind::Min,
        "max" => AggregatorKind::Max,
        "avg" | "mean" => AggregatorKind::Avg,
        "median" => AggregatorKind::Median,
        "first" => AggregatorKind::First,
        "last" => AggregatorKind::Last,
        "dev" | "stddev" => AggregatorKind::Dev,
        other => {
            if let Some(p) = other.strip_prefix('p') {
                let pct: f64 = p
                    .parse()
                    .map_err(|_| TsqError::ParseError(format!("unknown aggregator '{name}'")))?;
                AggregatorKind::percentile(pct / 100.0)
            } else {
                return Err(TsqError::ParseError(format!("unknown aggregator '{name}'")));
            }
        }
    })
}

pub fn fill_to_policy(fill: FillSpec) -> NumericFillPolicy {
    match fill {
        FillSpec::Nan => NumericFillPolicy::NotANumber,
        FillSpec::Null => NumericFillPolicy::Null,
        FillSpec::Zero => NumericFillPolicy::Zero,
        FillSpec::None => NumericFillPolicy::None,
    }
}

/// Build the combined tag predicate for a filter set, ANDing every member
/// filter (§4.3 "natural join on a subset" — a filter set narrows, it never
/// widens). A `Range` filter's value is `"lo:hi"`.
pub fn build_predicate(filter_set: &FilterSet) -> Result<Predicate, TsqError> {
    let mut predicates = Vec::with_capacity(filter_set.filters.len());
    for f in &filter_set.filters {
        predicates.push(build_tag_predicate(f)?);
    }
    let mut iter = predicates.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| TsqError::ParseError(format!("filter_set '{}' has no filters", filter_set.id)))?;
    Ok(iter.fold(first, |acc, p| Predicate::And(Box::new(acc), Box::new(p))))
}

fn build_tag_predicate(f: &FilterSpec) -> Result<Predicate, TsqError> {
    let op = match f.kind {
        FilterKind::Literal => TagOp::literal(f.value.clone()),
        FilterKind::Wildcard => TagOp::wildcard(f.value.clone()),
        FilterKind::Regex => TagOp::regex(&f.value)?,
        FilterKind::Range => {
            let (lo, hi) = f
                .value
                .split_once(':')
                .ok_or_else(|| TsqError::ParseError(format!("range filter on '{}': value '{}' is not 'lo:hi'", f.tag, f.value)))?;
            let lo: f64 = lo
                .parse()
                .map_err(|_| TsqError::ParseError(format!("range filter on '{}': bad lower bound '{lo}'", f.tag)))?;
            let hi: f64 = hi
                .parse()
                .map_err(|_| TsqError::ParseError(format!("range filter on '{}': bad upper bound '{hi}'", f.tag)))?;
            TagOp::range(lo, hi)
        }
    };
    Ok(Predicate::tag(f.tag.clone(), op))
}

pub fn shard_allows_partial(policy: ShardPartialFailurePolicy, failed_count: usize) -> bool {
    match policy {
        ShardPartialFailurePolicy::None => false,
        ShardPartialFailurePolicy::AllowAny => true,
        ShardPartialFailurePolicy::MaxFailed(max) => failed_count <= max,
    }
}

/// Resolve a query's `[start, end)` time range, given in the grammar's
/// relative-or-absolute string form (`"now"`, `"now-1h"`, `"now+5m"`, or a
/// bare epoch-millis integer) into concrete [`Timestamp`]s anchored to
/// wall-clock `now` at plan-execution time.
///
/// Every bound is resolved against the *same* `now` so `start`/`end` stay
/// consistent even if resolving them takes a few milliseconds.
pub fn resolve_time_range(time: &TimeRange) -> Result<(Timestamp, Timestamp), TsqError> {
    let now = now_epoch_millis();
    let start = resolve_time_point(&time.start, now)?;
    let end = resolve_time_point(&time.end, now)?;
    Ok((start, end))
}

fn resolve_time_point(spec: &str, now_millis: i64) -> Result<Timestamp, TsqError> {
    let spec = spec.trim();
    if spec == "now" {
        return Ok(Timestamp::new(now_millis, Resolution::Millis));
    }
    if let Some(offset) = spec.strip_prefix("now-") {
        let nanos = parse_interval(offset)?;
        return Ok(Timestamp::new(now_millis - nanos / 1_000_000, Resolution::Millis));
    }
    if let Some(offset) = spec.strip_prefix("now+") {
        let nanos = parse_interval(offset)?;
        return Ok(Timestamp::new(now_millis + nanos / 1_000_000, Resolution::Millis));
    }
    let epoch_millis: i64 = spec
        .parse()
        .map_err(|_| TsqError::ParseError(format!("time bound '{spec}' is neither 'now', a relative 'now-<interval>' offset, nor an epoch-millis integer")))?;
    Ok(Timestamp::new(epoch_millis, Resolution::Millis))
}

fn now_epoch_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_aggregator_parses_from_p_prefix() {
        assert_eq!(parse_aggregator("p95").unwrap(), AggregatorKind::percentile(0.95));
    }

    #[test]
    fn unknown_aggregator_is_rejected() {
        assert!(parse_aggregator("bogus").is_err());
    }

    #[test]
    fn range_filter_requires_colon_separated_bounds() {
        let fs = FilterSet {
            id: "fs1".into(),
            filters: vec![FilterSpec {
                tag: "cpu".into(),
                kind: FilterKind::Range,
                value: "not-a-range".into(),
            }],
        };
        assert!(build_predicate(&fs).is_err());
    }

    #[test]
    fn shard_max_failed_policy_caps_tolerance() {
        let policy = ShardPartialFailurePolicy::MaxFailed(1);
        assert!(shard_allows_partial(policy, 1));
        assert!(!shard_allows_partial(policy, 2));
    }

    fn range(start: &str, end: &str) -> TimeRange {
        TimeRange {
            start: start.into(),
            end: end.into(),
            aggregator: None,
            downsampler: None,
            rate: None,
            timezone: "UTC".into(),
        }
    }

    #[test]
    fn now_resolves_to_the_same_instant_for_both_bounds_when_equal() {
        let (start, end) = resolve_time_range(&range("now", "now")).unwrap();
        assert_eq!(start.epoch(), end.epoch());
    }

    #[test]
    fn relative_offset_precedes_now() {
        let (start, end) = resolve_time_range(&range("now-1h", "now")).unwrap();
        assert!(start.epoch() < end.epoch());
        assert_eq!(end.epoch() - start.epoch(), 3_600_000);
    }

    #[test]
    fn relative_plus_offset_follows_now() {
        let (start, end) = resolve_time_range(&range("now", "now+5m")).unwrap();
        assert_eq!(end.epoch() - start.epoch(), 300_000);
    }

    #[test]
    fn absolute_epoch_millis_bounds_are_accepted() {
        let (start, end) = resolve_time_range(&range("1000", "2000")).unwrap();
        assert_eq!(start.epoch(), 1000);
        assert_eq!(end.epoch(), 2000);
    }

    #[test]
    fn malformed_bound_is_rejected() {
        assert!(resolve_time_range(&range("yesterday", "now")).is_err());
    }
}
