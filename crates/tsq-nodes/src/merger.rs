//! `Merger`: HA, Shard, and Split modes (§4.3, §8 scenario 2 "HA
//! survivability").

use std::collections::BTreeMap;
use std::sync::Arc;

use tsq_core::{InMemoryTimeSeries, NumericValue, TimeSeries, Timestamp, TsqError, TypeToken, TypedValue};
use tsq_kernel::AggregatorKind;

/// One replica's contribution to an HA/shard merge: either a successful
/// batch of series, or the error that replica reported.
pub enum ReplicaOutcome {
    Ok(Vec<Arc<dyn TimeSeries>>),
    Err { replica: String, err: TsqError },
}

/// HA merge: every replica carries the *same* logical series (matched by
/// id); per timestamp, reduce the values reported across healthy replicas
/// with `reducer` (typically `Last` or `Max`). Requires at least one
/// healthy replica; otherwise fails with the last-seen error.
pub fn merge_ha(
    replicas: Vec<ReplicaOutcome>,
    reducer: AggregatorKind,
) -> Result<(Vec<InMemoryTimeSeries>, Vec<String>), TsqError> {
    let mut warnings = Vec::new();
    let mut healthy: Vec<Vec<Arc<dyn TimeSeries>>> = Vec::new();

    for outcome in replicas {
        match outcome {
            ReplicaOutcome::Ok(series) => healthy.push(series),
            ReplicaOutcome::Err { replica, err } => {
                warnings.push(format!("{} on {replica}: {err}", err.code()));
            }
        }
    }

    if healthy.is_empty() {
        return Err(TsqError::SourceFailed {
            source: "ha_merger".into(),
            reason: "no healthy replica survived".into(),
        });
    }

    // Group every healthy replica's series by id, then reduce per timestamp.
    let mut by_id: BTreeMap<tsq_core::TimeSeriesId, BTreeMap<Timestamp, Vec<f64>>> = BTreeMap::new();
    for replica_series in &healthy {
        for series in replica_series {
            let Some(mut cursor) = series.cursor(TypeToken::NUMERIC) else {
                continue;
            };
            let entry = by_id.entry(series.id().clone()).or_default();
            while let Some((ts, value)) = cursor.next() {
                if let TypedValue::Numeric(n) = value {
                    entry.entry(ts).or_default().push(n.as_f64());
                }
            }
        }
    }

    let merged = by_id
        .into_iter()
        .map(|(id, by_ts)| {
            let points: Vec<(Timestamp, TypedValue)> = by_ts
                .into_iter()
                .map(|(ts, mut values)| {
                    let reduced = reducer.reduce_exact(&mut values);
                    (ts, TypedValue::Numeric(NumericValue::Float(reduced)))
                })
                .collect();
            InMemoryTimeSeries::new(id).with_points(TypeToken::NUMERIC, points)
        })
        .collect();

    Ok((merged, warnings))
}

/// Shard merge: every shard carries a *disjoint* partition of the series
/// space; union them. If any shard failed, the merge still succeeds (with
/// a warning) when `allow_partial` is set — otherwise it propagates the
/// first failure.
pub fn merge_shard(
    shards: Vec<ReplicaOutcome>,
    allow_partial: bool,
) -> Result<(Vec<Arc<dyn TimeSeries>>, Vec<String>), TsqError> {
    let mut warnings = Vec::new();
    let mut union = Vec::new();

    for outcome in shards {
        match outcome {
            ReplicaOutcome::Ok(series) => union.extend(series),
            ReplicaOutcome::Err { replica, err } => {
                if allow_partial {
                    warnings.push(format!("{} on shard {replica}: {err}", err.code()));
                } else {
                    return Err(err);
                }
            }
        }
    }

    Ok((union, warnings))
}

/// Split: inverse of shard. Partitions one input batch into N logical
/// outputs by a caller-supplied key function (typically a tag value), for
/// fan-out to per-shard consumers.
pub fn split_by<F>(series: Vec<Arc<dyn TimeSeries>>, mut key_fn: F) -> BTreeMap<String, Vec<Arc<dyn TimeSeries>>>
where
    F: FnMut(&tsq_core::TimeSeriesId) -> String,
{
    let mut out: BTreeMap<String, Vec<Arc<dyn TimeSeries>>> = BTreeMap::new();
    for s in series {
        let key = key_fn(s.id());
        out.entry(key).or_default().push(s);
    }
    out
}
