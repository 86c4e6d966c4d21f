//! `GroupBy`: partitions input series by a subset of tag keys and reduces
//! each partition with a numeric aggregator (§4.3).
//!
//! Raw (`Numeric`) partitions are reduced over the union of timestamps seen
//! across partition members, interpolating any member missing at a given
//! timestamp through the kernel (§4.6) the same way `join::align` aligns
//! expression operands. Aligned (`NumericArray`) partitions are reduced
//! columnarly via [`tsq_kernel::reduce_arrays_indexwise`], which is the
//! index-wise path the spec calls out explicitly for array input.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tsq_core::{InMemoryTimeSeries, TimeSeries, TimeSeriesId, Timestamp, TypeToken, TypedValue, NumericValue};
use tsq_kernel::{interpolate_numeric, reduce_arrays_indexwise, AggregatorKind, Neighbor, NumericFillPolicy};

/// The tag-key subset a partition is keyed on; series sharing the same
/// values for these keys land in the same partition.
#[derive(Debug, Clone)]
pub struct GroupByConfig {
    pub group_keys: Vec<String>,
    pub aggregator: AggregatorKind,
}

fn partition_key(id: &TimeSeriesId, group_keys: &[String]) -> BTreeMap<String, String> {
    group_keys
        .iter()
        .map(|k| (k.clone(), id.tags.get(k).cloned().unwrap_or_default()))
        .collect()
}

fn partition_id(metric: &str, key: &BTreeMap<String, String>) -> TimeSeriesId {
    let mut id = TimeSeriesId::metric_only(metric);
    for (k, v) in key {
        id = id.with_tag(k, v);
    }
    id
}

/// Reduce a batch of raw-numeric series into one series per partition.
///
/// Each partition member contributes its own raw timestamps; a member
/// missing at a timestamp another member has is interpolated through `fill`
/// before the aggregator reduces the column, rather than silently dropping
/// that member from the reduction at that point.
pub fn group_by_numeric(
    series: &[Arc<dyn TimeSeries>],
    config: &GroupByConfig,
    fill: NumericFillPolicy,
) -> Vec<InMemoryTimeSeries> {
    let mut partitions: BTreeMap<Vec<(String, String)>, (TimeSeriesId, Vec<Vec<(Timestamp, f64)>>)> = BTreeMap::new();

    for s in series {
        let Some(mut cursor) = s.cursor(TypeToken::NUMERIC) else {
            continue;
        };
        let key = partition_key(s.id(), &config.group_keys);
        let key_vec: Vec<(String, String)> = key.into_iter().collect();
        let metric = s.id().metric.clone();
        let entry = partitions
            .entry(key_vec.clone())
            .or_insert_with(|| (partition_id(&metric, &key_vec.iter().cloned().collect()), Vec::new()));

        let mut points = Vec::new();
        while let Some((ts, value)) = cursor.next() {
            if let TypedValue::Numeric(n) = value {
                points.push((ts, n.as_f64()));
            }
        }
        entry.1.push(points);
    }

    partitions
        .into_values()
        .map(|(id, members)| {
            let timestamps: BTreeSet<Timestamp> = members.iter().flat_map(|pts| pts.iter().map(|(ts, _)| *ts)).collect();

            let points: Vec<(Timestamp, TypedValue)> = timestamps
                .into_iter()
                .map(|ts| {
                    let mut values: Vec<f64> = Vec::with_capacity(members.len());
                    for member in &members {
                        let exact = member.iter().find(|(pt, _)| *pt == ts).map(|(_, v)| *v);
                        let value = match exact {
                            Some(v) => Some(v),
                            None => {
                                let before =
                                    member.iter().filter(|(pt, _)| *pt < ts).next_back().map(|(pt, v)| Neighbor { at: *pt, value: *v });
                                let after = member.iter().find(|(pt, _)| *pt > ts).map(|(pt, v)| Neighbor { at: *pt, value: *v });
                                interpolate_numeric(fill, before, after, ts)
                            }
                        };
                        if let Some(v) = value {
                            values.push(v);
                        }
                    }
                    let reduced = config.aggregator.reduce_exact(&mut values);
                    (ts, TypedValue::Numeric(NumericValue::Float(reduced)))
                })
                .collect();
            InMemoryTimeSeries::new(id).with_points(TypeToken::NUMERIC, points)
        })
        .collect()
}

/// Reduce a batch of aligned-array series into one series per partition,
/// column-wise per [`tsq_kernel::reduce_arrays_indexwise`].
pub fn group_by_array(
    series: &[Arc<dyn TimeSeries>],
    config: &GroupByConfig,
    fill: tsq_kernel::NumericFillPolicy,
) -> Vec<InMemoryTimeSeries> {
    let mut partitions: BTreeMap<Vec<(String, String)>, (TimeSeriesId, Vec<(Vec<f64>, Vec<bool>, Timestamp)>)> = BTreeMap::new();

    for s in series {
        let Some(mut cursor) = s.cursor(TypeToken::NUMERIC_ARRAY) else {
            continue;
        };
        let key = partition_key(s.id(), &config.group_keys);
        let key_vec: Vec<(String, String)> = key.into_iter().collect();
        let metric = s.id().metric.clone();
        let entry = partitions
            .entry(key_vec.clone())
            .or_insert_with(|| (partition_id(&metric, &key_vec.iter().cloned().collect()), Vec::new()));

        while let Some((ts, value)) = cursor.next() {
            if let TypedValue::Array(arr) = value {
                entry.1.push((arr.values, arr.present, ts));
            }
        }
    }

    partitions
        .into_values()
        .map(|(id, arrays)| {
            let refs: Vec<(&[f64], &[bool])> = arrays.iter().map(|(v, p, _)| (v.as_slice(), p.as_slice())).collect();
            let (values, present) = reduce_arrays_indexwise(&refs, config.aggregator);
            let mut values = values;
            let mut present = present;
            if fill != tsq_kernel::NumericFillPolicy::None {
                tsq_kernel::fill_array_indexwise(&mut values, &mut present, fill);
            }
            let start = arrays.first().map(|(_, _, ts)| *ts).unwrap_or(Timestamp::new(0, tsq_core::Resolution::Millis));
            let point = TypedValue::Array(tsq_core::NumericArrayValue { values, present });
            InMemoryTimeSeries::new(id).with_points(TypeToken::NUMERIC_ARRAY, vec![(start, point)])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsq_core::Resolution;

    fn numeric_series(metric: &str, host: &str, dc: &str, points: &[(i64, f64)]) -> Arc<dyn TimeSeries> {
        let id = TimeSeriesId::metric_only(metric).with_tag("host", host).with_tag("dc", dc);
        let pts = points
            .iter()
            .map(|(t, v)| (Timestamp::new(*t, Resolution::Millis), TypedValue::Numeric(NumericValue::Float(*v))))
            .collect();
        Arc::new(InMemoryTimeSeries::new(id).with_points(TypeToken::NUMERIC, pts))
    }

    #[test]
    fn sum_groups_by_dc_across_hosts() {
        let series = vec![
            numeric_series("sys.cpu", "web01", "iad", &[(0, 10.0)]),
            numeric_series("sys.cpu", "web02", "iad", &[(0, 20.0)]),
            numeric_series("sys.cpu", "web03", "sjc", &[(0, 5.0)]),
        ];
        let config = GroupByConfig {
            group_keys: vec!["dc".to_string()],
            aggregator: AggregatorKind::Sum,
        };
        let out = group_by_numeric(&series, &config, NumericFillPolicy::Zero);
        assert_eq!(out.len(), 2);
        let iad = out.iter().find(|s| s.id().tags.get("dc").map(String::as_str) == Some("iad")).unwrap();
        let points = iad.points(TypeToken::NUMERIC).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].1.as_numeric().unwrap().as_f64(), 30.0);
    }

    #[test]
    fn interpolates_a_member_missing_at_a_union_timestamp() {
        let series = vec![
            numeric_series("sys.cpu", "web01", "iad", &[(0, 10.0), (1000, 12.0)]),
            numeric_series("sys.cpu", "web02", "iad", &[(0, 20.0)]),
        ];
        let config = GroupByConfig {
            group_keys: vec!["dc".to_string()],
            aggregator: AggregatorKind::Sum,
        };
        let out = group_by_numeric(&series, &config, NumericFillPolicy::PreviousOnly);
        assert_eq!(out.len(), 1);
        let points = out[0].points(TypeToken::NUMERIC).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].1.as_numeric().unwrap().as_f64(), 30.0);
        // web02 has no sample at t=1000; PreviousOnly carries its t=0 value forward.
        assert_eq!(points[1].1.as_numeric().unwrap().as_f64(), 32.0);
    }
}
