//! `Join`: aligns inputs by id/timestamp for `Expression` evaluation
//! (§4.3, §8 scenario 4 "union join + NaN fill").
//!
//! Each named input is expected to already be narrowed to the one series
//! an expression variable refers to (tag-set matching having resolved that
//! upstream, per §4.3's "natural join on a subset" note); this module
//! aligns their *timestamps*.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tsq_core::{TimeSeries, Timestamp, TypeToken, TypedValue};
use tsq_kernel::{interpolate_numeric, Neighbor, NumericFillPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    Intersection,
    Union,
}

/// Build the per-timestamp variable environments an [`crate::expression::Expr`]
/// evaluates against: for `Intersection`, only timestamps present in every
/// named input; for `Union`, every timestamp present in any input, with
/// `fill` supplying values for inputs missing at that timestamp.
pub fn align(
    inputs: &HashMap<String, &dyn TimeSeries>,
    mode: JoinMode,
    fill: NumericFillPolicy,
) -> BTreeMap<Timestamp, HashMap<String, f64>> {
    let mut per_var: HashMap<String, Vec<(Timestamp, f64)>> = HashMap::new();
    for (name, series) in inputs {
        let mut points = Vec::new();
        if let Some(mut cursor) = series.cursor(TypeToken::NUMERIC) {
            while let Some((ts, value)) = cursor.next() {
                if let TypedValue::Numeric(n) = value {
                    points.push((ts, n.as_f64()));
                }
            }
        }
        per_var.insert(name.clone(), points);
    }

    let timestamp_sets: Vec<BTreeSet<Timestamp>> = per_var
        .values()
        .map(|points| points.iter().map(|(ts, _)| *ts).collect())
        .collect();

    let timestamps: BTreeSet<Timestamp> = match mode {
        JoinMode::Union => timestamp_sets.into_iter().flatten().collect(),
        JoinMode::Intersection => {
            let mut iter = timestamp_sets.into_iter();
            let Some(first) = iter.next() else {
                return BTreeMap::new();
            };
            iter.fold(first, |acc, set| acc.intersection(&set).copied().collect())
        }
    };

    let mut out = BTreeMap::new();
    for ts in timestamps {
        let mut row = HashMap::new();
        for (name, points) in &per_var {
            let exact = points.iter().find(|(pt, _)| *pt == ts).map(|(_, v)| *v);
            let value = match exact {
                Some(v) => Some(v),
                None => {
                    let before = points.iter().filter(|(pt, _)| *pt < ts).next_back().map(|(pt, v)| Neighbor { at: *pt, value: *v });
                    let after = points.iter().find(|(pt, _)| *pt > ts).map(|(pt, v)| Neighbor { at: *pt, value: *v });
                    interpolate_numeric(fill, before, after, ts)
                }
            };
            if let Some(v) = value {
                row.insert(name.clone(), v);
            }
        }
        out.insert(ts, row);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsq_core::{InMemoryTimeSeries, NumericValue, Resolution, TimeSeriesId};

    fn series(metric: &str, ts_ms: i64, v: f64) -> InMemoryTimeSeries {
        let id = TimeSeriesId::metric_only(metric);
        let pts = vec![(Timestamp::new(ts_ms, Resolution::Millis), TypedValue::Numeric(NumericValue::Float(v)))];
        InMemoryTimeSeries::new(id).with_points(TypeToken::NUMERIC, pts)
    }

    #[test]
    fn seed_scenario_4_union_join_nan_fill() {
        let a = series("a", 0, 2.0);
        let b = series("b", 1000, 3.0);
        let mut inputs: HashMap<String, &dyn TimeSeries> = HashMap::new();
        inputs.insert("a".to_string(), &a);
        inputs.insert("b".to_string(), &b);

        let aligned = align(&inputs, JoinMode::Union, NumericFillPolicy::NotANumber);
        assert_eq!(aligned.len(), 2);
        let t0 = &aligned[&Timestamp::new(0, Resolution::Millis)];
        assert_eq!(t0["a"], 2.0);
        assert!(t0["b"].is_nan());
        let t1 = &aligned[&Timestamp::new(1000, Resolution::Millis)];
        assert!(t1["a"].is_nan());
        assert_eq!(t1["b"], 3.0);
    }

    #[test]
    fn seed_scenario_4_union_join_zero_fill() {
        let a = series("a", 0, 2.0);
        let b = series("b", 1000, 3.0);
        let mut inputs: HashMap<String, &dyn TimeSeries> = HashMap::new();
        inputs.insert("a".to_string(), &a);
        inputs.insert("b".to_string(), &b);

        let aligned = align(&inputs, JoinMode::Union, NumericFillPolicy::Zero);
        let t0 = &aligned[&Timestamp::new(0, Resolution::Millis)];
        assert_eq!(t0["a"], 2.0);
        assert_eq!(t0["b"], 0.0);
    }

    #[test]
    fn intersection_keeps_only_shared_timestamps() {
        let a = series("a", 0, 2.0);
        let b = series("b", 1000, 3.0);
        let mut inputs: HashMap<String, &dyn TimeSeries> = HashMap::new();
        inputs.insert("a".to_string(), &a);
        inputs.insert("b".to_string(), &b);

        let aligned = align(&inputs, JoinMode::Intersection, NumericFillPolicy::Zero);
        assert!(aligned.is_empty());
    }
}
