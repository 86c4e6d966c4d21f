//! Interpolation / fill policies (§4.6).
//!
//! Policies split into two families: constant fills that never look at
//! neighboring data (`NaN`, `Null`, `Zero`, `Scalar`), and "real" policies
//! that interpolate from the nearest raw points around the missing
//! timestamp.

use std::collections::HashMap;

use tsq_core::{SummaryId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericFillPolicy {
    NotANumber,
    Null,
    Zero,
    Scalar(f64),
    PreviousOnly,
    NextOnly,
    PreferPrevious,
    PreferNext,
    /// Never fill; the missing point is simply absent from aligned output.
    None,
}

/// One neighboring raw sample, used by the "real" policies.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    pub at: Timestamp,
    pub value: f64,
}

/// Fill a missing point at `target`, given its nearest real neighbors on
/// each side (if any). Returns `None` when the policy declines to fill
/// (constant `Null`/`None`, or a "real" policy with no usable neighbor).
pub fn interpolate_numeric(
    policy: NumericFillPolicy,
    before: Option<Neighbor>,
    after: Option<Neighbor>,
    target: Timestamp,
) -> Option<f64> {
    match policy {
        NumericFillPolicy::NotANumber => Some(f64::NAN),
        NumericFillPolicy::Null => None,
        NumericFillPolicy::Zero => Some(0.0),
        NumericFillPolicy::Scalar(v) => Some(v),
        NumericFillPolicy::None => None,
        NumericFillPolicy::PreviousOnly => before.map(|n| n.value),
        NumericFillPolicy::NextOnly => after.map(|n| n.value),
        NumericFillPolicy::PreferPrevious => match (before, after) {
            (Some(b), Some(a)) => Some(linear_interpolate(b, a, target)),
            (Some(b), None) => Some(b.value),
            (None, Some(a)) => Some(a.value),
            (None, None) => None,
        },
        NumericFillPolicy::PreferNext => match (before, after) {
            (Some(b), Some(a)) => Some(linear_interpolate(b, a, target)),
            (None, Some(a)) => Some(a.value),
            (Some(b), None) => Some(b.value),
            (None, None) => None,
        },
    }
}

fn linear_interpolate(before: Neighbor, after: Neighbor, target: Timestamp) -> f64 {
    let total = after.at.diff_nanos(before.at);
    if total == 0 {
        return before.value;
    }
    let offset = target.diff_nanos(before.at);
    let frac = offset as f64 / total as f64;
    before.value + (after.value - before.value) * frac
}

/// Per-summary-id fill policy with a default fallback (§4.6 "NumericSummary:
/// per-summary policy + default").
#[derive(Debug, Clone)]
pub struct SummaryFillPolicy {
    pub per_summary: HashMap<u8, NumericFillPolicy>,
    pub default: NumericFillPolicy,
}

impl SummaryFillPolicy {
    pub fn uniform(default: NumericFillPolicy) -> Self {
        Self {
            per_summary: HashMap::new(),
            default,
        }
    }

    pub fn policy_for(&self, id: SummaryId) -> NumericFillPolicy {
        self.per_summary.get(&(id as u8)).copied().unwrap_or(self.default)
    }
}

/// Fill index-wise in a dense array: missing slots (per the presence mask)
/// are filled from the nearest present neighbors in the same array, the
/// array analogue of the "real" numeric policies.
pub fn fill_array_indexwise(values: &mut [f64], present: &mut [bool], policy: NumericFillPolicy) {
    let n = values.len();
    for i in 0..n {
        if present[i] {
            continue;
        }
        let before = (0..i).rev().find(|&j| present[j]).map(|j| Neighbor {
            at: Timestamp::new(j as i64, tsq_core::Resolution::Seconds),
            value: values[j],
        });
        let after = (i + 1..n).find(|&j| present[j]).map(|j| Neighbor {
            at: Timestamp::new(j as i64, tsq_core::Resolution::Seconds),
            value: values[j],
        });
        let target = Timestamp::new(i as i64, tsq_core::Resolution::Seconds);
        if let Some(v) = interpolate_numeric(policy, before, after, target) {
            values[i] = v;
            present[i] = !matches!(policy, NumericFillPolicy::Null | NumericFillPolicy::None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsq_core::Resolution;

    fn ts(ms: i64) -> Timestamp {
        Timestamp::new(ms, Resolution::Millis)
    }

    #[test]
    fn nan_fill_ignores_neighbors() {
        let v = interpolate_numeric(NumericFillPolicy::NotANumber, None, None, ts(0));
        assert!(v.unwrap().is_nan());
    }

    #[test]
    fn prefer_previous_linear_interpolates_between_neighbors() {
        let before = Neighbor { at: ts(0), value: 0.0 };
        let after = Neighbor { at: ts(10), value: 10.0 };
        let v = interpolate_numeric(NumericFillPolicy::PreferPrevious, Some(before), Some(after), ts(5));
        assert_eq!(v, Some(5.0));
    }

    #[test]
    fn zero_fill_union_join_scenario() {
        // §8 scenario 4: expression a+b, union join, ZERO fill.
        let v = interpolate_numeric(NumericFillPolicy::Zero, None, None, ts(0));
        assert_eq!(v, Some(0.0));
    }
}
