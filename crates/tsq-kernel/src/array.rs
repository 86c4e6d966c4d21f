//! Column-wise reduction over `NumericArrayValue` (§4.6): the array
//! equivalent of [`crate::aggregate`], operating on a dense `values` +
//! `present` pair instead of a point stream.

use crate::aggregate::AggregatorKind;
use crate::fill::{fill_array_indexwise, NumericFillPolicy};

/// Reduce `values` column-wise down to a single scalar, honoring the
/// presence mask: absent slots are excluded unless `fill` supplies a
/// value for them first.
pub fn reduce_array(values: &[f64], present: &[bool], kind: AggregatorKind, fill: NumericFillPolicy) -> f64 {
    let mut values = values.to_vec();
    let mut present = present.to_vec();
    if fill != NumericFillPolicy::None {
        fill_array_indexwise(&mut values, &mut present, fill);
    }

    let mut contributing: Vec<f64> = values
        .iter()
        .zip(present.iter())
        .filter(|(_, p)| **p)
        .map(|(v, _)| *v)
        .collect();
    kind.reduce_exact(&mut contributing)
}

/// Reduce multiple same-length arrays index-wise (e.g. merging parallel
/// shards' array outputs before a downstream node consumes a single
/// series), producing one output array of the same length.
pub fn reduce_arrays_indexwise(
    arrays: &[(&[f64], &[bool])],
    kind: AggregatorKind,
) -> (Vec<f64>, Vec<bool>) {
    let len = arrays.first().map(|(v, _)| v.len()).unwrap_or(0);
    let mut out_values = vec![0.0; len];
    let mut out_present = vec![false; len];

    for i in 0..len {
        let column: Vec<f64> = arrays
            .iter()
            .filter_map(|(values, present)| if present[i] { Some(values[i]) } else { None })
            .collect();
        if column.is_empty() {
            continue;
        }
        let mut column = column;
        out_values[i] = kind.reduce_exact(&mut column);
        out_present[i] = true;
    }
    (out_values, out_present)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_array_sum_ignores_absent_slots() {
        let values = [1.0, 2.0, 3.0, 4.0];
        let present = [true, false, true, true];
        let sum = reduce_array(&values, &present, AggregatorKind::Sum, NumericFillPolicy::None);
        assert_eq!(sum, 8.0);
    }

    #[test]
    fn reduce_array_zero_fill_counts_absent_as_zero() {
        let values = [1.0, 0.0, 3.0];
        let present = [true, false, true];
        let sum = reduce_array(&values, &present, AggregatorKind::Sum, NumericFillPolicy::Zero);
        assert_eq!(sum, 4.0);
    }

    #[test]
    fn reduce_arrays_indexwise_merges_two_shards() {
        let a_values = [1.0, f64::NAN, 3.0];
        let a_present = [true, false, true];
        let b_values = [10.0, 20.0, f64::NAN];
        let b_present = [true, true, false];

        let (out, present) = reduce_arrays_indexwise(
            &[(&a_values, &a_present), (&b_values, &b_present)],
            AggregatorKind::Sum,
        );
        assert_eq!(present, vec![true, true, true]);
        assert_eq!(out, vec![11.0, 20.0, 3.0]);
    }
}
