//! `TopN`: keeps the top-N series per aggregated metric value, ties broken
//! by id byte order for stable selection (§4.3).

use std::cmp::Ordering;
use std::sync::Arc;

use tsq_core::{TimeSeries, TypeToken, TypedValue};
use tsq_kernel::AggregatorKind;

/// Reduce each series to one scalar via `aggregator`, then keep the
/// highest `n` (descending value; ties broken by ascending id byte order).
pub fn top_n(series: Vec<Arc<dyn TimeSeries>>, aggregator: AggregatorKind, n: usize) -> Vec<Arc<dyn TimeSeries>> {
    let mut scored: Vec<(f64, Arc<dyn TimeSeries>)> = series
        .into_iter()
        .map(|s| {
            let mut values = Vec::new();
            if let Some(mut cursor) = s.cursor(TypeToken::NUMERIC) {
                while let Some((_, value)) = cursor.next() {
                    if let TypedValue::Numeric(v) = value {
                        values.push(v.as_f64());
                    }
                }
            }
            let score = aggregator.reduce_exact(&mut values);
            (score, s)
        })
        .collect();

    scored.sort_by(|(score_a, series_a), (score_b, series_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| series_a.id().to_bytes().cmp(&series_b.id().to_bytes()))
    });

    scored.into_iter().take(n).map(|(_, s)| s).collect()
}
