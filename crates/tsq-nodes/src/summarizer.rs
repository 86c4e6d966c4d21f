//! `Summarizer`: collapses a series to a single scalar per summary-id
//! (§4.3), e.g. for a dashboard's "current value" display.

use tsq_core::{InMemoryTimeSeries, NumericSummaryValue, SummaryId, TimeSeries, Timestamp, TypeToken, TypedValue};
use tsq_kernel::AggregatorKind;

fn aggregator_for(id: SummaryId) -> AggregatorKind {
    match id {
        SummaryId::Sum => AggregatorKind::Sum,
        SummaryId::Count => AggregatorKind::Count,
        SummaryId::Min => AggregatorKind::Min,
        SummaryId::Max => AggregatorKind::Max,
        SummaryId::Avg => AggregatorKind::Avg,
        SummaryId::First => AggregatorKind::First,
        SummaryId::Last => AggregatorKind::Last,
    }
}

/// Collapse one series' raw numeric points into a single-point
/// `NumericSummary` series carrying every id in `wanted`.
pub fn summarize(series: &dyn TimeSeries, wanted: &[SummaryId], at: Timestamp) -> InMemoryTimeSeries {
    let mut values = Vec::new();
    if let Some(mut cursor) = series.cursor(TypeToken::NUMERIC) {
        while let Some((_, value)) = cursor.next() {
            if let TypedValue::Numeric(n) = value {
                values.push(n.as_f64());
            }
        }
    }

    let mut summary = NumericSummaryValue::default();
    for id in wanted {
        let mut copy = values.clone();
        summary.set(*id, aggregator_for(*id).reduce_exact(&mut copy));
    }

    InMemoryTimeSeries::new(series.id().clone())
        .with_points(TypeToken::NUMERIC_SUMMARY, vec![(at, TypedValue::Summary(summary))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tsq_core::{InMemoryTimeSeries as Mem, NumericValue, Resolution, TimeSeriesId};

    #[test]
    fn collapses_to_requested_summary_ids() {
        let id = TimeSeriesId::metric_only("sys.cpu");
        let pts = vec![
            (Timestamp::new(0, Resolution::Millis), TypedValue::Numeric(NumericValue::Float(1.0))),
            (Timestamp::new(1000, Resolution::Millis), TypedValue::Numeric(NumericValue::Float(3.0))),
        ];
        let series: Arc<dyn TimeSeries> = Arc::new(Mem::new(id).with_points(TypeToken::NUMERIC, pts));
        let at = Timestamp::new(0, Resolution::Millis);
        let out = summarize(series.as_ref(), &[SummaryId::Sum, SummaryId::Max], at);
        let (_, value) = &out.points(TypeToken::NUMERIC_SUMMARY).unwrap()[0];
        let summary = value.as_summary().unwrap();
        assert_eq!(summary.get(SummaryId::Sum), Some(4.0));
        assert_eq!(summary.get(SummaryId::Max), Some(3.0));
        assert_eq!(summary.get(SummaryId::Count), None);
    }
}
