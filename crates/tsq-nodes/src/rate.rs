//! `Rate`: first differences over time, with optional monotonic-counter
//! rollover correction (§4.3, §8 scenario 3).
//!
//! Output resolution matches input; the rate value at each point (after
//! the first) is the value delta divided by the elapsed milliseconds
//! between it and the previous raw point.

use tsq_core::{InMemoryTimeSeries, NumericValue, TimeSeries, TypeToken, TypedValue};

#[derive(Debug, Clone, Copy)]
pub struct RateConfig {
    pub is_counter: bool,
    pub counter_max: f64,
    pub reset_value: f64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            is_counter: false,
            counter_max: f64::MAX,
            reset_value: 0.0,
        }
    }
}

/// Compute the rate series for one input series. The first raw point has
/// no predecessor and is dropped (a rate needs two samples).
pub fn compute_rate(series: &dyn TimeSeries, config: &RateConfig) -> InMemoryTimeSeries {
    let mut out = InMemoryTimeSeries::new(series.id().clone());
    let Some(mut cursor) = series.cursor(TypeToken::NUMERIC) else {
        return out;
    };

    let mut prev: Option<(tsq_core::Timestamp, f64)> = None;
    let mut points = Vec::new();
    while let Some((ts, value)) = cursor.next() {
        let TypedValue::Numeric(n) = value else { continue };
        let v = n.as_f64();
        if let Some((prev_ts, prev_v)) = prev {
            let mut delta = v - prev_v;
            if config.is_counter && v < prev_v {
                delta = (config.counter_max - prev_v) + (v - config.reset_value);
            }
            let dt_ms = ts.diff_nanos(prev_ts) as f64 / 1_000_000.0;
            let rate = if dt_ms == 0.0 { 0.0 } else { delta / dt_ms };
            points.push((ts, TypedValue::Numeric(NumericValue::Float(rate))));
        }
        prev = Some((ts, v));
    }

    out = out.with_points(TypeToken::NUMERIC, points);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tsq_core::{Resolution, TimeSeriesId, Timestamp};

    #[test]
    fn seed_scenario_3_rate_on_rolling_counter() {
        let id = TimeSeriesId::metric_only("sys.net.bytes");
        let pts = vec![
            (Timestamp::new(0, Resolution::Millis), TypedValue::Numeric(NumericValue::Int(10))),
            (Timestamp::new(1000, Resolution::Millis), TypedValue::Numeric(NumericValue::Int(20))),
            (Timestamp::new(2000, Resolution::Millis), TypedValue::Numeric(NumericValue::Int(5))),
            (Timestamp::new(3000, Resolution::Millis), TypedValue::Numeric(NumericValue::Int(15))),
        ];
        let series: Arc<dyn TimeSeries> = Arc::new(InMemoryTimeSeries::new(id).with_points(TypeToken::NUMERIC, pts));
        let config = RateConfig {
            is_counter: true,
            counter_max: 100.0,
            reset_value: 0.0,
        };
        let out = compute_rate(series.as_ref(), &config);
        let points = out.points(TypeToken::NUMERIC).unwrap();
        let rates: Vec<f64> = points.iter().map(|(_, v)| v.as_numeric().unwrap().as_f64()).collect();
        assert!((rates[0] - 0.01).abs() < 1e-9);
        assert!((rates[1] - 0.085).abs() < 1e-9);
        assert!((rates[2] - 0.01).abs() < 1e-9);
    }
}
