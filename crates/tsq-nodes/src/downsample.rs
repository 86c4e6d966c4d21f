//! `Downsample`: buckets raw input into fixed intervals, aggregates each
//! bucket, and emits an array-typed result with a [`TimeSpecification`]
//! (§4.3, §8 "Downsample alignment").
//!
//! Calendar alignment (day/week/month) is expressed as a fixed-duration
//! interval rather than tracked against IANA timezone transitions — see
//! the DST policy note on [`tsq_core::TimeSpecification`] and the matching
//! entry in `DESIGN.md`.

use std::collections::BTreeMap;

use tsq_core::{
    InMemoryTimeSeries, NumericArrayValue, TimeSeries, TimeSpecification, Timestamp, TsqError, TypeToken, TypedValue,
};
use tsq_kernel::{AggregatorKind, NumericFillPolicy};

#[derive(Debug, Clone)]
pub struct DownsampleConfig {
    pub interval_nanos: i64,
    pub aggregator: AggregatorKind,
    /// Fill applied to buckets with no contributing raw points.
    pub empty_bucket_fill: NumericFillPolicy,
    pub timezone: String,
}

/// Parse a duration string like `"2s"`, `"500ms"`, `"1h"`, `"1d"`, `"1w"`
/// into nanoseconds. Calendar units are fixed-width approximations per the
/// DST policy above.
pub fn parse_interval(spec: &str) -> Result<i64, TsqError> {
    let spec = spec.trim();
    let split_at = spec.find(|c: char| !c.is_ascii_digit()).ok_or_else(|| {
        TsqError::ParseError(format!("interval '{spec}' has no unit suffix"))
    })?;
    let (num, unit) = spec.split_at(split_at);
    let n: i64 = num
        .parse()
        .map_err(|_| TsqError::ParseError(format!("interval '{spec}' has a non-numeric magnitude")))?;
    let unit_nanos: i64 = match unit {
        "ns" => 1,
        "us" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 3_600 * 1_000_000_000,
        "d" => 86_400 * 1_000_000_000,
        "w" => 7 * 86_400 * 1_000_000_000,
        other => return Err(TsqError::ParseError(format!("unknown interval unit '{other}'"))),
    };
    Ok(n * unit_nanos)
}

/// Downsample one series' raw numeric points into a dense array spanning
/// `[start, end)` at `config.interval_nanos` resolution.
pub fn downsample_series(
    series: &dyn TimeSeries,
    config: &DownsampleConfig,
    start: Timestamp,
    end: Timestamp,
) -> Result<InMemoryTimeSeries, TsqError> {
    let Some(mut cursor) = series.cursor(TypeToken::NUMERIC) else {
        return Ok(InMemoryTimeSeries::new(series.id().clone()));
    };

    let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    while let Some((ts, value)) = cursor.next() {
        if let TypedValue::Numeric(n) = value {
            let bucket = ts.floor_to_interval_nanos(config.interval_nanos);
            buckets.entry(bucket.epoch()).or_default().push(n.as_f64());
        }
    }

    let bucket_count = {
        let span = end.diff_nanos(start);
        (span / config.interval_nanos as i128).max(0) as usize
    };
    let mut values = Vec::with_capacity(bucket_count);
    let mut present = Vec::with_capacity(bucket_count);

    for i in 0..bucket_count {
        let bucket_start = start.add_nanos(i as i64 * config.interval_nanos);
        match buckets.get(&bucket_start.epoch()) {
            Some(points) => {
                let mut points = points.clone();
                values.push(config.aggregator.reduce_exact(&mut points));
                present.push(true);
            }
            None => {
                let filled = tsq_kernel::interpolate_numeric(config.empty_bucket_fill, None, None, bucket_start);
                values.push(filled.unwrap_or(f64::NAN));
                present.push(false);
            }
        }
    }

    let point = (start, TypedValue::Array(NumericArrayValue { values, present }));
    Ok(InMemoryTimeSeries::new(series.id().clone()).with_points(TypeToken::NUMERIC_ARRAY, vec![point]))
}

pub fn emitted_time_spec(config: &DownsampleConfig, start: Timestamp, end: Timestamp) -> TimeSpecification {
    TimeSpecification::new(start, end, format!("{}ns", config.interval_nanos), config.timezone.clone())
}
