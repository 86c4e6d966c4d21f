//! Numeric aggregator primitives shared by `GroupBy`, `Downsample`, and
//! `Summarizer` (§4.6).

/// A streaming aggregator: `add` is called once per contributing value,
/// `finish` yields the reduction. `avg` defers its division until `finish`
/// (sum/count are tracked separately throughout), per §4.6.
pub trait Aggregator: Send {
    fn add(&mut self, v: f64);
    fn finish(&self) -> f64;
    fn reset(&mut self);
}

#[derive(Default, Clone, Copy)]
pub struct SumAggregator(f64);
impl Aggregator for SumAggregator {
    fn add(&mut self, v: f64) {
        self.0 += v;
    }
    fn finish(&self) -> f64 {
        self.0
    }
    fn reset(&mut self) {
        self.0 = 0.0;
    }
}

#[derive(Default, Clone, Copy)]
pub struct CountAggregator(u64);
impl Aggregator for CountAggregator {
    fn add(&mut self, _v: f64) {
        self.0 += 1;
    }
    fn finish(&self) -> f64 {
        self.0 as f64
    }
    fn reset(&mut self) {
        self.0 = 0;
    }
}

#[derive(Clone, Copy)]
pub struct MinAggregator(f64);
impl Default for MinAggregator {
    fn default() -> Self {
        Self(f64::INFINITY)
    }
}
impl Aggregator for MinAggregator {
    fn add(&mut self, v: f64) {
        if v < self.0 {
            self.0 = v;
        }
    }
    fn finish(&self) -> f64 {
        self.0
    }
    fn reset(&mut self) {
        self.0 = f64::INFINITY;
    }
}

#[derive(Clone, Copy)]
pub struct MaxAggregator(f64);
impl Default for MaxAggregator {
    fn default() -> Self {
        Self(f64::NEG_INFINITY)
    }
}
impl Aggregator for MaxAggregator {
    fn add(&mut self, v: f64) {
        if v > self.0 {
            self.0 = v;
        }
    }
    fn finish(&self) -> f64 {
        self.0
    }
    fn reset(&mut self) {
        self.0 = f64::NEG_INFINITY;
    }
}

/// sum/count deferred: division happens only in `finish`.
#[derive(Default, Clone, Copy)]
pub struct AvgAggregator {
    sum: f64,
    count: u64,
}
impl Aggregator for AvgAggregator {
    fn add(&mut self, v: f64) {
        self.sum += v;
        self.count += 1;
    }
    fn finish(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.sum / self.count as f64
        }
    }
    fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }
}

#[derive(Default, Clone, Copy)]
pub struct FirstAggregator(Option<f64>);
impl Aggregator for FirstAggregator {
    fn add(&mut self, v: f64) {
        if self.0.is_none() {
            self.0 = Some(v);
        }
    }
    fn finish(&self) -> f64 {
        self.0.unwrap_or(f64::NAN)
    }
    fn reset(&mut self) {
        self.0 = None;
    }
}

#[derive(Default, Clone, Copy)]
pub struct LastAggregator(Option<f64>);
impl Aggregator for LastAggregator {
    fn add(&mut self, v: f64) {
        self.0 = Some(v);
    }
    fn finish(&self) -> f64 {
        self.0.unwrap_or(f64::NAN)
    }
    fn reset(&mut self) {
        self.0 = None;
    }
}

/// O(n log n) partial sort via `select_nth_unstable_by`; buffers every
/// added value, as the spec's "partial sort" phrasing implies (no true
/// constant-memory streaming median exists).
#[derive(Default, Clone)]
pub struct MedianAggregator(Vec<f64>);
impl Aggregator for MedianAggregator {
    fn add(&mut self, v: f64) {
        self.0.push(v);
    }
    fn finish(&self) -> f64 {
        exact_percentile(&mut self.0.clone(), 0.5)
    }
    fn reset(&mut self) {
        self.0.clear();
    }
}

/// Exact percentile over a full buffer (array mode, §4.6). `p` in `[0, 1]`.
pub fn exact_percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let n = values.len();
    let rank = ((n - 1) as f64 * p).round() as usize;
    let rank = rank.min(n - 1);
    let (_, pivot, _) = values.select_nth_unstable_by(rank, |a, b| a.partial_cmp(b).unwrap());
    *pivot
}

/// Streaming percentile via the P² algorithm (Jain & Chlamtac, 1985):
/// constant memory, five markers, one pass.
#[derive(Clone)]
pub struct P2PercentileAggregator {
    p: f64,
    markers: [f64; 5],
    positions: [f64; 5],
    desired: [f64; 5],
    increments: [f64; 5],
    count: usize,
}

impl P2PercentileAggregator {
    pub fn new(p: f64) -> Self {
        Self {
            p,
            markers: [0.0; 5],
            positions: [1.0, 2.0, 3.0, 4.0, 5.0],
            desired: [1.0, 1.0 + 2.0 * p, 1.0 + 4.0 * p, 3.0 + 2.0 * p, 5.0],
            increments: [0.0, p / 2.0, p, (1.0 + p) / 2.0, 1.0],
            count: 0,
        }
    }

    fn parabolic(&self, i: usize, d: f64) -> f64 {
        let (q, n, np1, nm1) = (self.markers[i], self.positions[i], self.positions[i + 1], self.positions[i - 1]);
        let qp1 = self.markers[i + 1];
        let qm1 = self.markers[i - 1];
        q + d / (np1 - nm1)
            * ((n - nm1 + d) * (qp1 - q) / (np1 - n) + (np1 - n - d) * (q - qm1) / (n - nm1))
    }

    fn linear(&self, i: usize, d: f64) -> f64 {
        let sign = d as i64;
        self.markers[i] + sign as f64 * (self.markers[(i as i64 + sign) as usize] - self.markers[i])
            / (self.positions[(i as i64 + sign) as usize] - self.positions[i])
    }
}

impl Aggregator for P2PercentileAggregator {
    fn add(&mut self, v: f64) {
        if self.count < 5 {
            self.markers[self.count] = v;
            self.count += 1;
            if self.count == 5 {
                self.markers.sort_by(|a, b| a.partial_cmp(b).unwrap());
            }
            return;
        }

        let mut k = 0usize;
        if v < self.markers[0] {
            self.markers[0] = v;
            k = 0;
        } else if v >= self.markers[4] {
            self.markers[4] = v;
            k = 3;
        } else {
            for i in 0..4 {
                if v < self.markers[i + 1] {
                    k = i;
                    break;
                }
            }
        }

        for i in k + 1..5 {
            self.positions[i] += 1.0;
        }
        for i in 0..5 {
            self.desired[i] += self.increments[i];
        }

        for i in 1..4 {
            let d = self.desired[i] - self.positions[i];
            if (d >= 1.0 && self.positions[i + 1] - self.positions[i] > 1.0)
                || (d <= -1.0 && self.positions[i - 1] - self.positions[i] < -1.0)
            {
                let d = if d >= 1.0 { 1.0 } else { -1.0 };
                let new_q = self.parabolic(i, d);
                let (lo, hi) = (self.markers[i - 1], self.markers[i + 1]);
                self.markers[i] = if lo < new_q && new_q < hi {
                    new_q
                } else {
                    self.linear(i, d)
                };
                self.positions[i] += d;
            }
        }
        self.count += 1;
    }

    fn finish(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        if self.count < 5 {
            let mut sorted = self.markers[..self.count].to_vec();
            return exact_percentile(&mut sorted, self.p);
        }
        self.markers[2]
    }

    fn reset(&mut self) {
        *self = P2PercentileAggregator::new(self.p);
    }
}

/// Population variance via Welford's online algorithm.
#[derive(Default, Clone, Copy)]
pub struct DevAggregator {
    count: u64,
    mean: f64,
    m2: f64,
}
impl Aggregator for DevAggregator {
    fn add(&mut self, v: f64) {
        self.count += 1;
        let delta = v - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = v - self.mean;
        self.m2 += delta * delta2;
    }
    fn finish(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.m2 / self.count as f64
        }
    }
    fn reset(&mut self) {
        self.count = 0;
        self.mean = 0.0;
        self.m2 = 0.0;
    }
}

/// The closed set of aggregator kinds, used by `GroupBy`/`Downsample`
/// config to pick a fresh `Aggregator` instance per bucket/partition.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum AggregatorKind {
    Sum,
    Count,
    Min,
    Max,
    Avg,
    Median,
    Percentile(u32), // stored as basis points [0, 10000] to keep Eq/Hash-friendly
    First,
    Last,
    Dev,
}

impl AggregatorKind {
    pub fn percentile(p: f64) -> Self {
        AggregatorKind::Percentile((p.clamp(0.0, 1.0) * 10_000.0).round() as u32)
    }

    pub fn new_streaming(self) -> Box<dyn Aggregator> {
        match self {
            AggregatorKind::Sum => Box::new(SumAggregator::default()),
            AggregatorKind::Count => Box::new(CountAggregator::default()),
            AggregatorKind::Min => Box::new(MinAggregator::default()),
            AggregatorKind::Max => Box::new(MaxAggregator::default()),
            AggregatorKind::Avg => Box::new(AvgAggregator::default()),
            AggregatorKind::Median => Box::new(MedianAggregator::default()),
            AggregatorKind::Percentile(bp) => Box::new(P2PercentileAggregator::new(bp as f64 / 10_000.0)),
            AggregatorKind::First => Box::new(FirstAggregator::default()),
            AggregatorKind::Last => Box::new(LastAggregator::default()),
            AggregatorKind::Dev => Box::new(DevAggregator::default()),
        }
    }

    /// Exact reduction over a fully materialized buffer (array mode).
    pub fn reduce_exact(self, values: &mut [f64]) -> f64 {
        match self {
            AggregatorKind::Median => exact_percentile(values, 0.5),
            AggregatorKind::Percentile(bp) => exact_percentile(values, bp as f64 / 10_000.0),
            _ => {
                let mut agg = self.new_streaming();
                for v in values.iter() {
                    agg.add(*v);
                }
                agg.finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_scenario_1_downsample_sum() {
        // bucket sums for {42}, {8,10}, {6} -> 42, 18, 6
        let mut a = AggregatorKind::Sum.new_streaming();
        for v in [8.0, 10.0] {
            a.add(v);
        }
        assert_eq!(a.finish(), 18.0);
    }

    #[test]
    fn avg_defers_division_to_finish() {
        let mut a = AvgAggregator::default();
        a.add(1.0);
        a.add(2.0);
        a.add(3.0);
        assert_eq!(a.finish(), 2.0);
    }

    #[test]
    fn exact_median_matches_streaming_p2_roughly() {
        let mut values: Vec<f64> = (1..=99).map(|v| v as f64).collect();
        let exact = exact_percentile(&mut values.clone(), 0.5);
        assert_eq!(exact, 50.0);

        let mut p2 = P2PercentileAggregator::new(0.5);
        for v in &values {
            p2.add(*v);
        }
        // P² is an estimator; it should land within a small tolerance of
        // the exact median for a well-behaved, monotonic input.
        assert!((p2.finish() - exact).abs() < 5.0);
    }

    #[test]
    fn dev_zero_for_constant_series() {
        let mut d = DevAggregator::default();
        for _ in 0..5 {
            d.add(7.0);
        }
        assert_eq!(d.finish(), 0.0);
    }
}
