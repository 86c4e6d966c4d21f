//! Resolution-aware timestamps.
//!
//! A [`Timestamp`] pairs an epoch value with a [`Resolution`] tag. Comparison
//! and arithmetic normalize to nanoseconds so timestamps at different
//! resolutions can be compared directly; callers that need to preserve the
//! original resolution should keep it alongside, since normalization is
//! lossy only in the direction of *coarser* resolutions (seconds -> nanos is
//! exact, nanos -> seconds truncates).

use std::cmp::Ordering;
use std::fmt;

/// Resolution of a timestamp's epoch value. Corresponds to the "chrono-unit
/// ordinal" referenced in the wire codec (§4.1): the `ordinal()` value is
/// what gets packed into the encoded segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Resolution {
    Seconds,
    Millis,
    Micros,
    Nanos,
}

impl Resolution {
    /// Nanoseconds per unit of this resolution.
    pub const fn nanos_per_unit(self) -> i64 {
        match self {
            Resolution::Seconds => 1_000_000_000,
            Resolution::Millis => 1_000_000,
            Resolution::Micros => 1_000,
            Resolution::Nanos => 1,
        }
    }

    /// The small integer ordinal used on the wire.
    pub const fn ordinal(self) -> u8 {
        match self {
            Resolution::Seconds => 0,
            Resolution::Millis => 1,
            Resolution::Micros => 2,
            Resolution::Nanos => 3,
        }
    }

    pub const fn from_ordinal(v: u8) -> Option<Self> {
        match v {
            0 => Some(Resolution::Seconds),
            1 => Some(Resolution::Millis),
            2 => Some(Resolution::Micros),
            3 => Some(Resolution::Nanos),
            _ => None,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Resolution::Seconds => "s",
            Resolution::Millis => "ms",
            Resolution::Micros => "us",
            Resolution::Nanos => "ns",
        };
        write!(f, "{s}")
    }
}

/// An epoch value at a given resolution.
///
/// Invariant (per series): resolution is monotone — callers must not mix
/// resolutions within a single series' points. Comparisons across different
/// resolutions are still well-defined (normalized to nanoseconds) so nodes
/// that align series of differing native resolution (e.g. a join) work
/// correctly; it is series *authors* that must stay consistent.
#[derive(Debug, Clone, Copy, Eq, serde::Serialize, serde::Deserialize)]
pub struct Timestamp {
    epoch: i64,
    resolution: Resolution,
}

impl Timestamp {
    pub const fn new(epoch: i64, resolution: Resolution) -> Self {
        Self { epoch, resolution }
    }

    pub const fn epoch(self) -> i64 {
        self.epoch
    }

    pub const fn resolution(self) -> Resolution {
        self.resolution
    }

    /// Normalize to epoch nanoseconds for comparison/arithmetic.
    pub fn as_nanos(self) -> i128 {
        self.epoch as i128 * self.resolution.nanos_per_unit() as i128
    }

    /// Re-express this timestamp at a different resolution, truncating
    /// toward zero when the target is coarser.
    pub fn to_resolution(self, target: Resolution) -> Timestamp {
        if target == self.resolution {
            return self;
        }
        let nanos = self.as_nanos();
        let epoch = (nanos / target.nanos_per_unit() as i128) as i64;
        Timestamp::new(epoch, target)
    }

    /// `floor(self / interval) * interval`, the downsample bucket-alignment
    /// rule from §8 ("Downsample alignment"). `interval_nanos` must be > 0.
    /// Boundary points (`self` exactly on a bucket start) belong to that
    /// bucket, which `div_euclid` gives for free.
    pub fn floor_to_interval_nanos(self, interval_nanos: i64) -> Timestamp {
        debug_assert!(interval_nanos > 0);
        let nanos = self.as_nanos();
        let interval = interval_nanos as i128;
        let bucket_start_nanos = nanos.div_euclid(interval) * interval;
        let epoch = (bucket_start_nanos / self.resolution.nanos_per_unit() as i128) as i64;
        Timestamp::new(epoch, self.resolution)
    }

    pub fn add_nanos(self, delta: i64) -> Timestamp {
        let nanos = self.as_nanos() + delta as i128;
        let epoch = (nanos / self.resolution.nanos_per_unit() as i128) as i64;
        Timestamp::new(epoch, self.resolution)
    }

    /// Difference in nanoseconds, `self - other`.
    pub fn diff_nanos(self, other: Timestamp) -> i128 {
        self.as_nanos() - other.as_nanos()
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.as_nanos() == other.as_nanos()
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_nanos().cmp(&other.as_nanos())
    }
}

impl std::hash::Hash for Timestamp {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_nanos().hash(state);
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.epoch, self.resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_resolution_ordering() {
        let a = Timestamp::new(1, Resolution::Seconds);
        let b = Timestamp::new(999, Resolution::Millis);
        assert!(b < a);
        let c = Timestamp::new(1000, Resolution::Millis);
        assert_eq!(a, c);
    }

    #[test]
    fn downsample_alignment_boundary_belongs_to_bucket() {
        let interval_nanos = 2_000 * 1_000_000; // 2s in nanos
        let t = Timestamp::new(2000, Resolution::Millis);
        let bucket = t.floor_to_interval_nanos(interval_nanos);
        assert_eq!(bucket, Timestamp::new(2000, Resolution::Millis));

        let t2 = Timestamp::new(3999, Resolution::Millis);
        let bucket2 = t2.floor_to_interval_nanos(interval_nanos);
        assert_eq!(bucket2, Timestamp::new(2000, Resolution::Millis));
    }

    #[test]
    fn seed_scenario_1_bucket_boundaries() {
        // {t=1000:42, t=2000:8, t=3000:10, t=4000:6} ms, interval=2s
        let interval_nanos = 2_000i64 * 1_000_000;
        let points = [1000i64, 2000, 3000, 4000];
        let buckets: Vec<i64> = points
            .iter()
            .map(|ms| {
                Timestamp::new(*ms, Resolution::Millis)
                    .floor_to_interval_nanos(interval_nanos)
                    .epoch()
            })
            .collect();
        assert_eq!(buckets, vec![0, 2000, 2000, 4000]);
    }
}
