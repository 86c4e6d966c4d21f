//! Per-query bookkeeping (§4.5 "per-query metrics collector"). Deliberately
//! a handful of atomic counters, not a metrics subsystem — a full
//! observability layer is out of scope (spec §1); this is only the trailer
//! data the executor itself needs.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct QueryMetrics {
    pub nodes_started: AtomicU64,
    pub nodes_completed: AtomicU64,
    pub nodes_failed: AtomicU64,
    pub batches_emitted: AtomicU64,
    pub series_decoded: AtomicU64,
}

impl QueryMetrics {
    pub fn node_started(&self) {
        self.nodes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn node_completed(&self) {
        self.nodes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn node_failed(&self) {
        self.nodes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_emitted(&self, series_count: usize) {
        self.batches_emitted.fetch_add(1, Ordering::Relaxed);
        self.series_decoded.fetch_add(series_count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueryMetricsSnapshot {
        QueryMetricsSnapshot {
            nodes_started: self.nodes_started.load(Ordering::Relaxed),
            nodes_completed: self.nodes_completed.load(Ordering::Relaxed),
            nodes_failed: self.nodes_failed.load(Ordering::Relaxed),
            batches_emitted: self.batches_emitted.load(Ordering::Relaxed),
            series_decoded: self.series_decoded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryMetricsSnapshot {
    pub nodes_started: u64,
    pub nodes_completed: u64,
    pub nodes_failed: u64,
    pub batches_emitted: u64,
    pub series_decoded: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = QueryMetrics::default();
        m.node_started();
        m.node_started();
        m.node_completed();
        m.batch_emitted(3);
        let snap = m.snapshot();
        assert_eq!(snap.nodes_started, 2);
        assert_eq!(snap.nodes_completed, 1);
        assert_eq!(snap.batches_emitted, 1);
        assert_eq!(snap.series_decoded, 3);
    }
}
