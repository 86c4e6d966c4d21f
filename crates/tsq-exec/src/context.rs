//! `PipelineContext` (§4.5): the object every node task threads through —
//! the query, the plan fingerprint, a deadline, a cancellation token, a
//! metrics collector, and a handle into the process-wide registry of
//! running queries.
//!
//! The registry itself follows `tsq_core::registry::TypeRegistry`'s shape
//! (an explicit `RwLock`-guarded holder plus a `once_cell::sync::Lazy`
//! process-wide instance) rather than reaching for ambient global mutable
//! state implicitly.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use once_cell::sync::Lazy;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use tsq_core::TsqError;
use tsq_planner::TimeSeriesQuery;

use crate::metrics::QueryMetrics;

/// Bounded work pool limiting in-flight node tasks (§5 "query thread
/// pool"), a thin `tokio::sync::Semaphore` wrapper so submission can be
/// `await`ed rather than spawning unboundedly.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity.max(1))),
        }
    }

    /// Run `task` once a pool slot is free. The context is threaded through
    /// by the caller (§4.5 "the context threads through so the pool can
    /// prioritize or reject by fingerprint") — this pool itself has no
    /// fingerprint-aware policy beyond FIFO admission, left for a future
    /// scheduler to refine.
    pub async fn submit<F, T>(&self, task: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        let _permit = self.semaphore.clone().acquire_owned().await.expect("pool semaphore never closes");
        task.await
    }
}

/// One query's execution context (§4.5).
pub struct PipelineContext {
    pub query: TimeSeriesQuery,
    pub fingerprint: String,
    pub deadline: Instant,
    pub cancellation: CancellationToken,
    pub metrics: QueryMetrics,
}

impl PipelineContext {
    pub fn new(query: TimeSeriesQuery, fingerprint: String, deadline: Instant) -> Arc<Self> {
        Arc::new(Self {
            query,
            fingerprint,
            deadline,
            cancellation: CancellationToken::new(),
            metrics: QueryMetrics::default(),
        })
    }

    pub fn cancel(&self, cause: Option<String>) {
        tracing::info!(fingerprint = %self.fingerprint, cause = ?cause, "cancelling query");
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn is_past_deadline(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn check_cancellation(&self) -> Result<(), TsqError> {
        if self.is_cancelled() {
            return Err(TsqError::cancelled(None));
        }
        if self.is_past_deadline() {
            return Err(TsqError::cancelled(Some("TIMEOUT".to_string())));
        }
        Ok(())
    }
}

/// Process-wide registry of running queries, keyed by plan fingerprint
/// (§4.5 "weak registry of running queries... at-most-one live per
/// fingerprint unless the caller explicitly opts out"). Holds only `Weak`
/// handles so a finished query's context is freed as soon as its last
/// strong reference (the running pipeline task) drops, without this
/// registry needing explicit cleanup.
#[derive(Default)]
pub struct RunningQueryRegistry {
    running: HashMap<String, Weak<PipelineContext>>,
}

impl RunningQueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `ctx` unless another query with the same fingerprint is
    /// already live, returning that live context's handle instead so the
    /// caller can join it rather than starting a duplicate (unless
    /// `allow_duplicate` opts out, per §4.5).
    pub fn try_register(&mut self, ctx: &Arc<PipelineContext>, allow_duplicate: bool) -> Result<(), Arc<PipelineContext>> {
        if !allow_duplicate {
            if let Some(existing) = self.running.get(&ctx.fingerprint).and_then(Weak::upgrade) {
                return Err(existing);
            }
        }
        self.running.insert(ctx.fingerprint.clone(), Arc::downgrade(ctx));
        Ok(())
    }

    pub fn live_count(&mut self) -> usize {
        self.running.retain(|_, w| w.strong_count() > 0);
        self.running.len()
    }
}

static GLOBAL_REGISTRY: Lazy<RwLock<RunningQueryRegistry>> = Lazy::new(|| RwLock::new(RunningQueryRegistry::new()));

/// Handle to the process-wide running-query registry (§5 "Lifecycle" —
/// initialized before the executor starts serving queries).
pub fn global_registry() -> &'static RwLock<RunningQueryRegistry> {
    &GLOBAL_REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsq_planner::{OutputSpec, TimeRange};

    fn query() -> TimeSeriesQuery {
        TimeSeriesQuery {
            time: TimeRange {
                start: "now-1h".into(),
                end: "now".into(),
                aggregator: None,
                downsampler: None,
                rate: None,
                timezone: "UTC".into(),
            },
            filter_sets: Vec::new(),
            metrics: Vec::new(),
            expressions: Vec::new(),
            outputs: vec![OutputSpec {
                id: "o1".into(),
                from: "m1".into(),
                alias: None,
            }],
            use_cache: false,
            trace: false,
        }
    }

    #[test]
    fn duplicate_fingerprint_is_rejected_unless_opted_out() {
        let mut reg = RunningQueryRegistry::new();
        let ctx1 = PipelineContext::new(query(), "fp1".into(), Instant::now() + std::time::Duration::from_secs(30));
        assert!(reg.try_register(&ctx1, false).is_ok());

        let ctx2 = PipelineContext::new(query(), "fp1".into(), Instant::now() + std::time::Duration::from_secs(30));
        let err = reg.try_register(&ctx2, false).unwrap_err();
        assert_eq!(err.fingerprint, "fp1");

        assert!(reg.try_register(&ctx2, true).is_ok());
    }

    #[test]
    fn dropped_context_frees_its_registry_slot() {
        let mut reg = RunningQueryRegistry::new();
        {
            let ctx = PipelineContext::new(query(), "fp2".into(), Instant::now() + std::time::Duration::from_secs(30));
            reg.try_register(&ctx, false).unwrap();
            assert_eq!(reg.live_count(), 1);
        }
        assert_eq!(reg.live_count(), 0);
    }

    #[tokio::test]
    async fn worker_pool_bounds_concurrency() {
        let pool = Arc::new(WorkerPool::new(1));
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let p1 = pool.clone();
        let o1 = order.clone();
        let h1 = tokio::spawn(async move {
            p1.submit(async {
                o1.lock().await.push(1);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            })
            .await
        });
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let p2 = pool.clone();
        let o2 = order.clone();
        let h2 = tokio::spawn(async move {
            p2.submit(async {
                o2.lock().await.push(2);
            })
            .await
        });
        h1.await.unwrap();
        h2.await.unwrap();
        assert_eq!(*order.lock().await, vec![1, 2]);
    }
}
