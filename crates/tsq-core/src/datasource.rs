//! The `DataSource` plugin contract (§6) consumed by `Source` nodes.
//!
//! This core ships one reference implementation, [`MemoryDataSource`], used
//! by tests and the demo CLI; real storage back-ends (HBase, Redis, Aura,
//! Prometheus, Influx, ...) are external collaborators that implement this
//! same trait (§1 scope).

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::TsqError;
use crate::result::QueryResult;

/// Capabilities a source advertises so the planner can push down work
/// instead of instantiating a standalone operator node (§4.4 step 3).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SourceCapabilities {
    pub push_down_filter: bool,
    pub push_down_downsample: bool,
    pub supports_streaming: bool,
}

/// Free-form configuration handed to [`DataSource::init`]. Concrete plugins
/// downcast/deserialize the fields they need; unknown fields are ignored at
/// this layer (the plugin itself may be strict).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub metric: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub tag_filters: HashMap<String, String>,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Outcome of one `fetch_next` call.
pub enum FetchOutcome {
    Result(QueryResult),
    /// No more data; the source is done for this query.
    Exhausted,
}

/// The storage-backend plugin contract.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn id(&self) -> &str;

    async fn init(&mut self, config: &DataSourceConfig) -> Result<(), TsqError>;

    /// Pull the next batch, or report exhaustion/error. `deadline` is the
    /// per-query deadline (§4.5); implementations should race their I/O
    /// against it rather than blocking past it.
    async fn fetch_next(&mut self, deadline: Instant) -> Result<FetchOutcome, TsqError>;

    fn capabilities(&self) -> SourceCapabilities;

    async fn close(&mut self) -> Result<(), TsqError>;
}

/// In-memory reference `DataSource`: pulls pre-seeded `QueryResult` batches
/// in order, one per `fetch_next` call, optionally injecting a simulated
/// failure so HA-merger / partial-failure tests (§8 scenario 2) don't need a
/// real flaky backend.
pub struct MemoryDataSource {
    id: String,
    capabilities: SourceCapabilities,
    batches: Arc<Mutex<VecDeque<PendingBatch>>>,
}

enum PendingBatch {
    Ready(QueryResult),
    Fail(TsqError),
}

impl MemoryDataSource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: SourceCapabilities::default(),
            batches: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn with_capabilities(mut self, caps: SourceCapabilities) -> Self {
        self.capabilities = caps;
        self
    }

    pub fn push_result(&self, result: QueryResult) {
        self.batches.lock().unwrap().push_back(PendingBatch::Ready(result));
    }

    /// Queue a failure (e.g. `TsqError::SourceTimeout`) to be returned on
    /// the next `fetch_next` call, simulating a flaky replica.
    pub fn push_failure(&self, err: TsqError) {
        self.batches.lock().unwrap().push_back(PendingBatch::Fail(err));
    }
}

#[async_trait]
impl DataSource for MemoryDataSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn init(&mut self, _config: &DataSourceConfig) -> Result<(), TsqError> {
        Ok(())
    }

    async fn fetch_next(&mut self, _deadline: Instant) -> Result<FetchOutcome, TsqError> {
        let next = self.batches.lock().unwrap().pop_front();
        match next {
            None => Ok(FetchOutcome::Exhausted),
            Some(PendingBatch::Ready(r)) => Ok(FetchOutcome::Result(r)),
            Some(PendingBatch::Fail(e)) => Err(e),
        }
    }

    fn capabilities(&self) -> SourceCapabilities {
        self.capabilities
    }

    async fn close(&mut self) -> Result<(), TsqError> {
        Ok(())
    }
}
