//! # tsq-core
//!
//! Value model, result channel, error taxonomy, and process-wide registries
//! for the tsq time-series query engine. This crate defines the types that
//! cross node boundaries; the node implementations live in `tsq-nodes`, the
//! planner in `tsq-planner`, and the executor in `tsq-exec`.
//!
//! ## Key components
//!
//! - **Value model** ([`timestamp`], [`id`], [`value`], [`series`]): typed
//!   time-series values, resolution-aware timestamps, series identity.
//! - **Result channel** ([`result`]): `QueryResult`, the batch unit nodes
//!   exchange.
//! - **External interfaces** ([`datasource`], [`sink`]): the `DataSource`
//!   plugin contract and the `Sink` contract.
//! - **Error handling** ([`error`]): the closed `TsqError`/`ErrorCode`
//!   taxonomy.
//! - **Registries** ([`registry`], [`pool`]): the type-token registry and
//!   the optional buffer pool.
//! - **Codec** ([`codec`]): in-memory counterpart of the wire formats.

pub mod codec;
pub mod datasource;
pub mod error;
pub mod id;
pub mod pool;
pub mod registry;
pub mod result;
pub mod series;
pub mod sink;
pub mod timestamp;
pub mod value;

pub use datasource::{DataSource, DataSourceConfig, FetchOutcome, MemoryDataSource, SourceCapabilities};
pub use error::{ErrorCode, TsqError};
pub use id::{TimeSeriesId, TimeSeriesIdBytes};
pub use pool::BufferPool;
pub use registry::{TypeDescriptor, TypeRegistry};
pub use result::{QueryResult, TimeSpecification};
pub use series::{InMemoryTimeSeries, TimeSeries, ValueCursor};
pub use sink::{ChannelSink, Sink, SinkEvent, StdoutSink};
pub use timestamp::{Resolution, Timestamp};
pub use value::{
    AnnotationValue, EventValue, NumericArrayValue, NumericSummaryValue, NumericValue, SummaryId,
    TypeToken, TypedValue,
};
