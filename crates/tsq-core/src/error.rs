//! Error taxonomy (§6 error codes, §7 error handling design).
//!
//! Three tiers, matching spec §7:
//! - user errors: rejected before execution (`ParseError`, `PlanCycle`,
//!   `UnknownSource`, `UnknownType`)
//! - transient execution errors: may be recovered locally by an HA/shard
//!   merger (`SourceTimeout`, `SourceFailed`)
//! - fatal errors: cancel the whole pipeline (`OutOfMemory`, `Internal`)
//!
//! `anyhow::Error` is used only at process boundaries (CLI, plugin glue),
//! wrapped via `TsqError::Other`, matching the teacher's `RdeError::Other`.

use thiserror::Error;

/// Stable error code surfaced to callers (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    ParseError,
    PlanCycle,
    UnknownSource,
    UnknownType,
    SourceTimeout,
    SourceFailed,
    PartialResult,
    Cancelled,
    OutOfMemory,
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Error)]
pub enum TsqError {
    #[error("parse error: {0}")]
    ParseError(String),

    #[error("plan cycle detected at node '{0}'")]
    PlanCycle(String),

    #[error("unknown data source: {0}")]
    UnknownSource(String),

    #[error("unknown value type: {0}")]
    UnknownType(String),

    #[error("source '{source}' timed out")]
    SourceTimeout { source: String },

    #[error("source '{source}' failed: {reason}")]
    SourceFailed { source: String, reason: String },

    #[error("partial result: {0}")]
    PartialResult(String),

    #[error("cancelled{}", .cause.as_ref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Cancelled { cause: Option<String> },

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TsqError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TsqError::ParseError(_) => ErrorCode::ParseError,
            TsqError::PlanCycle(_) => ErrorCode::PlanCycle,
            TsqError::UnknownSource(_) => ErrorCode::UnknownSource,
            TsqError::UnknownType(_) => ErrorCode::UnknownType,
            TsqError::SourceTimeout { .. } => ErrorCode::SourceTimeout,
            TsqError::SourceFailed { .. } => ErrorCode::SourceFailed,
            TsqError::PartialResult(_) => ErrorCode::PartialResult,
            TsqError::Cancelled { .. } => ErrorCode::Cancelled,
            TsqError::OutOfMemory(_) => ErrorCode::OutOfMemory,
            TsqError::Internal(_) | TsqError::Other(_) => ErrorCode::Internal,
        }
    }

    /// Transient errors are survivable by an HA merger or a shard merger
    /// configured with `allow_partial`; user and fatal errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TsqError::SourceTimeout { .. } | TsqError::SourceFailed { .. }
        )
    }

    pub fn cancelled(cause: impl Into<Option<String>>) -> Self {
        TsqError::Cancelled { cause: cause.into() }
    }
}
