//! Error taxonomy for the generator service
//!
//! Errors split into three families:
//! - `StartError`: synchronous rejections of a `start` call, detected during
//!   validation, expansion, or allocation. No partial state survives one.
//! - `ServiceError`: process-wide lifecycle failures (teardown, drain).
//! - `IoStatus`: per-operation outcomes. Operational errors are absorbed into
//!   counters and never terminate a request by themselves.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a start request is rejected before any thread context is created.
#[derive(Debug, Error)]
pub enum StartError {
    /// The specification failed pre-flight validation.
    #[error("invalid specification: {0}")]
    Validation(String),

    /// Memory budget was never negotiated via `init_memory_budget`.
    #[error("memory budget not initialized")]
    NotInitialized,

    /// The arena cannot satisfy the reservation for this request.
    #[error("insufficient arena resources: requested {requested} bytes, {available} available")]
    InsufficientResources { requested: u64, available: u64 },

    /// The target identity does not resolve against the topology.
    #[error("target does not exist: {0}")]
    ObjectDoesNotExist(String),

    /// Multi-target expansion matched nothing. Terminal, not retryable.
    #[error("no targets matched the filter")]
    NoObjects,
}

/// Lifecycle failures on the service itself.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Teardown was requested while thread contexts or peer requests are
    /// still in flight.
    #[error("service busy: {active_contexts} contexts and {peer_requests} peer requests in flight")]
    Busy {
        active_contexts: u64,
        peer_requests: u64,
    },

    /// Drain hit its upper wait ceiling with operations still outstanding.
    #[error("drain timed out with {remaining} contexts still active")]
    DrainTimedOut { remaining: u64 },

    /// Arena allocation/free counters did not reach parity at teardown.
    #[error("arena counter imbalance: {0}")]
    CounterImbalance(String),

    /// The memory budget was already negotiated.
    #[error("memory budget already initialized")]
    AlreadyInitialized,

    /// A control-surface call carried an argument the service cannot use.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Outcome of a single submitted operation.
///
/// Everything except `Success` increments a per-context error or abort
/// counter. `Aborted` is a normal termination path, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoStatus {
    Success,
    MediaError,
    InvalidRequest,
    Congested,
    IoFailure,
    Aborted,
}

impl IoStatus {
    /// True for outcomes that count against the request's error totals.
    pub fn is_error(&self) -> bool {
        !matches!(self, IoStatus::Success | IoStatus::Aborted)
    }
}

impl std::fmt::Display for IoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoStatus::Success => write!(f, "success"),
            IoStatus::MediaError => write!(f, "media error"),
            IoStatus::InvalidRequest => write!(f, "invalid request"),
            IoStatus::Congested => write!(f, "congested"),
            IoStatus::IoFailure => write!(f, "io failure"),
            IoStatus::Aborted => write!(f, "aborted"),
        }
    }
}
