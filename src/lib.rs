//! iogen - Concurrent IO load generator and dispatch service
//!
//! iogen expands declarative IO specifications into pools of concurrent
//! thread contexts that build, submit, and track operations against storage
//! targets, with a strict memory budget and leak detection.
//!
//! # Architecture
//!
//! - **Specifications**: plain-data descriptions of what to run ([`spec`])
//! - **Memory arena**: paged budget with allocate/free parity checks ([`arena`])
//! - **Targets**: lazily created, reference-counted endpoints ([`target`])
//! - **Thread contexts**: per-stream state machines ([`context`])
//! - **Worker pool**: per-core workers plus singleton scanner, housekeeper,
//!   peer relay, and replay threads ([`worker`])
//! - **Service**: the control surface tying it together ([`service`])
//!
//! The topology and IO submission path are trait seams ([`topology`]) so
//! embedders and tests supply their own.

pub mod arena;
pub mod context;
pub mod error;
pub mod peer;
pub mod request;
pub mod scanner;
pub mod service;
pub mod spec;
pub mod stats;
pub mod target;
pub mod topology;
pub mod worker;

// Re-export the types most callers need.
pub use error::{IoStatus, ServiceError, StartError};
pub use request::{RequestFilter, RequestHandle};
pub use service::GeneratorService;
pub use spec::{IoSpec, OperationKind, TargetFilter, TargetIdentity};
pub use stats::Statistics;

/// Result type used throughout iogen
pub type Result<T> = anyhow::Result<T>;
