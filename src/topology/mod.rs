//! External collaborator seams
//!
//! The generator consumes two services it does not implement: a topology
//! service that resolves and enumerates targets, and an IO submission path
//! that executes operation descriptors. Both are traits so test drivers and
//! embedders can supply their own; `mock` provides in-memory implementations.

pub mod mock;

use crate::error::IoStatus;
use crate::spec::TargetIdentity;
use serde::{Deserialize, Serialize};

/// Static description of a resolvable target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub identity: TargetIdentity,
    pub class_id: u32,
    pub block_size: u32,
    pub capacity_blocks: u64,
    /// Optimum transfer granularity in blocks. Alignment below this is
    /// rejected during expansion.
    pub optimum_block_size: u32,
    /// System/reserved instances are excluded from class-wide expansion.
    pub is_system: bool,
}

/// Resolution and enumeration against the live topology.
pub trait Topology: Send + Sync {
    /// Resolve one identity to a live target, or `None` if it does not exist.
    fn resolve(&self, identity: &TargetIdentity) -> Option<TargetDescriptor>;

    /// Enumerate every live instance of a class, including system instances;
    /// the expander filters those out.
    fn enumerate_class(&self, class_id: u32) -> Vec<TargetDescriptor>;

    /// Enumerate the immediate children of a dependency group.
    fn enumerate_group(&self, group: &TargetIdentity) -> Vec<TargetDescriptor>;
}

/// Opcode carried by an operation descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoOpcode {
    Read,
    Write,
    Zero,
}

/// One operation descriptor handed to the submission path. The payload stays
/// on the generator side; the descriptor only names the extent.
#[derive(Debug, Clone)]
pub struct IoDescriptor {
    /// Unique token correlating submit, completion, and cancel.
    pub token: u64,
    pub identity: TargetIdentity,
    pub opcode: IoOpcode,
    pub lba: u64,
    pub blocks: u64,
    pub block_size: u32,
}

/// Invoked exactly once per submitted descriptor, possibly from a different
/// thread than the submitter.
pub type CompletionHandler = Box<dyn FnOnce(IoStatus) + Send>;

/// The IO submission path.
pub trait IoPath: Send + Sync {
    /// Submit a descriptor. The handler fires exactly once with the final
    /// status, including `Aborted` after a successful cancel.
    fn submit(&self, op: IoDescriptor, on_complete: CompletionHandler) -> crate::Result<()>;

    /// Cancel an outstanding descriptor by token. Returns false when the
    /// token is unknown or the operation already completed.
    fn cancel(&self, token: u64) -> bool;
}
