//! Declarative IO specification
//!
//! A specification describes everything the generator needs to expand a run
//! request: which targets, what operation, how addresses and transfer sizes
//! are chosen, how many concurrent streams, and when to give up on an
//! operation. Specifications are plain data and serializable so that callers
//! (test drivers, remote controllers) can ship them over any control channel.

pub mod validator;

use serde::{Deserialize, Serialize};

/// Hard cap on the per-target thread count of one specification.
pub const MAX_THREADS_PER_SPEC: u32 = 4096;

/// Sentinel meaning "use the target's capacity" for LBA bounds.
pub const LBA_INVALID: u64 = u64::MAX;

/// What each pass of a thread context does against its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Read only.
    Read,
    /// Write only.
    Write,
    /// Write, then read the same extent back as a second phase.
    WriteReadCheck,
    /// Read and check the expected pattern.
    ReadCheck,
    /// Write zeros across the extent.
    ZeroFill,
}

impl OperationKind {
    /// Operations with a second (check) phase within one pass.
    pub fn has_check_phase(&self) -> bool {
        matches!(self, OperationKind::WriteReadCheck)
    }
}

/// How successive LBAs are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressingMode {
    /// Every operation starts at `start_lba`.
    Fixed,
    /// Private per-context cursor walking up through the range.
    SequentialIncreasing,
    /// Private per-context cursor walking down through the range.
    SequentialDecreasing,
    /// Cursor shared by all contexts on the target, walking up.
    CaterpillarIncreasing,
    /// Cursor shared by all contexts on the target, walking down.
    CaterpillarDecreasing,
    /// Uniformly random block-aligned LBA within the range.
    Random,
}

impl AddressingMode {
    /// Caterpillar modes advance a cursor shared across contexts, which
    /// cannot be shared safely across targets of different capacities.
    pub fn is_caterpillar(&self) -> bool {
        matches!(
            self,
            AddressingMode::CaterpillarIncreasing | AddressingMode::CaterpillarDecreasing
        )
    }

    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            AddressingMode::SequentialIncreasing | AddressingMode::SequentialDecreasing
        )
    }
}

/// How the per-operation block count is chosen within `[min_blocks, max_blocks]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockSpec {
    /// Always `min_blocks` (min and max must agree).
    Constant,
    /// Uniformly random in the range.
    RandomRange,
    /// Starts at `min_blocks` and grows by one each pass, wrapping at max.
    Increasing,
}

/// Payload fill pattern for write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pattern {
    Zeros,
    Ones,
    /// Deterministic pseudo-random bytes from the given seed.
    Random { seed: u64 },
    /// Each block is stamped with its own LBA, so read-check can detect
    /// misplaced data.
    LbaStamp,
}

/// Transfer interface the operations are issued over.
///
/// The device interface only supports plain read and write opcodes; the
/// packet interface supports the full operation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoInterface {
    Packet,
    Device,
}

/// Identity of a storage target, either structural or by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetIdentity {
    Object { id: u32, namespace: u32 },
    Name(String),
}

impl std::fmt::Display for TargetIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetIdentity::Object { id, namespace } => write!(f, "obj {:#x}.{}", id, namespace),
            TargetIdentity::Name(name) => write!(f, "{}", name),
        }
    }
}

/// One line of a scripted playback header: a target and the number of
/// contexts to run against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackEntry {
    pub identity: TargetIdentity,
    pub threads: u32,
}

/// Which targets a specification expands over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetFilter {
    /// A single target by identity.
    Target(TargetIdentity),
    /// Every live, non-system instance of a class.
    Class(u32),
    /// The immediate children of a dependency group.
    Group(TargetIdentity),
    /// A scripted playback header with per-target thread counts.
    Playback(Vec<PlaybackEntry>),
}

impl TargetFilter {
    /// True for filters that can expand to more than one target.
    pub fn is_multi_target(&self) -> bool {
        !matches!(self, TargetFilter::Target(_))
    }
}

/// Behavior toggles carried as a bitmask so new options never change the
/// control-surface layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpecOptions(pub u64);

impl SpecOptions {
    /// Operations are expected to be aborted (error escalation suppressed
    /// when the scanner cancels them).
    pub const EXPECT_ABORTS: u64 = 1 << 0;
    /// Operational errors do not finish the context; it keeps looping.
    pub const CONTINUE_ON_ERROR: u64 = 1 << 1;
    /// After each completed pass the context parks until `unlock` is called
    /// with its token. Used by persistence collaborators for pin/unpin.
    pub const HOLD_FOR_UNLOCK: u64 = 1 << 2;

    pub fn is_set(&self, bit: u64) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u64) {
        self.0 |= bit;
    }
}

/// The declarative IO specification carried by a run request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoSpec {
    pub operation: OperationKind,
    pub filter: TargetFilter,
    pub interface: IoInterface,
    pub addressing: AddressingMode,
    pub block_spec: BlockSpec,
    /// Minimum blocks per operation. Must be nonzero.
    pub min_blocks: u64,
    /// Maximum blocks per operation. Must be >= min_blocks.
    pub max_blocks: u64,
    /// Lower bound of the LBA range. `LBA_INVALID` means block 0.
    pub min_lba: u64,
    /// First LBA of sequential/fixed addressing. Must be <= max_lba.
    pub start_lba: u64,
    /// Upper bound of the LBA range. `LBA_INVALID` means target capacity.
    pub max_lba: u64,
    /// Concurrent thread contexts per matched target.
    pub threads: u32,
    pub pattern: Pattern,
    /// Required operation alignment in blocks. Zero means unaligned.
    pub alignment_blocks: u32,
    /// Per-request abort deadline in milliseconds. `None` uses the service
    /// default; cancellations under the default are logged as unexpected.
    pub abort_msecs: Option<u64>,
    /// Forward operations to the peer controller instead of issuing locally.
    pub forward_to_peer: bool,
    /// Preferred worker queue, taken modulo the pool size. `None` spreads
    /// contexts across queues by their id.
    pub queue_hint: Option<u32>,
    /// Passes each context performs before finishing. Zero means run until
    /// the request is stopped.
    pub max_passes: u64,
    pub options: SpecOptions,
}

impl IoSpec {
    /// A minimal single-target specification with library defaults; callers
    /// override the fields they care about.
    pub fn for_target(identity: TargetIdentity, operation: OperationKind) -> Self {
        Self {
            operation,
            filter: TargetFilter::Target(identity),
            interface: IoInterface::Packet,
            addressing: AddressingMode::Random,
            block_spec: BlockSpec::Constant,
            min_blocks: 1,
            max_blocks: 1,
            min_lba: 0,
            start_lba: 0,
            max_lba: LBA_INVALID,
            threads: 1,
            pattern: Pattern::LbaStamp,
            alignment_blocks: 0,
            abort_msecs: None,
            forward_to_peer: false,
            queue_hint: None,
            max_passes: 0,
            options: SpecOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults() {
        let spec = IoSpec::for_target(
            TargetIdentity::Object { id: 1, namespace: 0 },
            OperationKind::Read,
        );
        assert_eq!(spec.threads, 1);
        assert_eq!(spec.min_blocks, 1);
        assert_eq!(spec.max_lba, LBA_INVALID);
        assert!(!spec.filter.is_multi_target());
    }

    #[test]
    fn test_options_bitmask() {
        let mut options = SpecOptions::default();
        assert!(!options.is_set(SpecOptions::EXPECT_ABORTS));
        options.set(SpecOptions::EXPECT_ABORTS);
        options.set(SpecOptions::HOLD_FOR_UNLOCK);
        assert!(options.is_set(SpecOptions::EXPECT_ABORTS));
        assert!(options.is_set(SpecOptions::HOLD_FOR_UNLOCK));
        assert!(!options.is_set(SpecOptions::CONTINUE_ON_ERROR));
    }

    #[test]
    fn test_caterpillar_detection() {
        assert!(AddressingMode::CaterpillarIncreasing.is_caterpillar());
        assert!(AddressingMode::CaterpillarDecreasing.is_caterpillar());
        assert!(!AddressingMode::SequentialIncreasing.is_caterpillar());
        assert!(!AddressingMode::Random.is_caterpillar());
    }

    #[test]
    fn test_spec_round_trips_through_json() {
        let spec = IoSpec::for_target(TargetIdentity::Name("lun3".into()), OperationKind::Write);
        let json = serde_json::to_string(&spec).unwrap();
        let back: IoSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.operation, OperationKind::Write);
        assert_eq!(back.filter, spec.filter);
    }
}
