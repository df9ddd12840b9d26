//! Targets and the target registry
//!
//! A `Target` is one addressable storage endpoint with outstanding generator
//! activity. Targets are created lazily on first reference, shared by every
//! thread context running against them, and destroyed when the last context
//! releases its hold. The registry in [`registry`] holds the canonical list.

pub mod registry;

use crate::context::ThreadContext;
use crate::spec::{AddressingMode, TargetIdentity};
use crate::topology::TargetDescriptor;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Mutable target state, guarded by the target lock.
///
/// Lock order: the service lock and the request lock come before this one;
/// the context lock comes after.
struct TargetState {
    /// Contexts currently running against this target.
    contexts: Vec<Arc<ThreadContext>>,
    /// Shared cursor for caterpillar addressing. All contexts on the target
    /// advance this one cursor.
    caterpillar_lba: u64,
    caterpillar_initialized: bool,
}

/// One storage endpoint with outstanding activity.
pub struct Target {
    descriptor: TargetDescriptor,
    /// Reference hold: one per attached thread context. Incremented under
    /// the service lock at attach so release cannot race with destruction.
    thread_count: AtomicU32,
    /// Lifetime total of contexts ever attached, for introspection.
    total_threads: AtomicU64,
    state: Mutex<TargetState>,
}

impl Target {
    pub fn new(descriptor: TargetDescriptor) -> Arc<Self> {
        Arc::new(Target {
            descriptor,
            thread_count: AtomicU32::new(0),
            total_threads: AtomicU64::new(0),
            state: Mutex::new(TargetState {
                contexts: Vec::new(),
                caterpillar_lba: 0,
                caterpillar_initialized: false,
            }),
        })
    }

    pub fn identity(&self) -> &TargetIdentity {
        &self.descriptor.identity
    }

    pub fn descriptor(&self) -> &TargetDescriptor {
        &self.descriptor
    }

    pub fn block_size(&self) -> u32 {
        self.descriptor.block_size
    }

    pub fn capacity_blocks(&self) -> u64 {
        self.descriptor.capacity_blocks
    }

    pub fn optimum_block_size(&self) -> u32 {
        self.descriptor.optimum_block_size
    }

    pub fn thread_count(&self) -> u32 {
        self.thread_count.load(Ordering::SeqCst)
    }

    /// Take one reference hold. Caller must hold the service lock.
    pub(crate) fn add_hold(&self) {
        self.thread_count.fetch_add(1, Ordering::SeqCst);
        self.total_threads.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop one reference hold, returning the remaining count.
    pub(crate) fn drop_hold(&self) -> u32 {
        let prev = self.thread_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "target hold underflow");
        prev - 1
    }

    /// Attach a running context to this target's queue.
    pub fn enqueue_context(&self, ts: Arc<ThreadContext>) {
        self.state.lock().unwrap().contexts.push(ts);
    }

    /// Remove a finished context from the queue.
    pub fn dequeue_context(&self, ts_id: u64) {
        let mut state = self.state.lock().unwrap();
        state.contexts.retain(|c| c.id() != ts_id);
    }

    /// Snapshot the ids of contexts currently attached.
    pub fn context_ids(&self) -> Vec<u64> {
        self.state
            .lock()
            .unwrap()
            .contexts
            .iter()
            .map(|c| c.id())
            .collect()
    }

    /// Find an attached context by id.
    pub fn find_context(&self, ts_id: u64) -> Option<Arc<ThreadContext>> {
        self.state
            .lock()
            .unwrap()
            .contexts
            .iter()
            .find(|c| c.id() == ts_id)
            .cloned()
    }

    /// Advance the shared caterpillar cursor by `blocks` and return the LBA
    /// this operation should use. The cursor wraps within
    /// `[min_lba, max_lba]`; an increasing cursor crawls up, a decreasing one
    /// crawls down.
    pub fn caterpillar_next(
        &self,
        mode: AddressingMode,
        min_lba: u64,
        max_lba: u64,
        blocks: u64,
    ) -> u64 {
        let mut state = self.state.lock().unwrap();
        if !state.caterpillar_initialized {
            state.caterpillar_lba = match mode {
                AddressingMode::CaterpillarDecreasing => max_lba.saturating_sub(blocks - 1),
                _ => min_lba,
            };
            state.caterpillar_initialized = true;
        }

        let lba = state.caterpillar_lba;
        match mode {
            AddressingMode::CaterpillarIncreasing => {
                let next = lba + blocks;
                state.caterpillar_lba = if next + blocks - 1 > max_lba { min_lba } else { next };
            }
            AddressingMode::CaterpillarDecreasing => {
                state.caterpillar_lba = if lba < min_lba + blocks {
                    max_lba.saturating_sub(blocks - 1)
                } else {
                    lba - blocks
                };
            }
            _ => {}
        }
        lba
    }
}

/// Read-only introspection snapshot of a target.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TargetSnapshot {
    pub identity: TargetIdentity,
    pub block_size: u32,
    pub capacity_blocks: u64,
    pub active_contexts: u32,
    pub total_contexts: u64,
}

impl Target {
    pub fn snapshot(&self) -> TargetSnapshot {
        TargetSnapshot {
            identity: self.descriptor.identity.clone(),
            block_size: self.descriptor.block_size,
            capacity_blocks: self.descriptor.capacity_blocks,
            active_contexts: self.thread_count.load(Ordering::SeqCst),
            total_contexts: self.total_threads.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(capacity: u64) -> Arc<Target> {
        Target::new(TargetDescriptor {
            identity: TargetIdentity::Object { id: 1, namespace: 0 },
            class_id: 10,
            block_size: 512,
            capacity_blocks: capacity,
            optimum_block_size: 1,
            is_system: false,
        })
    }

    #[test]
    fn test_hold_counting() {
        let t = target(0x1000);
        t.add_hold();
        t.add_hold();
        assert_eq!(t.thread_count(), 2);
        assert_eq!(t.drop_hold(), 1);
        assert_eq!(t.drop_hold(), 0);
    }

    #[test]
    fn test_caterpillar_increasing_wraps() {
        let t = target(100);
        let mode = AddressingMode::CaterpillarIncreasing;
        assert_eq!(t.caterpillar_next(mode, 0, 99, 10), 0);
        assert_eq!(t.caterpillar_next(mode, 0, 99, 10), 10);
        // Walk to the end of the range.
        for _ in 0..7 {
            t.caterpillar_next(mode, 0, 99, 10);
        }
        assert_eq!(t.caterpillar_next(mode, 0, 99, 10), 90);
        // Wrapped back to the start.
        assert_eq!(t.caterpillar_next(mode, 0, 99, 10), 0);
    }

    #[test]
    fn test_caterpillar_decreasing_wraps() {
        let t = target(100);
        let mode = AddressingMode::CaterpillarDecreasing;
        assert_eq!(t.caterpillar_next(mode, 0, 99, 10), 90);
        assert_eq!(t.caterpillar_next(mode, 0, 99, 10), 80);
    }
}
