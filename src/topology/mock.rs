//! Mock topology and IO path for testing
//!
//! These implementations simulate the external collaborators without touching
//! any real storage, making tests fast and deterministic.
//!
//! `MockIoPath` supports two completion modes:
//! - **Immediate**: the completion handler fires inline on the submitting
//!   thread (default), with whatever status `set_status` configured.
//! - **Manual**: operations stay outstanding until `complete_all` or a cancel
//!   resolves them; used to exercise timeout/abort paths.

use super::{CompletionHandler, IoDescriptor, IoPath, TargetDescriptor, Topology};
use crate::error::IoStatus;
use crate::spec::TargetIdentity;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// In-memory topology seeded with a fixed set of targets.
#[derive(Default)]
pub struct MockTopology {
    targets: Vec<TargetDescriptor>,
    groups: Mutex<HashMap<TargetIdentity, Vec<TargetIdentity>>>,
}

impl MockTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain data target of the given class and capacity.
    pub fn with_target(mut self, id: u32, class_id: u32, capacity_blocks: u64) -> Self {
        self.targets.push(TargetDescriptor {
            identity: TargetIdentity::Object { id, namespace: 0 },
            class_id,
            block_size: 512,
            capacity_blocks,
            optimum_block_size: 1,
            is_system: false,
        });
        self
    }

    /// Add a system/reserved instance of the given class.
    pub fn with_system_target(mut self, id: u32, class_id: u32, capacity_blocks: u64) -> Self {
        self.targets.push(TargetDescriptor {
            identity: TargetIdentity::Object { id, namespace: 0 },
            class_id,
            block_size: 512,
            capacity_blocks,
            optimum_block_size: 1,
            is_system: true,
        });
        self
    }

    pub fn with_descriptor(mut self, descriptor: TargetDescriptor) -> Self {
        self.targets.push(descriptor);
        self
    }

    /// Declare the immediate children of a dependency group.
    pub fn with_group(self, group: TargetIdentity, children: Vec<TargetIdentity>) -> Self {
        self.groups.lock().unwrap().insert(group, children);
        self
    }
}

impl Topology for MockTopology {
    fn resolve(&self, identity: &TargetIdentity) -> Option<TargetDescriptor> {
        self.targets.iter().find(|t| &t.identity == identity).cloned()
    }

    fn enumerate_class(&self, class_id: u32) -> Vec<TargetDescriptor> {
        self.targets
            .iter()
            .filter(|t| t.class_id == class_id)
            .cloned()
            .collect()
    }

    fn enumerate_group(&self, group: &TargetIdentity) -> Vec<TargetDescriptor> {
        let groups = self.groups.lock().unwrap();
        match groups.get(group) {
            Some(children) => children
                .iter()
                .filter_map(|identity| self.resolve(identity))
                .collect(),
            None => Vec::new(),
        }
    }
}

/// How the mock path resolves submitted operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// Complete inline on the submitting thread.
    Immediate,
    /// Hold operations until completed or canceled explicitly.
    Manual,
}

struct PendingOp {
    descriptor: IoDescriptor,
    handler: CompletionHandler,
}

/// Mock IO submission path.
pub struct MockIoPath {
    mode: Mutex<CompletionMode>,
    status: Mutex<IoStatus>,
    pending: Mutex<HashMap<u64, PendingOp>>,
    submitted: AtomicU64,
    canceled: AtomicU64,
}

impl MockIoPath {
    pub fn new() -> Self {
        MockIoPath {
            mode: Mutex::new(CompletionMode::Immediate),
            status: Mutex::new(IoStatus::Success),
            pending: Mutex::new(HashMap::new()),
            submitted: AtomicU64::new(0),
            canceled: AtomicU64::new(0),
        }
    }

    pub fn set_mode(&self, mode: CompletionMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Status every subsequent completion reports.
    pub fn set_status(&self, status: IoStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn submitted_count(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn canceled_count(&self) -> u64 {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn outstanding_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Complete every held operation with the configured status.
    pub fn complete_all(&self) {
        let drained: Vec<PendingOp> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().map(|(_, op)| op).collect()
        };
        let status = *self.status.lock().unwrap();
        for op in drained {
            (op.handler)(status);
        }
    }

    /// Complete one held operation by token.
    pub fn complete(&self, token: u64, status: IoStatus) -> bool {
        let op = self.pending.lock().unwrap().remove(&token);
        match op {
            Some(op) => {
                (op.handler)(status);
                true
            }
            None => false,
        }
    }

    /// Extents of every currently held operation, for assertions.
    pub fn outstanding_extents(&self) -> Vec<(u64, u64, u64)> {
        self.pending
            .lock()
            .unwrap()
            .values()
            .map(|op| (op.descriptor.token, op.descriptor.lba, op.descriptor.blocks))
            .collect()
    }
}

impl Default for MockIoPath {
    fn default() -> Self {
        Self::new()
    }
}

impl IoPath for MockIoPath {
    fn submit(&self, op: IoDescriptor, on_complete: CompletionHandler) -> crate::Result<()> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock().unwrap();
        match mode {
            CompletionMode::Immediate => {
                let status = *self.status.lock().unwrap();
                on_complete(status);
            }
            CompletionMode::Manual => {
                self.pending.lock().unwrap().insert(
                    op.token,
                    PendingOp {
                        descriptor: op,
                        handler: on_complete,
                    },
                );
            }
        }
        Ok(())
    }

    fn cancel(&self, token: u64) -> bool {
        let op = self.pending.lock().unwrap().remove(&token);
        match op {
            Some(op) => {
                self.canceled.fetch_add(1, Ordering::SeqCst);
                (op.handler)(IoStatus::Aborted);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::IoOpcode;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn descriptor(token: u64) -> IoDescriptor {
        IoDescriptor {
            token,
            identity: TargetIdentity::Object { id: 1, namespace: 0 },
            opcode: IoOpcode::Read,
            lba: 0,
            blocks: 1,
            block_size: 512,
        }
    }

    #[test]
    fn test_topology_resolution() {
        let topology = MockTopology::new().with_target(1, 10, 0x1000);
        assert!(topology
            .resolve(&TargetIdentity::Object { id: 1, namespace: 0 })
            .is_some());
        assert!(topology
            .resolve(&TargetIdentity::Object { id: 2, namespace: 0 })
            .is_none());
    }

    #[test]
    fn test_class_enumeration_includes_system_targets() {
        let topology = MockTopology::new()
            .with_target(1, 10, 0x1000)
            .with_system_target(2, 10, 0x1000)
            .with_target(3, 11, 0x1000);
        // Filtering of system instances is the expander's job.
        assert_eq!(topology.enumerate_class(10).len(), 2);
        assert_eq!(topology.enumerate_class(11).len(), 1);
    }

    #[test]
    fn test_group_enumeration() {
        let group = TargetIdentity::Name("rg0".into());
        let topology = MockTopology::new()
            .with_target(1, 10, 0x1000)
            .with_target(2, 10, 0x1000)
            .with_group(
                group.clone(),
                vec![
                    TargetIdentity::Object { id: 1, namespace: 0 },
                    TargetIdentity::Object { id: 2, namespace: 0 },
                ],
            );
        assert_eq!(topology.enumerate_group(&group).len(), 2);
        assert!(topology
            .enumerate_group(&TargetIdentity::Name("missing".into()))
            .is_empty());
    }

    #[test]
    fn test_immediate_completion() {
        let path = MockIoPath::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        path.submit(
            descriptor(1),
            Box::new(move |status| {
                assert_eq!(status, IoStatus::Success);
                flag.store(true, Ordering::SeqCst);
            }),
        )
        .unwrap();
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(path.submitted_count(), 1);
    }

    #[test]
    fn test_manual_mode_holds_until_cancel() {
        let path = MockIoPath::new();
        path.set_mode(CompletionMode::Manual);

        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        path.submit(
            descriptor(7),
            Box::new(move |status| {
                assert_eq!(status, IoStatus::Aborted);
                flag.store(true, Ordering::SeqCst);
            }),
        )
        .unwrap();

        assert_eq!(path.outstanding_count(), 1);
        assert!(!fired.load(Ordering::SeqCst));

        assert!(path.cancel(7));
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(path.canceled_count(), 1);
        assert!(!path.cancel(7));
    }
}
