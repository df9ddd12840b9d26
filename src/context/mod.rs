//! Thread contexts
//!
//! A `ThreadContext` (ts) is one concurrent IO stream. It advances through a
//! small state machine: allocate memory, build an operation, submit it, await
//! completion, and either loop for another pass or finish. Worker threads
//! drive the machine by calling [`ThreadContext::step`]; each call runs
//! states until the context blocks (on memory, on a completion, or on an
//! explicit unlock) or finishes. Blocked contexts are re-enqueued by whoever
//! unblocks them, so workers never wait.
//!
//! Lock order: service, then request, then target, then the context core.
//! The core lock is never held across a submit call, since completions can
//! fire inline and need it.

use crate::arena::{ArenaBuffer, PayloadOutcome};
use crate::error::IoStatus;
use crate::request::RunRequest;
use crate::service::GeneratorService;
use crate::spec::{
    AddressingMode, BlockSpec, IoInterface, OperationKind, Pattern, SpecOptions, LBA_INVALID,
};
use crate::target::Target;
use crate::topology::{IoDescriptor, IoOpcode};
use rand::{Rng, RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Arena bytes budgeted for one context's control record.
pub const TS_RECORD_BYTES: usize = 512;

/// States of the per-context machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TsState {
    AllocateMemory,
    BuildOperation,
    Submit,
    AwaitCompletion,
    Finished,
}

/// What a `step` call observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// More states to run immediately (internal to the step loop).
    Executing,
    /// Blocked; someone else will re-enqueue this context.
    Waiting,
    /// The context finished and folded up.
    Done,
}

/// Which half of a two-phase pass is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Primary,
    Check,
}

/// The LBA range a context operates in, with the capacity sentinel resolved
/// against a concrete target.
#[derive(Debug, Clone, Copy)]
pub struct LbaWindow {
    pub min_lba: u64,
    pub start_lba: u64,
    pub max_lba: u64,
}

impl LbaWindow {
    /// Resolve a spec's bounds against a target's capacity. `LBA_INVALID`
    /// means "last block of the target".
    pub fn resolve(min_lba: u64, start_lba: u64, max_lba: u64, capacity_blocks: u64) -> Self {
        let last = capacity_blocks.saturating_sub(1);
        let max = if max_lba == LBA_INVALID { last } else { max_lba };
        let min = if min_lba == LBA_INVALID { 0 } else { min_lba };
        LbaWindow {
            min_lba: min,
            start_lba: start_lba.min(max),
            max_lba: max,
        }
    }

    pub fn span(&self) -> u64 {
        self.max_lba - self.min_lba + 1
    }
}

struct TsCore {
    state: TsState,
    phase: Phase,
    counters: crate::stats::TsCounters,
    response_times: crate::stats::ResponseTimes,
    payload: Option<crate::arena::PayloadBuffer>,
    record: Option<ArenaBuffer>,
    rng: Xoshiro256PlusPlus,

    // Current operation.
    current_lba: u64,
    current_blocks: u64,
    token: u64,
    submit_time: Option<Instant>,
    deadline: Option<Instant>,
    completion: Option<IoStatus>,
    payload_checksum: u64,

    // Addressing cursors.
    seq_cursor: u64,
    seq_started: bool,
    inc_blocks: u64,

    passes_done: u64,
    waiting_memory: bool,
    waiting_unlock: bool,
    finished: bool,
}

/// One concurrent IO stream against one target.
pub struct ThreadContext {
    id: u64,
    thread_index: u32,
    threads_on_target: u32,
    playback: bool,
    request: Arc<RunRequest>,
    target: Arc<Target>,
    window: LbaWindow,
    /// An operation is in flight (set between submit and completion).
    outstanding: AtomicBool,
    /// The in-flight operation was forwarded to the peer; the abort scanner
    /// must not cancel it locally.
    sent_to_peer: AtomicBool,
    core: Mutex<TsCore>,
}

impl ThreadContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        thread_index: u32,
        threads_on_target: u32,
        request: Arc<RunRequest>,
        target: Arc<Target>,
        window: LbaWindow,
        record: Option<ArenaBuffer>,
        playback: bool,
        seed: u64,
    ) -> Arc<Self> {
        Arc::new(ThreadContext {
            id,
            thread_index,
            threads_on_target: threads_on_target.max(1),
            playback,
            request,
            target,
            window,
            outstanding: AtomicBool::new(false),
            sent_to_peer: AtomicBool::new(false),
            core: Mutex::new(TsCore {
                state: TsState::AllocateMemory,
                phase: Phase::Primary,
                counters: crate::stats::TsCounters::default(),
                response_times: crate::stats::ResponseTimes::new(),
                payload: None,
                record,
                rng: Xoshiro256PlusPlus::seed_from_u64(seed),
                current_lba: 0,
                current_blocks: 0,
                token: 0,
                submit_time: None,
                deadline: None,
                completion: None,
                payload_checksum: 0,
                seq_cursor: 0,
                seq_started: false,
                inc_blocks: 0,
                passes_done: 0,
                waiting_memory: false,
                waiting_unlock: false,
                finished: false,
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn target(&self) -> &Arc<Target> {
        &self.target
    }

    pub fn request(&self) -> &Arc<RunRequest> {
        &self.request
    }

    /// Dispatch hint for the worker pool: the spec's queue hint when the
    /// caller supplied one, otherwise the context id.
    pub fn thread_hint(&self) -> usize {
        match self.request.spec().queue_hint {
            Some(hint) => hint as usize,
            None => self.id as usize,
        }
    }

    pub fn is_playback(&self) -> bool {
        self.playback
    }

    pub fn is_outstanding(&self) -> bool {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn is_sent_to_peer(&self) -> bool {
        self.sent_to_peer.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_sent_to_peer(&self) {
        self.sent_to_peer.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_sent_to_peer(&self) {
        self.sent_to_peer.store(false, Ordering::SeqCst);
    }

    /// Deadline of the in-flight operation, if any. Peer-forwarded
    /// operations report none; the peer's own scanner owns them.
    pub fn outstanding_deadline(&self) -> Option<(u64, Instant)> {
        if !self.is_outstanding() || self.is_sent_to_peer() {
            return None;
        }
        let core = self.core.lock().unwrap();
        core.deadline.map(|d| (core.token, d))
    }

    /// Store a completion. The caller re-enqueues the context afterwards.
    pub fn complete_io(&self, status: IoStatus) {
        let mut core = self.core.lock().unwrap();
        core.completion = Some(status);
    }

    /// Clear the unlock hold. Returns true when the context was actually
    /// parked and should be re-enqueued.
    pub fn resume_unlock(&self) -> bool {
        let mut core = self.core.lock().unwrap();
        let was = core.waiting_unlock;
        core.waiting_unlock = false;
        was
    }

    pub(crate) fn clear_memory_wait(&self) {
        self.core.lock().unwrap().waiting_memory = false;
    }

    pub fn counters(&self) -> crate::stats::TsCounters {
        self.core.lock().unwrap().counters.clone()
    }

    pub fn state(&self) -> TsState {
        self.core.lock().unwrap().state
    }

    /// Run the state machine until it blocks or finishes.
    pub fn step(self: &Arc<Self>, svc: &Arc<GeneratorService>) -> StepStatus {
        loop {
            let state = {
                let core = self.core.lock().unwrap();
                if core.finished {
                    return StepStatus::Done;
                }
                if core.waiting_memory || core.waiting_unlock {
                    return StepStatus::Waiting;
                }
                core.state
            };

            let status = match state {
                TsState::AllocateMemory => self.allocate_memory(svc),
                TsState::BuildOperation => self.build_operation(),
                TsState::Submit => self.submit(svc),
                TsState::AwaitCompletion => self.await_completion(),
                TsState::Finished => {
                    self.finish(svc);
                    return StepStatus::Done;
                }
            };
            match status {
                StepStatus::Executing => continue,
                other => return other,
            }
        }
    }

    /// Acquire the payload buffer, parking on arena starvation.
    fn allocate_memory(self: &Arc<Self>, svc: &Arc<GeneratorService>) -> StepStatus {
        let bytes = self.request.spec().max_blocks * self.target.block_size() as u64;

        self.core.lock().unwrap().waiting_memory = true;

        let weak_svc = Arc::downgrade(svc);
        let ts = Arc::clone(self);
        let on_ready = Box::new(move || {
            ts.clear_memory_wait();
            if let Some(svc) = weak_svc.upgrade() {
                svc.enqueue(ts);
            }
        });

        match svc.arena().allocate_payload(bytes, on_ready) {
            Ok(PayloadOutcome::Ready(payload)) => {
                let mut core = self.core.lock().unwrap();
                core.waiting_memory = false;
                core.payload = Some(payload);
                core.state = TsState::BuildOperation;
                StepStatus::Executing
            }
            Ok(PayloadOutcome::Waiting) => StepStatus::Waiting,
            Err(err) => {
                tracing::error!(ts = self.id, error = %err, "payload allocation failed");
                let mut core = self.core.lock().unwrap();
                core.waiting_memory = false;
                core.counters.record(IoStatus::IoFailure);
                core.state = TsState::Finished;
                StepStatus::Executing
            }
        }
    }

    /// Choose the next extent and fill the payload for write phases.
    fn build_operation(&self) -> StepStatus {
        let spec = self.request.spec().clone();
        let mut core = self.core.lock().unwrap();

        if self.request.is_stopped() {
            core.state = TsState::Finished;
            return StepStatus::Executing;
        }

        // The check phase reads back the extent the primary phase wrote.
        if core.phase == Phase::Check {
            core.state = TsState::Submit;
            return StepStatus::Executing;
        }

        let blocks = self.choose_blocks(&mut core, &spec);
        let lba = self.choose_lba(&mut core, &spec, blocks);
        core.current_lba = lba;
        core.current_blocks = blocks;

        if let Some(record) = core.record.as_mut() {
            let slice = record.as_mut_slice();
            slice[0..8].copy_from_slice(&lba.to_le_bytes());
            slice[8..16].copy_from_slice(&blocks.to_le_bytes());
        }

        if self.is_write_phase(spec.operation) {
            self.fill_payload(&mut core, &spec, lba, blocks);
        }

        core.state = TsState::Submit;
        StepStatus::Executing
    }

    fn is_write_phase(&self, operation: OperationKind) -> bool {
        matches!(
            operation,
            OperationKind::Write | OperationKind::ZeroFill | OperationKind::WriteReadCheck
        )
    }

    fn opcode(&self, operation: OperationKind, phase: Phase) -> IoOpcode {
        match (operation, phase) {
            (OperationKind::Read, _) | (OperationKind::ReadCheck, _) => IoOpcode::Read,
            (OperationKind::Write, _) => IoOpcode::Write,
            (OperationKind::ZeroFill, _) => IoOpcode::Zero,
            (OperationKind::WriteReadCheck, Phase::Primary) => IoOpcode::Write,
            (OperationKind::WriteReadCheck, Phase::Check) => IoOpcode::Read,
        }
    }

    fn choose_blocks(&self, core: &mut TsCore, spec: &crate::spec::IoSpec) -> u64 {
        let blocks = match spec.block_spec {
            BlockSpec::Constant => spec.min_blocks,
            BlockSpec::RandomRange => core.rng.gen_range(spec.min_blocks..=spec.max_blocks),
            BlockSpec::Increasing => {
                if core.inc_blocks < spec.min_blocks || core.inc_blocks >= spec.max_blocks {
                    core.inc_blocks = spec.min_blocks;
                } else {
                    core.inc_blocks += 1;
                }
                core.inc_blocks
            }
        };
        blocks.min(self.window.span())
    }

    fn choose_lba(&self, core: &mut TsCore, spec: &crate::spec::IoSpec, blocks: u64) -> u64 {
        let w = self.window;
        let lba = match spec.addressing {
            AddressingMode::Fixed => w.start_lba,
            AddressingMode::SequentialIncreasing => {
                if !core.seq_started {
                    core.seq_cursor = self.sequential_origin();
                    core.seq_started = true;
                }
                if core.seq_cursor + blocks - 1 > w.max_lba {
                    core.seq_cursor = w.min_lba;
                }
                let lba = core.seq_cursor;
                core.seq_cursor += blocks;
                lba
            }
            AddressingMode::SequentialDecreasing => {
                if !core.seq_started {
                    core.seq_cursor = w.max_lba.saturating_sub(blocks - 1);
                    core.seq_started = true;
                }
                if core.seq_cursor < w.min_lba || core.seq_cursor + blocks - 1 > w.max_lba {
                    core.seq_cursor = w.max_lba.saturating_sub(blocks - 1);
                }
                let lba = core.seq_cursor;
                core.seq_cursor = core.seq_cursor.saturating_sub(blocks);
                lba
            }
            AddressingMode::CaterpillarIncreasing | AddressingMode::CaterpillarDecreasing => {
                self.target
                    .caterpillar_next(spec.addressing, w.min_lba, w.max_lba, blocks)
            }
            AddressingMode::Random => {
                let slack = w.span() - blocks;
                w.min_lba + core.rng.gen_range(0..=slack)
            }
        };

        let align = spec.alignment_blocks as u64;
        if align > 0 && lba > w.min_lba {
            let aligned = lba - (lba - w.min_lba) % align;
            aligned.max(w.min_lba)
        } else {
            lba
        }
    }

    /// Staggered start so sequential contexts cover disjoint slices of the
    /// range instead of piling onto the same cursor.
    fn sequential_origin(&self) -> u64 {
        let w = self.window;
        let stride = w.span() / self.threads_on_target as u64;
        let origin = w.start_lba + self.thread_index as u64 * stride;
        origin.min(w.max_lba)
    }

    fn fill_payload(&self, core: &mut TsCore, spec: &crate::spec::IoSpec, lba: u64, blocks: u64) {
        let block_size = self.target.block_size() as usize;
        let len = (blocks as usize) * block_size;
        let ts_id = self.id;
        let pattern = spec.pattern;
        let operation = spec.operation;

        let sum = {
            let payload = match core.payload.as_mut() {
                Some(p) => p,
                None => return,
            };
            let slice = &mut payload.as_mut_slice()[..len];

            match (operation, pattern) {
                (OperationKind::ZeroFill, _) | (_, Pattern::Zeros) => slice.fill(0),
                (_, Pattern::Ones) => slice.fill(0xFF),
                (_, Pattern::Random { seed }) => {
                    let mut prng = Xoshiro256PlusPlus::seed_from_u64(seed ^ lba);
                    prng.fill_bytes(slice);
                }
                (_, Pattern::LbaStamp) => {
                    for (i, block) in slice.chunks_mut(block_size).enumerate() {
                        block.fill(0);
                        let stamp_lba = lba + i as u64;
                        block[0..8].copy_from_slice(&stamp_lba.to_le_bytes());
                        block[8..16].copy_from_slice(&ts_id.to_le_bytes());
                    }
                }
            }

            checksum(slice)
        };
        core.payload_checksum = sum;
    }

    /// Hand the current operation to the submission path. The core lock is
    /// released before submit so inline completions can take it.
    fn submit(self: &Arc<Self>, svc: &Arc<GeneratorService>) -> StepStatus {
        let spec = self.request.spec();
        let token = svc.next_token();
        let abort_after = spec
            .abort_msecs
            .map(Duration::from_millis)
            .unwrap_or_else(|| svc.default_io_timeout());

        let descriptor = {
            let mut core = self.core.lock().unwrap();
            core.token = token;
            core.submit_time = Some(Instant::now());
            core.deadline = Some(Instant::now() + abort_after);
            core.completion = None;
            core.state = TsState::AwaitCompletion;
            IoDescriptor {
                token,
                identity: self.target.identity().clone(),
                opcode: self.opcode(spec.operation, core.phase),
                lba: core.current_lba,
                blocks: core.current_blocks,
                block_size: self.target.block_size(),
            }
        };

        self.outstanding.store(true, Ordering::SeqCst);

        if spec.forward_to_peer {
            self.mark_sent_to_peer();
            svc.forward_to_peer(Arc::clone(self), descriptor);
            return StepStatus::Waiting;
        }

        let weak_svc = Arc::downgrade(svc);
        let ts = Arc::clone(self);
        let on_complete = Box::new(move |status: IoStatus| {
            ts.complete_io(status);
            if let Some(svc) = weak_svc.upgrade() {
                svc.enqueue(ts);
            }
        });

        if let Err(err) = svc.io_path().submit(descriptor, on_complete) {
            tracing::error!(ts = self.id, error = %err, "submit failed");
            self.outstanding.store(false, Ordering::SeqCst);
            let mut core = self.core.lock().unwrap();
            core.counters.record(IoStatus::IoFailure);
            core.deadline = None;
            core.state = TsState::Finished;
            return StepStatus::Executing;
        }

        // Deadlines shorter than the scanner's idle sleep need a nudge.
        if spec.abort_msecs.is_some() {
            svc.kick_scanner();
        }
        StepStatus::Waiting
    }

    /// Consume a completion and decide the next pass, next phase, or finish.
    fn await_completion(&self) -> StepStatus {
        let spec = self.request.spec();
        let mut core = self.core.lock().unwrap();

        let mut status = match core.completion.take() {
            Some(status) => status,
            // Re-enqueued without a completion; keep waiting.
            None => return StepStatus::Waiting,
        };

        self.outstanding.store(false, Ordering::SeqCst);
        core.deadline = None;
        if let Some(at) = core.submit_time.take() {
            core.response_times.record(at.elapsed());
        }

        // A read-back that no longer matches what this context wrote is an
        // IO failure, whatever the path reported.
        if status == IoStatus::Success && core.phase == Phase::Check {
            let len = (core.current_blocks as usize) * self.target.block_size() as usize;
            let expected = core.payload_checksum;
            if let Some(payload) = core.payload.as_ref() {
                if checksum(&payload.as_slice()[..len]) != expected {
                    tracing::error!(
                        ts = self.id,
                        lba = core.current_lba,
                        blocks = core.current_blocks,
                        "read-check miscompare"
                    );
                    status = IoStatus::IoFailure;
                }
            }
        }

        core.counters.record(status);

        if status == IoStatus::Aborted {
            let expected = self.request.has_explicit_deadline()
                || spec.options.is_set(SpecOptions::EXPECT_ABORTS)
                || self.request.is_stopped();
            if !expected {
                tracing::warn!(
                    ts = self.id,
                    target = %self.target.identity(),
                    "operation aborted without an explicit deadline"
                );
            }
            core.state = TsState::Finished;
            return StepStatus::Executing;
        }

        if status.is_error() {
            tracing::warn!(
                ts = self.id,
                target = %self.target.identity(),
                status = %status,
                lba = core.current_lba,
                "operation failed"
            );
            if !spec.options.is_set(SpecOptions::CONTINUE_ON_ERROR) {
                core.state = TsState::Finished;
                return StepStatus::Executing;
            }
        } else if spec.operation.has_check_phase() && core.phase == Phase::Primary {
            core.phase = Phase::Check;
            core.state = TsState::BuildOperation;
            return StepStatus::Executing;
        }

        // Pass boundary.
        core.phase = Phase::Primary;
        core.passes_done += 1;
        core.counters.pass_count += 1;

        let pass_limited = spec.max_passes > 0 && core.passes_done >= spec.max_passes;
        if pass_limited || self.request.is_stopped() {
            core.state = TsState::Finished;
            return StepStatus::Executing;
        }

        core.state = TsState::BuildOperation;
        if spec.options.is_set(SpecOptions::HOLD_FOR_UNLOCK) {
            core.waiting_unlock = true;
            return StepStatus::Waiting;
        }
        StepStatus::Executing
    }

    /// Fold counters up, release memory, and detach. Idempotent.
    fn finish(self: &Arc<Self>, svc: &Arc<GeneratorService>) {
        let (counters, times) = {
            let mut core = self.core.lock().unwrap();
            if core.finished {
                return;
            }
            core.finished = true;
            core.state = TsState::Finished;
            core.payload = None;
            core.record = None;
            (
                core.counters.clone(),
                std::mem::take(&mut core.response_times),
            )
        };

        self.request.fold_context(self.id, &counters, &times);
        self.target.dequeue_context(self.id);
        svc.finish_context(self);
        tracing::debug!(ts = self.id, target = %self.target.identity(), "context finished");
    }

    pub fn snapshot(&self) -> TsSnapshot {
        let core = self.core.lock().unwrap();
        TsSnapshot {
            id: self.id,
            request_id: self.request.id(),
            target: self.target.identity().clone(),
            state: core.state,
            io_count: core.counters.io_count,
            pass_count: core.counters.pass_count,
            error_count: core.counters.error_count,
            aborted_count: core.counters.aborted_count,
            outstanding: self.is_outstanding(),
            sent_to_peer: self.is_sent_to_peer(),
        }
    }

    /// Device-interface specs are restricted to plain reads and writes;
    /// enforced by validation, asserted here for the debug builds.
    pub(crate) fn debug_check_interface(&self) {
        let spec = self.request.spec();
        if spec.interface == IoInterface::Device {
            debug_assert!(matches!(
                spec.operation,
                OperationKind::Read | OperationKind::Write
            ));
        }
    }
}

/// Read-only introspection snapshot of a context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TsSnapshot {
    pub id: u64,
    pub request_id: u64,
    pub target: crate::spec::TargetIdentity,
    pub state: TsState,
    pub io_count: u64,
    pub pass_count: u64,
    pub error_count: u64,
    pub aborted_count: u64,
    pub outstanding: bool,
    pub sent_to_peer: bool,
}

fn checksum(data: &[u8]) -> u64 {
    // FNV-1a.
    let mut hash = 0xcbf29ce484222325u64;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::MemoryArena;
    use crate::request::RequestHandle;
    use crate::spec::{IoSpec, TargetIdentity};
    use crate::topology::TargetDescriptor;

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

    fn context_for(spec: IoSpec, capacity: u64) -> (Arc<ThreadContext>, RequestHandle) {
        let arena = MemoryArena::new();
        arena.init_budget(64 * 1024, 4096).unwrap();
        let reservation = arena.reserve(4096).unwrap();
        let window = LbaWindow::resolve(spec.min_lba, spec.start_lba, spec.max_lba, capacity);
        let threads = spec.threads;
        let (request, handle) = crate::request::RunRequest::new(1, spec, threads, reservation, None);
        let ts = ThreadContext::new(
            100,
            0,
            threads,
            request,
            target(capacity),
            window,
            None,
            false,
            42,
        );
        (ts, handle)
    }

    #[test]
    fn test_queue_hint_overrides_id_dispatch() {
        let spec = IoSpec::for_target(
            TargetIdentity::Object { id: 1, namespace: 0 },
            OperationKind::Read,
        );
        let (ts, _handle) = context_for(spec.clone(), 0x1000);
        assert_eq!(ts.thread_hint(), 100);

        let mut hinted = spec;
        hinted.queue_hint = Some(7);
        let (ts, _handle) = context_for(hinted, 0x1000);
        assert_eq!(ts.thread_hint(), 7);
    }

    #[test]
    fn test_window_resolves_capacity_sentinel() {
        let w = LbaWindow::resolve(0, 0, LBA_INVALID, 0x1000);
        assert_eq!(w.min_lba, 0);
        assert_eq!(w.max_lba, 0xFFF);
        assert_eq!(w.span(), 0x1000);

        let w = LbaWindow::resolve(10, 20, 99, 0x1000);
        assert_eq!(w.min_lba, 10);
        assert_eq!(w.start_lba, 20);
        assert_eq!(w.max_lba, 99);
    }

    #[test]
    fn test_random_lba_stays_in_window() {
        let mut spec = IoSpec::for_target(
            TargetIdentity::Object { id: 1, namespace: 0 },
            OperationKind::Read,
        );
        spec.min_lba = 100;
        spec.max_lba = 199;
        spec.min_blocks = 8;
        spec.max_blocks = 8;
        let (ts, _handle) = context_for(spec.clone(), 0x1000);

        let mut core = ts.core.lock().unwrap();
        for _ in 0..200 {
            let lba = ts.choose_lba(&mut core, &spec, 8);
            assert!(lba >= 100);
            assert!(lba + 8 - 1 <= 199);
        }
    }

    #[test]
    fn test_sequential_cursor_advances_and_wraps() {
        let mut spec = IoSpec::for_target(
            TargetIdentity::Object { id: 1, namespace: 0 },
            OperationKind::Read,
        );
        spec.addressing = AddressingMode::SequentialIncreasing;
        spec.min_lba = 0;
        spec.start_lba = 0;
        spec.max_lba = 29;
        let (ts, _handle) = context_for(spec.clone(), 0x1000);

        let mut core = ts.core.lock().unwrap();
        assert_eq!(ts.choose_lba(&mut core, &spec, 10), 0);
        assert_eq!(ts.choose_lba(&mut core, &spec, 10), 10);
        assert_eq!(ts.choose_lba(&mut core, &spec, 10), 20);
        // Wrap back to the window start.
        assert_eq!(ts.choose_lba(&mut core, &spec, 10), 0);
    }

    #[test]
    fn test_increasing_block_spec_wraps_at_max() {
        let mut spec = IoSpec::for_target(
            TargetIdentity::Object { id: 1, namespace: 0 },
            OperationKind::Read,
        );
        spec.block_spec = BlockSpec::Increasing;
        spec.min_blocks = 2;
        spec.max_blocks = 4;
        let (ts, _handle) = context_for(spec.clone(), 0x1000);

        let mut core = ts.core.lock().unwrap();
        assert_eq!(ts.choose_blocks(&mut core, &spec), 2);
        assert_eq!(ts.choose_blocks(&mut core, &spec), 3);
        assert_eq!(ts.choose_blocks(&mut core, &spec), 4);
        assert_eq!(ts.choose_blocks(&mut core, &spec), 2);
    }

    #[test]
    fn test_alignment_rounds_down() {
        let mut spec = IoSpec::for_target(
            TargetIdentity::Object { id: 1, namespace: 0 },
            OperationKind::Read,
        );
        spec.addressing = AddressingMode::Fixed;
        spec.start_lba = 13;
        spec.max_lba = 99;
        spec.alignment_blocks = 8;
        let (ts, _handle) = context_for(spec.clone(), 0x1000);

        let mut core = ts.core.lock().unwrap();
        assert_eq!(ts.choose_lba(&mut core, &spec, 1), 8);
    }

    #[test]
    fn test_opcode_mapping() {
        let spec = IoSpec::for_target(
            TargetIdentity::Object { id: 1, namespace: 0 },
            OperationKind::WriteReadCheck,
        );
        let (ts, _handle) = context_for(spec, 0x1000);
        assert_eq!(
            ts.opcode(OperationKind::WriteReadCheck, Phase::Primary),
            IoOpcode::Write
        );
        assert_eq!(
            ts.opcode(OperationKind::WriteReadCheck, Phase::Check),
            IoOpcode::Read
        );
        assert_eq!(ts.opcode(OperationKind::ZeroFill, Phase::Primary), IoOpcode::Zero);
    }

    #[test]
    fn test_completion_stored_for_await() {
        let spec = IoSpec::for_target(
            TargetIdentity::Object { id: 1, namespace: 0 },
            OperationKind::Read,
        );
        let (ts, _handle) = context_for(spec, 0x1000);
        ts.complete_io(IoStatus::Success);
        assert_eq!(ts.core.lock().unwrap().completion, Some(IoStatus::Success));
    }

    #[test]
    fn test_resume_unlock_reports_parked() {
        let spec = IoSpec::for_target(
            TargetIdentity::Object { id: 1, namespace: 0 },
            OperationKind::Read,
        );
        let (ts, _handle) = context_for(spec, 0x1000);
        assert!(!ts.resume_unlock());
        ts.core.lock().unwrap().waiting_unlock = true;
        assert!(ts.resume_unlock());
        assert!(!ts.core.lock().unwrap().waiting_unlock);
    }
}
