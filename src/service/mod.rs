//! The generator service
//!
//! `GeneratorService` owns the memory arena, the target registry, the active
//! request list, and the worker pool, and exposes the control surface:
//! `start`, `stop`, statistics and introspection snapshots, timeout and
//! option defaults, `unlock`, drain, and teardown.
//!
//! `start` is all-or-nothing. Validation, expansion, and the arena
//! reservation all happen under the service lock before any context exists;
//! any failure rolls back every hold taken and rejects with no partial state.
//!
//! Lock order: service core, then request, then target, then context.

pub mod expander;

use crate::arena::{ArenaError, MemoryArena};
use crate::context::{ThreadContext, TsSnapshot, TS_RECORD_BYTES};
use crate::error::{ServiceError, StartError};
use crate::request::{RequestFilter, RequestHandle, RequestSnapshot, RunRequest, REQUEST_RECORD_BYTES};
use crate::spec::{IoSpec, SpecOptions, TargetIdentity};
use crate::stats::Statistics;
use crate::target::registry::TargetRegistry;
use crate::target::TargetSnapshot;
use crate::topology::{IoDescriptor, IoPath, Topology};
use crate::worker::WorkerPool;
use expander::expand_filter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default arena page size when `init_memory_budget` is not given one.
pub const DEFAULT_PAGE_SIZE: usize = 64 * 1024;

/// Default per-operation deadline when a spec does not carry `abort_msecs`.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

struct ServiceCore {
    registry: TargetRegistry,
    active_requests: Vec<Arc<RunRequest>>,
    /// Folded statistics of every completed request.
    completed_totals: Statistics,
    default_io_timeout: Duration,
    /// Option bits OR-ed into every accepted specification.
    default_options: SpecOptions,
    next_request_id: u64,
    next_ts_id: u64,
}

/// The IO generator and dispatch service.
pub struct GeneratorService {
    arena: Arc<MemoryArena>,
    topology: Arc<dyn Topology>,
    io_path: Arc<dyn IoPath>,
    core: Mutex<ServiceCore>,
    pool: Mutex<Option<WorkerPool>>,
    /// Thread contexts not yet finished, across all requests.
    active_ts: AtomicU64,
    /// Operations currently held by the peer relay.
    peer_inflight: AtomicU64,
    token_counter: AtomicU64,
}

impl GeneratorService {
    pub fn new(topology: Arc<dyn Topology>, io_path: Arc<dyn IoPath>) -> Arc<Self> {
        Arc::new(GeneratorService {
            arena: MemoryArena::new(),
            topology,
            io_path,
            core: Mutex::new(ServiceCore {
                registry: TargetRegistry::new(),
                active_requests: Vec::new(),
                completed_totals: Statistics::default(),
                default_io_timeout: DEFAULT_IO_TIMEOUT,
                default_options: SpecOptions::default(),
                next_request_id: 1,
                next_ts_id: 1,
            }),
            pool: Mutex::new(None),
            active_ts: AtomicU64::new(0),
            peer_inflight: AtomicU64::new(0),
            token_counter: AtomicU64::new(1),
        })
    }

    pub fn arena(&self) -> &Arc<MemoryArena> {
        &self.arena
    }

    pub fn io_path(&self) -> &Arc<dyn IoPath> {
        &self.io_path
    }

    /// Negotiate the arena budget with the default page size. Must happen
    /// before the first `start`.
    pub fn init_memory_budget(&self, total_bytes: u64) -> Result<(), ServiceError> {
        self.init_memory_budget_with_page_size(total_bytes, DEFAULT_PAGE_SIZE)
    }

    pub fn init_memory_budget_with_page_size(
        &self,
        total_bytes: u64,
        page_size: usize,
    ) -> Result<(), ServiceError> {
        match self.arena.init_budget(total_bytes, page_size) {
            Ok(()) => Ok(()),
            Err(ArenaError::AlreadyInitialized) => Err(ServiceError::AlreadyInitialized),
            Err(ArenaError::PagesOutstanding { .. }) => Err(ServiceError::Busy {
                active_contexts: self.active_ts.load(Ordering::SeqCst),
                peer_requests: self.peer_inflight.load(Ordering::SeqCst),
            }),
            Err(err @ ArenaError::InvalidPageSize { .. }) => {
                Err(ServiceError::InvalidArgument(err.to_string()))
            }
            Err(other) => Err(ServiceError::CounterImbalance(other.to_string())),
        }
    }

    /// Accept a specification: validate, expand, reserve, create, enqueue.
    pub fn start(self: &Arc<Self>, mut spec: IoSpec) -> Result<RequestHandle, StartError> {
        if !self.arena.is_initialized() {
            return Err(StartError::NotInitialized);
        }

        spec.options.0 |= self.core.lock().unwrap().default_options.0;
        crate::spec::validator::validate_spec(&spec)?;

        let (request, handle, contexts) = {
            let mut core = self.core.lock().unwrap();

            let targets_before = core.registry.len();
            let expanded = expand_filter(&spec, &mut core.registry, self.topology.as_ref())?;
            let targets_created = (core.registry.len() - targets_before) as u64;

            let rollback = |core: &mut ServiceCore| {
                for e in &expanded {
                    core.registry.release(&e.target);
                }
            };

            let total: u64 = expanded.iter().map(|e| e.threads as u64).sum();
            if total > u32::MAX as u64 {
                rollback(&mut core);
                return Err(StartError::Validation(format!(
                    "expansion produced {} contexts",
                    total
                )));
            }
            let total = total as u32;

            // Size the reservation for the request record plus one record
            // per context, packed greedily into pages.
            let mut sizes = Vec::with_capacity(total as usize + 1);
            sizes.push(REQUEST_RECORD_BYTES);
            sizes.resize(total as usize + 1, TS_RECORD_BYTES);
            let page_size = self.arena.page_size();
            let pages = match MemoryArena::pages_for_records(page_size, &sizes) {
                Ok(pages) => pages,
                Err(err) => {
                    rollback(&mut core);
                    return Err(err.into());
                }
            };
            let reservation = match self.arena.reserve((pages * page_size) as u64) {
                Ok(reservation) => reservation,
                Err(err) => {
                    rollback(&mut core);
                    return Err(err.into());
                }
            };

            let Some(request_record) = reservation.carve_record(REQUEST_RECORD_BYTES) else {
                rollback(&mut core);
                return Err(StartError::InsufficientResources {
                    requested: REQUEST_RECORD_BYTES as u64,
                    available: 0,
                });
            };
            let mut ts_records = Vec::with_capacity(total as usize);
            for _ in 0..total {
                match reservation.carve_record(TS_RECORD_BYTES) {
                    Some(record) => ts_records.push(record),
                    None => {
                        rollback(&mut core);
                        return Err(StartError::InsufficientResources {
                            requested: TS_RECORD_BYTES as u64,
                            available: 0,
                        });
                    }
                }
            }

            // Everything fallible has passed; build the request.
            let request_id = core.next_request_id;
            core.next_request_id += 1;
            let (request, handle) = RunRequest::new(
                request_id,
                spec.clone(),
                total,
                Arc::clone(&reservation),
                Some(request_record),
            );

            let mut contexts = Vec::with_capacity(total as usize);
            let mut records = ts_records.into_iter();
            for e in &expanded {
                for index in 0..e.threads {
                    // Expansion took one hold per target; each additional
                    // context takes its own.
                    if index > 0 {
                        e.target.add_hold();
                    }
                    let ts_id = core.next_ts_id;
                    core.next_ts_id += 1;
                    let ts = ThreadContext::new(
                        ts_id,
                        index,
                        e.threads,
                        Arc::clone(&request),
                        Arc::clone(&e.target),
                        e.window,
                        records.next(),
                        e.playback,
                        request_id ^ (ts_id << 17),
                    );
                    ts.debug_check_interface();
                    request.attach_context(Arc::clone(&ts));
                    e.target.enqueue_context(Arc::clone(&ts));
                    contexts.push(ts);
                }
            }

            core.active_requests.push(Arc::clone(&request));

            let counters = &self.arena.counters;
            counters
                .objects_allocated
                .fetch_add(targets_created, Ordering::Relaxed);
            counters.requests_allocated.fetch_add(1, Ordering::Relaxed);
            counters
                .ts_allocated
                .fetch_add(total as u64, Ordering::Relaxed);
            self.active_ts.fetch_add(total as u64, Ordering::SeqCst);

            tracing::info!(
                request = request_id,
                targets = expanded.len(),
                contexts = total,
                operation = ?spec.operation,
                "request started"
            );
            (request, handle, contexts)
        };

        self.ensure_pool();
        for ts in contexts {
            self.enqueue(ts);
        }
        if request.spec().abort_msecs.is_some() {
            self.kick_scanner();
        }

        Ok(handle)
    }

    /// Stop matching requests. Never blocks: flags are set, parked contexts
    /// are released, and in-flight operations finish naturally. Returns how
    /// many requests matched.
    pub fn stop(&self, filter: &RequestFilter) -> u64 {
        let matched: Vec<Arc<RunRequest>> = {
            let core = self.core.lock().unwrap();
            core.active_requests
                .iter()
                .filter(|r| filter.matches(r))
                .cloned()
                .collect()
        };

        for request in &matched {
            request.mark_stop();
            // A context parked on unlock would never see the stop flag.
            for ts in request.contexts() {
                if ts.resume_unlock() {
                    self.enqueue(ts);
                }
            }
            tracing::info!(request = request.id(), "stop requested");
        }
        matched.len() as u64
    }

    /// Aggregate statistics for matching requests. The `All` filter also
    /// includes the folded totals of completed requests.
    pub fn get_statistics(&self, filter: &RequestFilter) -> Statistics {
        let core = self.core.lock().unwrap();
        let mut total = if matches!(filter, RequestFilter::All) {
            core.completed_totals
        } else {
            Statistics::default()
        };
        for request in core.active_requests.iter().filter(|r| filter.matches(r)) {
            total.accumulate(&request.statistics());
        }
        total
    }

    /// Clear the folded totals of completed requests. Active requests keep
    /// their in-flight counters; they fold in again on completion.
    pub fn reset_statistics(&self) {
        let mut core = self.core.lock().unwrap();
        core.completed_totals = Statistics::default();
        tracing::info!("statistics reset");
    }

    /// Snapshot the active requests, at most `max_entries` of them.
    pub fn get_request_info(&self, max_entries: usize) -> Vec<RequestSnapshot> {
        let core = self.core.lock().unwrap();
        core.active_requests
            .iter()
            .take(max_entries)
            .map(|r| r.snapshot())
            .collect()
    }

    /// Snapshot the live targets, at most `max_entries` of them.
    pub fn get_target_info(&self, max_entries: usize) -> Vec<TargetSnapshot> {
        let core = self.core.lock().unwrap();
        core.registry
            .iter()
            .take(max_entries)
            .map(|t| t.snapshot())
            .collect()
    }

    /// Snapshot the active thread contexts, at most `max_entries` of them.
    pub fn get_thread_context_info(&self, max_entries: usize) -> Vec<TsSnapshot> {
        let requests: Vec<Arc<RunRequest>> = {
            let core = self.core.lock().unwrap();
            core.active_requests.clone()
        };
        let mut snapshots = Vec::new();
        for request in requests {
            for ts in request.contexts() {
                if snapshots.len() >= max_entries {
                    return snapshots;
                }
                snapshots.push(ts.snapshot());
            }
        }
        snapshots
    }

    /// Replace the default per-operation deadline used by specs without one.
    pub fn set_timeout(&self, timeout: Duration) {
        self.core.lock().unwrap().default_io_timeout = timeout;
        self.kick_scanner();
        tracing::info!(timeout_ms = timeout.as_millis() as u64, "default timeout set");
    }

    /// Replace the option bits OR-ed into every future specification.
    pub fn set_options(&self, options: SpecOptions) {
        self.core.lock().unwrap().default_options = options;
    }

    pub fn default_io_timeout(&self) -> Duration {
        self.core.lock().unwrap().default_io_timeout
    }

    /// Release a context parked by `HOLD_FOR_UNLOCK`. Returns true when the
    /// context existed and was actually parked.
    pub fn unlock(&self, identity: &TargetIdentity, ts_id: u64) -> bool {
        let ts = {
            let core = self.core.lock().unwrap();
            core.registry
                .get(identity)
                .and_then(|target| target.find_context(ts_id))
        };
        match ts {
            Some(ts) if ts.resume_unlock() => {
                self.enqueue(ts);
                true
            }
            _ => false,
        }
    }

    /// Wait for every context and peer operation to finish, polling up to
    /// `ceiling`. Exceeding the ceiling is a hard error.
    pub fn drain(&self, ceiling: Duration) -> Result<(), ServiceError> {
        let start = Instant::now();
        loop {
            let remaining =
                self.active_ts.load(Ordering::SeqCst) + self.peer_inflight.load(Ordering::SeqCst);
            if remaining == 0 {
                return Ok(());
            }
            if start.elapsed() > ceiling {
                return Err(ServiceError::DrainTimedOut { remaining });
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Tear the service down: refuse while busy, stop the pool, and verify
    /// the allocation counters reached parity.
    pub fn shutdown(&self) -> Result<(), ServiceError> {
        let active_contexts = self.active_ts.load(Ordering::SeqCst);
        let peer_requests = self.peer_inflight.load(Ordering::SeqCst);
        if active_contexts > 0 || peer_requests > 0 {
            return Err(ServiceError::Busy {
                active_contexts,
                peer_requests,
            });
        }

        // Take the pool out of the mutex before joining: pool threads call
        // back into `enqueue`, which needs this lock.
        let pool = self.pool.lock().unwrap().take();
        if let Some(pool) = pool {
            pool.shutdown();
        }

        self.arena
            .counters
            .verify_balanced()
            .map_err(ServiceError::CounterImbalance)?;
        tracing::info!("service shut down");
        Ok(())
    }

    // ---- internals used by contexts and singleton threads ----

    pub(crate) fn next_token(&self) -> u64 {
        self.token_counter.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn enqueue(&self, ts: Arc<ThreadContext>) {
        if let Some(pool) = self.pool.lock().unwrap().as_ref() {
            pool.enqueue(ts);
        }
    }

    pub(crate) fn forward_to_peer(&self, ts: Arc<ThreadContext>, descriptor: IoDescriptor) {
        if let Some(pool) = self.pool.lock().unwrap().as_ref() {
            pool.forward_to_peer(ts, descriptor);
        }
    }

    pub(crate) fn kick_scanner(&self) {
        if let Some(pool) = self.pool.lock().unwrap().as_ref() {
            pool.kick_scanner();
        }
    }

    pub(crate) fn peer_inflight_add(&self) {
        self.peer_inflight.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn peer_inflight_sub(&self) {
        self.peer_inflight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_requests(&self) -> Vec<Arc<RunRequest>> {
        self.core.lock().unwrap().active_requests.clone()
    }

    /// Called once per finished context: release its target hold, retire its
    /// accounting, and complete the request when this was its last context.
    pub(crate) fn finish_context(&self, ts: &Arc<ThreadContext>) {
        {
            let mut core = self.core.lock().unwrap();
            if core.registry.release(ts.target()) {
                self.arena
                    .counters
                    .objects_freed
                    .fetch_add(1, Ordering::Relaxed);
            }
            self.arena.counters.ts_freed.fetch_add(1, Ordering::Relaxed);
        }

        let request = Arc::clone(ts.request());
        let last = request.context_finished();
        self.active_ts.fetch_sub(1, Ordering::SeqCst);

        if last {
            {
                let mut core = self.core.lock().unwrap();
                core.active_requests.retain(|r| r.id() != request.id());
                core.completed_totals.accumulate(&request.statistics());
            }
            self.arena
                .counters
                .requests_freed
                .fetch_add(1, Ordering::Relaxed);
            // Fires the completion notification and drops the reservation.
            request.complete();
        }
    }

    /// Periodic bookkeeping from the housekeeper thread.
    pub(crate) fn housekeep(&self) {
        let core = self.core.lock().unwrap();
        tracing::trace!(
            active_requests = core.active_requests.len(),
            targets = core.registry.len(),
            active_contexts = self.active_ts.load(Ordering::SeqCst),
            peer_inflight = self.peer_inflight.load(Ordering::SeqCst),
            arena_available = self.arena.available_bytes(),
            "housekeeping"
        );
    }

    fn ensure_pool(self: &Arc<Self>) {
        let mut pool = self.pool.lock().unwrap();
        if pool.is_none() {
            *pool = Some(WorkerPool::start(self));
        }
    }
}
