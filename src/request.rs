//! Run requests
//!
//! One `RunRequest` exists per accepted `start` call. It owns the declarative
//! specification, the aggregated statistics, and the set of thread contexts
//! it expanded into. The active-context count only decreases once the request
//! is running; when it reaches zero the completion notification fires exactly
//! once, the arena reservation is released, and the request is reclaimed.

use crate::arena::{ArenaBuffer, ArenaReservation};
use crate::context::ThreadContext;
use crate::spec::IoSpec;
use crate::stats::{RequestCounters, ResponseTimes, Statistics, TsCounters};
use crossbeam::channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Arena bytes budgeted for one request's control record.
pub const REQUEST_RECORD_BYTES: usize = 1024;

struct RequestState {
    contexts: Vec<Arc<ThreadContext>>,
    reservation: Option<Arc<ArenaReservation>>,
    record: Option<ArenaBuffer>,
    response_times: ResponseTimes,
    completion_tx: Option<Sender<Statistics>>,
}

/// One accepted generator call.
pub struct RunRequest {
    id: u64,
    spec: IoSpec,
    stop: AtomicBool,
    /// Contexts still running. Set once at expansion, then only decremented.
    active_threads: AtomicU32,
    total_threads: u32,
    pub counters: RequestCounters,
    state: Mutex<RequestState>,
    started_at: Instant,
}

/// Handle returned to the caller of `start`.
pub struct RequestHandle {
    pub id: u64,
    /// Receives the request's final statistics exactly once, when its last
    /// thread context finishes.
    pub completion: Receiver<Statistics>,
}

impl RunRequest {
    pub fn new(
        id: u64,
        spec: IoSpec,
        total_threads: u32,
        reservation: Arc<ArenaReservation>,
        record: Option<ArenaBuffer>,
    ) -> (Arc<Self>, RequestHandle) {
        let (tx, rx) = bounded(1);
        let request = Arc::new(RunRequest {
            id,
            spec,
            stop: AtomicBool::new(false),
            active_threads: AtomicU32::new(total_threads),
            total_threads,
            counters: RequestCounters::default(),
            state: Mutex::new(RequestState {
                contexts: Vec::new(),
                reservation: Some(reservation),
                record,
                response_times: ResponseTimes::new(),
                completion_tx: Some(tx),
            }),
            started_at: Instant::now(),
        });
        (request, RequestHandle { id, completion: rx })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn spec(&self) -> &IoSpec {
        &self.spec
    }

    pub fn total_threads(&self) -> u32 {
        self.total_threads
    }

    pub fn active_threads(&self) -> u32 {
        self.active_threads.load(Ordering::SeqCst)
    }

    /// Stop new passes from starting. In-flight operations finish naturally.
    pub fn mark_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Whether the caller supplied its own abort deadline. Cancellations
    /// under the service default are unexpected and logged as such.
    pub fn has_explicit_deadline(&self) -> bool {
        self.spec.abort_msecs.is_some()
    }

    pub fn attach_context(&self, ts: Arc<ThreadContext>) {
        self.state.lock().unwrap().contexts.push(ts);
    }

    pub fn contexts(&self) -> Vec<Arc<ThreadContext>> {
        self.state.lock().unwrap().contexts.clone()
    }

    /// Fold a finished context's counters and response times into the
    /// aggregate. Called exactly once per context, under the request lock.
    pub fn fold_context(&self, ts_id: u64, counters: &TsCounters, times: &ResponseTimes) {
        self.counters.fold(counters);
        let mut state = self.state.lock().unwrap();
        times.merge_into(&mut state.response_times);
        state.contexts.retain(|c| c.id() != ts_id);
    }

    /// Decrement the active count for one finished context. Returns true
    /// when this was the last one and the request is now complete.
    pub fn context_finished(&self) -> bool {
        let prev = self.active_threads.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "request thread count underflow");
        prev == 1
    }

    /// Fire the completion notification and release the reservation. Safe to
    /// call more than once; only the first call does anything.
    pub fn complete(&self) {
        let (tx, reservation) = {
            let mut state = self.state.lock().unwrap();
            state.record = None;
            (state.completion_tx.take(), state.reservation.take())
        };
        if let Some(tx) = tx {
            // The receiver may be gone if the caller dropped the handle.
            let _ = tx.send(self.statistics());
        }
        drop(reservation);
        tracing::info!(request = self.id, "request complete");
    }

    /// Aggregate snapshot for this request.
    pub fn statistics(&self) -> Statistics {
        let mut stats = self.counters.snapshot();
        stats.requests = 1;
        stats.response_times = self.state.lock().unwrap().response_times.summary();
        stats
    }

    pub fn snapshot(&self) -> RequestSnapshot {
        RequestSnapshot {
            id: self.id,
            operation: format!("{:?}", self.spec.operation),
            active_threads: self.active_threads(),
            total_threads: self.total_threads,
            stopped: self.is_stopped(),
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            statistics: self.statistics(),
        }
    }
}

/// Read-only introspection snapshot of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub id: u64,
    pub operation: String,
    pub active_threads: u32,
    pub total_threads: u32,
    pub stopped: bool,
    pub elapsed_ms: u64,
    pub statistics: Statistics,
}

/// Selects requests for `stop` and `get_statistics`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestFilter {
    All,
    Request(u64),
    Target(crate::spec::TargetIdentity),
}

impl RequestFilter {
    pub fn matches(&self, request: &RunRequest) -> bool {
        match self {
            RequestFilter::All => true,
            RequestFilter::Request(id) => request.id() == *id,
            RequestFilter::Target(identity) => request
                .contexts()
                .iter()
                .any(|ts| ts.target().identity() == identity),
        }
    }
}
