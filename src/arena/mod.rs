//! Chunk-based memory arena
//!
//! The arena carves fixed-size pages out of a budget negotiated once at
//! service startup. It backs two kinds of memory:
//!
//! - **Reservations**: whole-page grants sized for one run request plus all
//!   of its thread contexts. Control records are carved from a reservation
//!   with a per-page cursor.
//! - **Payload buffers**: per-context IO buffers. Payloads that fit in one
//!   page come from the paged pool; oversized payloads go through an
//!   independent, synchronous large-block path that bypasses the pool.
//!
//! Every allocate has a matching free, tracked by four counter pairs
//! (objects, requests, thread contexts, raw bytes). `verify_balanced` is the
//! service's primary leak detector and must pass at teardown.
//!
//! When the paged pool is exhausted, payload callers are parked as waiters
//! and resumed through a callback when pages come back, so nothing spins.

use crate::error::StartError;
use std::alloc::{alloc, dealloc, Layout};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Alignment for payload buffers, matching common device sector alignment.
pub const PAYLOAD_ALIGNMENT: usize = 512;

/// Errors from arena operations.
#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("arena budget not initialized")]
    NotInitialized,

    #[error("arena budget already initialized")]
    AlreadyInitialized,

    #[error("arena exhausted: requested {requested} bytes, {available} available")]
    InsufficientResources { requested: u64, available: u64 },

    #[error("cannot reinitialize with {outstanding} pages outstanding")]
    PagesOutstanding { outstanding: usize },

    #[error("invalid page size {page_size}")]
    InvalidPageSize { page_size: usize },

    #[error("{record} byte record does not fit a {page_size} byte page")]
    RecordExceedsPage { record: usize, page_size: usize },
}

impl From<ArenaError> for StartError {
    fn from(err: ArenaError) -> Self {
        match err {
            ArenaError::NotInitialized => StartError::NotInitialized,
            ArenaError::InsufficientResources {
                requested,
                available,
            } => StartError::InsufficientResources {
                requested,
                available,
            },
            other => StartError::Validation(other.to_string()),
        }
    }
}

/// One fixed-size page of arena memory.
///
/// The backing storage is heap-stable, so raw carve pointers stay valid when
/// the `Page` value itself moves between the pool and a reservation.
struct Page {
    data: Box<[u8]>,
}

impl Page {
    fn new(size: usize) -> Self {
        Page {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }
}

/// A contiguous slice carved from a reservation page.
///
/// The pointer targets page memory owned by the reservation; the carve cursor
/// guarantees disjoint ranges, and the owning context keeps the reservation
/// alive for the buffer's whole life.
pub struct ArenaBuffer {
    ptr: *mut u8,
    len: usize,
}

unsafe impl Send for ArenaBuffer {}

impl ArenaBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

/// An aligned heap allocation from the large-block path.
struct LargeBlock {
    ptr: *mut u8,
    layout: Layout,
}

unsafe impl Send for LargeBlock {}

impl LargeBlock {
    fn new(size: usize) -> Self {
        let layout =
            Layout::from_size_align(size, PAYLOAD_ALIGNMENT).expect("invalid payload layout");
        let ptr = unsafe { alloc(layout) };
        if ptr.is_null() {
            panic!("failed to allocate large payload block");
        }
        LargeBlock { ptr, layout }
    }
}

impl Drop for LargeBlock {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

enum PayloadBacking {
    /// One page checked out of the paged pool.
    Pooled(Page),
    /// A single physically-contiguous allocation outside the pool.
    Large(LargeBlock),
}

/// A per-context IO payload buffer.
///
/// Returned to the arena (and the waiter queue drained) on drop.
pub struct PayloadBuffer {
    backing: Option<PayloadBacking>,
    len: usize,
    arena: Arc<MemoryArena>,
}

impl PayloadBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self.backing.as_mut().expect("payload backing present") {
            PayloadBacking::Pooled(page) => &mut page.data[..self.len],
            PayloadBacking::Large(block) => unsafe {
                std::slice::from_raw_parts_mut(block.ptr, self.len)
            },
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        match self.backing.as_ref().expect("payload backing present") {
            PayloadBacking::Pooled(page) => &page.data[..self.len],
            PayloadBacking::Large(block) => unsafe {
                std::slice::from_raw_parts(block.ptr, self.len)
            },
        }
    }
}

impl Drop for PayloadBuffer {
    fn drop(&mut self) {
        if let Some(backing) = self.backing.take() {
            self.arena.release_payload(backing, self.len as u64);
        }
    }
}

/// Outcome of a payload allocation attempt.
pub enum PayloadOutcome {
    /// Allocation satisfied immediately.
    Ready(PayloadBuffer),
    /// Pool exhausted; the caller has been queued and will be resumed via
    /// its registered callback when memory is released.
    Waiting,
}

/// Monotonic allocate/free counter pairs. Updated with atomic increments
/// outside the coarse locks; only ever aggregated, never branched on for
/// correctness.
#[derive(Debug, Default)]
pub struct ArenaCounters {
    pub objects_allocated: AtomicU64,
    pub objects_freed: AtomicU64,
    pub requests_allocated: AtomicU64,
    pub requests_freed: AtomicU64,
    pub ts_allocated: AtomicU64,
    pub ts_freed: AtomicU64,
    pub bytes_allocated: AtomicU64,
    pub bytes_freed: AtomicU64,
}

impl ArenaCounters {
    /// Check every pair for parity. Any mismatch is a leak (or double free)
    /// and is reported with all four pairs for triage.
    pub fn verify_balanced(&self) -> Result<(), String> {
        let pairs = [
            (
                "objects",
                self.objects_allocated.load(Ordering::SeqCst),
                self.objects_freed.load(Ordering::SeqCst),
            ),
            (
                "requests",
                self.requests_allocated.load(Ordering::SeqCst),
                self.requests_freed.load(Ordering::SeqCst),
            ),
            (
                "thread contexts",
                self.ts_allocated.load(Ordering::SeqCst),
                self.ts_freed.load(Ordering::SeqCst),
            ),
            (
                "bytes",
                self.bytes_allocated.load(Ordering::SeqCst),
                self.bytes_freed.load(Ordering::SeqCst),
            ),
        ];

        let mut problems = Vec::new();
        for (name, allocated, freed) in pairs {
            if allocated != freed {
                problems.push(format!("{}: allocated {} freed {}", name, allocated, freed));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}

struct Waiter {
    needed: u64,
    resume: Box<dyn FnOnce() + Send>,
}

struct ArenaPool {
    page_size: usize,
    free_pages: Vec<Page>,
    total_pages: usize,
    initialized: bool,
}

/// The chunked memory budget and allocator.
pub struct MemoryArena {
    pool: Mutex<ArenaPool>,
    /// Locked after `pool` when both are held.
    waiters: Mutex<VecDeque<Waiter>>,
    pub counters: ArenaCounters,
}

impl MemoryArena {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryArena {
            pool: Mutex::new(ArenaPool {
                page_size: 0,
                free_pages: Vec::new(),
                total_pages: 0,
                initialized: false,
            }),
            waiters: Mutex::new(VecDeque::new()),
            counters: ArenaCounters::default(),
        })
    }

    /// Negotiate the memory budget. Must precede any reservation; can only
    /// be repeated once every outstanding page has been returned.
    pub fn init_budget(&self, total_bytes: u64, page_size: usize) -> Result<(), ArenaError> {
        if page_size == 0 {
            return Err(ArenaError::InvalidPageSize { page_size });
        }

        let mut pool = self.pool.lock().unwrap();
        if pool.initialized {
            let outstanding = pool.total_pages - pool.free_pages.len();
            if outstanding > 0 {
                return Err(ArenaError::PagesOutstanding { outstanding });
            }
            return Err(ArenaError::AlreadyInitialized);
        }

        let pages = (total_bytes as usize) / page_size;
        pool.free_pages = (0..pages).map(|_| Page::new(page_size)).collect();
        pool.total_pages = pages;
        pool.page_size = page_size;
        pool.initialized = true;

        tracing::info!(total_bytes, page_size, pages, "arena budget initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.lock().unwrap().initialized
    }

    pub fn page_size(&self) -> usize {
        self.pool.lock().unwrap().page_size
    }

    /// Pages needed to pack `record_sizes` greedily: as many records as fit
    /// in the current page, then advance. This is the sizing rule for a
    /// request-plus-contexts bundle. A record larger than one page can never
    /// be carved and is an error.
    pub fn pages_for_records(
        page_size: usize,
        record_sizes: &[usize],
    ) -> Result<usize, ArenaError> {
        let mut pages = 0usize;
        let mut remaining = 0usize;
        for &size in record_sizes {
            if size > page_size {
                return Err(ArenaError::RecordExceedsPage {
                    record: size,
                    page_size,
                });
            }
            if size > remaining {
                pages += 1;
                remaining = page_size;
            }
            remaining -= size;
        }
        Ok(pages)
    }

    /// Reserve whole pages totaling at least `total_bytes`.
    pub fn reserve(
        self: &Arc<Self>,
        total_bytes: u64,
    ) -> Result<Arc<ArenaReservation>, ArenaError> {
        let mut pool = self.pool.lock().unwrap();
        if !pool.initialized {
            return Err(ArenaError::NotInitialized);
        }

        let page_size = pool.page_size;
        let pages_needed = (total_bytes as usize).div_ceil(page_size);
        let available = pool.free_pages.len() as u64 * page_size as u64;
        if pages_needed > pool.free_pages.len() {
            return Err(ArenaError::InsufficientResources {
                requested: total_bytes,
                available,
            });
        }

        let at = pool.free_pages.len() - pages_needed;
        let pages: Vec<Page> = pool.free_pages.split_off(at);
        drop(pool);

        Ok(Arc::new(ArenaReservation {
            arena: Arc::clone(self),
            page_size,
            state: Mutex::new(ReservationState {
                pages,
                page_index: 0,
                offset: 0,
            }),
            bytes_carved: AtomicU64::new(0),
        }))
    }

    /// Allocate a per-context payload buffer.
    ///
    /// Payloads up to one page come from the paged pool. Anything larger is
    /// a single oversized buffer and takes the synchronous large-block path,
    /// which bypasses the pool entirely.
    ///
    /// On pool starvation the caller is parked: `on_ready` is queued and
    /// invoked (from the releasing thread) once enough memory is back.
    pub fn allocate_payload(
        self: &Arc<Self>,
        bytes: u64,
        on_ready: Box<dyn FnOnce() + Send>,
    ) -> Result<PayloadOutcome, ArenaError> {
        let mut pool = self.pool.lock().unwrap();
        if !pool.initialized {
            return Err(ArenaError::NotInitialized);
        }

        if bytes as usize > pool.page_size {
            drop(pool);
            let block = LargeBlock::new(bytes as usize);
            self.counters
                .bytes_allocated
                .fetch_add(bytes, Ordering::Relaxed);
            return Ok(PayloadOutcome::Ready(PayloadBuffer {
                backing: Some(PayloadBacking::Large(block)),
                len: bytes as usize,
                arena: Arc::clone(self),
            }));
        }

        match pool.free_pages.pop() {
            Some(page) => {
                drop(pool);
                self.counters
                    .bytes_allocated
                    .fetch_add(bytes, Ordering::Relaxed);
                Ok(PayloadOutcome::Ready(PayloadBuffer {
                    backing: Some(PayloadBacking::Pooled(page)),
                    len: bytes as usize,
                    arena: Arc::clone(self),
                }))
            }
            None => {
                // Enqueued under the pool lock: a concurrent release sees
                // either the free page or this waiter, never neither.
                self.waiters.lock().unwrap().push_back(Waiter {
                    needed: bytes,
                    resume: on_ready,
                });
                drop(pool);
                tracing::debug!(bytes, "payload allocation parked on arena starvation");
                Ok(PayloadOutcome::Waiting)
            }
        }
    }

    fn release_payload(&self, backing: PayloadBacking, bytes: u64) {
        match backing {
            PayloadBacking::Pooled(page) => {
                self.pool.lock().unwrap().free_pages.push(page);
            }
            PayloadBacking::Large(block) => drop(block),
        }
        self.counters.bytes_freed.fetch_add(bytes, Ordering::Relaxed);
        self.wake_waiters();
    }

    fn release_pages(&self, mut pages: Vec<Page>) {
        self.pool.lock().unwrap().free_pages.append(&mut pages);
        self.wake_waiters();
    }

    /// Resume parked payload requesters that now fit. Resumption re-enters
    /// the requester's allocate state; it never restarts the state machine.
    fn wake_waiters(&self) {
        let mut ready = Vec::new();
        {
            let pool = self.pool.lock().unwrap();
            let mut free = pool.free_pages.len();
            let page_size = pool.page_size as u64;
            drop(pool);

            let mut waiters = self.waiters.lock().unwrap();
            while free > 0 {
                match waiters.pop_front() {
                    Some(waiter) => {
                        // Oversized payloads take the synchronous large-block
                        // path and never park.
                        debug_assert!(waiter.needed <= page_size);
                        ready.push(waiter);
                        free -= 1;
                    }
                    None => break,
                }
            }
        }

        for waiter in ready {
            (waiter.resume)();
        }
    }

    /// Free bytes currently in the paged pool.
    pub fn available_bytes(&self) -> u64 {
        let pool = self.pool.lock().unwrap();
        pool.free_pages.len() as u64 * pool.page_size as u64
    }
}

struct ReservationState {
    pages: Vec<Page>,
    page_index: usize,
    offset: usize,
}

/// A whole-page grant owned by one run request.
///
/// Control records for the request and its thread contexts are carved from
/// the reservation with a first-fit-within-current-page cursor. The pages go
/// back to the arena when the last holder drops the reservation.
pub struct ArenaReservation {
    arena: Arc<MemoryArena>,
    page_size: usize,
    state: Mutex<ReservationState>,
    bytes_carved: AtomicU64,
}

impl ArenaReservation {
    /// Carve `size` bytes at the cursor.
    ///
    /// With `contiguous` set, the carve fails (returns `None`) when the
    /// current page's remainder is smaller than `size`; the caller advances
    /// to a fresh page with [`advance_page`](Self::advance_page) and retries
    /// rather than splitting the record. Without it, the carve greedily takes
    /// whatever remains in the current page and reports the granted length,
    /// which may be short; the caller loops for the rest.
    pub fn carve(&self, size: usize, contiguous: bool) -> Option<ArenaBuffer> {
        assert!(size <= self.page_size, "carve larger than a page");

        let mut state = self.state.lock().unwrap();
        if state.page_index >= state.pages.len() {
            return None;
        }

        let remaining = self.page_size - state.offset;
        let granted = if contiguous {
            if remaining < size {
                return None;
            }
            size
        } else {
            size.min(remaining)
        };

        if granted == 0 {
            return None;
        }

        let offset = state.offset;
        let page_index = state.page_index;
        let ptr = unsafe { state.pages[page_index].data.as_mut_ptr().add(offset) };

        state.offset += granted;
        if state.offset == self.page_size {
            state.page_index += 1;
            state.offset = 0;
        }
        drop(state);

        self.bytes_carved.fetch_add(granted as u64, Ordering::Relaxed);
        self.arena
            .counters
            .bytes_allocated
            .fetch_add(granted as u64, Ordering::Relaxed);

        Some(ArenaBuffer {
            ptr,
            len: granted,
        })
    }

    /// Skip the remainder of the current page. Used after a contiguous carve
    /// failure to retry on a fresh page.
    pub fn advance_page(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.page_index >= state.pages.len() {
            return false;
        }
        state.page_index += 1;
        state.offset = 0;
        state.page_index < state.pages.len()
    }

    /// Carve one fixed-size record, advancing to a fresh page when the
    /// current one cannot hold it whole.
    pub fn carve_record(&self, size: usize) -> Option<ArenaBuffer> {
        match self.carve(size, true) {
            Some(buffer) => Some(buffer),
            None => {
                if !self.advance_page() {
                    return None;
                }
                self.carve(size, true)
            }
        }
    }

    pub fn capacity_bytes(&self) -> u64 {
        let state = self.state.lock().unwrap();
        state.pages.len() as u64 * self.page_size as u64
    }

    pub fn bytes_carved(&self) -> u64 {
        self.bytes_carved.load(Ordering::Relaxed)
    }
}

impl Drop for ArenaReservation {
    fn drop(&mut self) {
        let pages = std::mem::take(&mut self.state.lock().unwrap().pages);
        self.arena
            .counters
            .bytes_freed
            .fetch_add(self.bytes_carved.load(Ordering::Relaxed), Ordering::Relaxed);
        self.arena.release_pages(pages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn arena_with(pages: usize, page_size: usize) -> Arc<MemoryArena> {
        let arena = MemoryArena::new();
        arena
            .init_budget((pages * page_size) as u64, page_size)
            .unwrap();
        arena
    }

    #[test]
    fn test_budget_must_be_initialized() {
        let arena = MemoryArena::new();
        assert!(matches!(
            arena.reserve(4096),
            Err(ArenaError::NotInitialized)
        ));
    }

    #[test]
    fn test_double_init_rejected() {
        let arena = arena_with(4, 4096);
        assert!(matches!(
            arena.init_budget(16384, 4096),
            Err(ArenaError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_reserve_exhaustion() {
        let arena = arena_with(2, 4096);
        let _held = arena.reserve(8192).unwrap();
        assert!(matches!(
            arena.reserve(4096),
            Err(ArenaError::InsufficientResources { .. })
        ));
    }

    #[test]
    fn test_pages_return_on_drop() {
        let arena = arena_with(2, 4096);
        {
            let _r = arena.reserve(8192).unwrap();
            assert_eq!(arena.available_bytes(), 0);
        }
        assert_eq!(arena.available_bytes(), 8192);
    }

    #[test]
    fn test_contiguous_carve_refuses_to_split() {
        let arena = arena_with(2, 1024);
        let reservation = arena.reserve(2048).unwrap();

        let first = reservation.carve(900, true).unwrap();
        assert_eq!(first.len(), 900);

        // 124 bytes remain in page 0; a 200-byte contiguous carve must fail.
        assert!(reservation.carve(200, true).is_none());
        assert!(reservation.advance_page());
        let second = reservation.carve(200, true).unwrap();
        assert_eq!(second.len(), 200);
    }

    #[test]
    fn test_greedy_carve_splits_across_pages() {
        let arena = arena_with(2, 1024);
        let reservation = arena.reserve(2048).unwrap();

        let _head = reservation.carve(1000, true).unwrap();

        // Non-contiguous carve takes the 24-byte remainder, then the caller
        // loops for the rest on the next page.
        let part = reservation.carve(200, false).unwrap();
        assert_eq!(part.len(), 24);
        let rest = reservation.carve(200 - 24, false).unwrap();
        assert_eq!(rest.len(), 176);
    }

    #[test]
    fn test_greedy_record_packing() {
        // 3 records of 400 bytes in 1024-byte pages: two fit per page.
        assert_eq!(
            MemoryArena::pages_for_records(1024, &[400, 400, 400]).unwrap(),
            2
        );
        // Exact fit.
        assert_eq!(MemoryArena::pages_for_records(1024, &[512, 512]).unwrap(), 1);
        // One record per page when nothing else fits.
        assert_eq!(
            MemoryArena::pages_for_records(1024, &[1024, 1024]).unwrap(),
            2
        );
        assert_eq!(MemoryArena::pages_for_records(4096, &[]).unwrap(), 0);
    }

    #[test]
    fn test_record_larger_than_page_is_error() {
        assert!(matches!(
            MemoryArena::pages_for_records(512, &[512, 1024]),
            Err(ArenaError::RecordExceedsPage {
                record: 1024,
                page_size: 512
            })
        ));
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let arena = MemoryArena::new();
        assert!(matches!(
            arena.init_budget(4096, 0),
            Err(ArenaError::InvalidPageSize { page_size: 0 })
        ));
        assert!(!arena.is_initialized());
    }

    #[test]
    fn test_carve_record_advances_pages() {
        let arena = arena_with(2, 1024);
        let reservation = arena.reserve(2048).unwrap();
        let mut records = Vec::new();
        // 2 per page across 2 pages.
        for _ in 0..4 {
            records.push(reservation.carve_record(500).unwrap());
        }
        assert!(reservation.carve_record(500).is_none());
    }

    #[test]
    fn test_payload_pooled_and_large_paths() {
        let arena = arena_with(1, 4096);

        let small = match arena
            .allocate_payload(2048, Box::new(|| {}))
            .unwrap()
        {
            PayloadOutcome::Ready(buf) => buf,
            PayloadOutcome::Waiting => panic!("pool should have a page"),
        };
        assert_eq!(small.len(), 2048);

        // Larger than a page: bypasses the (now empty) pool synchronously.
        let large = match arena
            .allocate_payload(16384, Box::new(|| {}))
            .unwrap()
        {
            PayloadOutcome::Ready(buf) => buf,
            PayloadOutcome::Waiting => panic!("large path must not wait"),
        };
        assert_eq!(large.len(), 16384);

        drop(small);
        drop(large);
        assert!(arena.counters.verify_balanced().is_ok());
    }

    #[test]
    fn test_payload_starvation_parks_and_resumes() {
        let arena = arena_with(1, 4096);
        let resumed = Arc::new(AtomicBool::new(false));

        let held = match arena.allocate_payload(4096, Box::new(|| {})).unwrap() {
            PayloadOutcome::Ready(buf) => buf,
            PayloadOutcome::Waiting => panic!("first allocation must succeed"),
        };

        let flag = Arc::clone(&resumed);
        let outcome = arena
            .allocate_payload(
                1024,
                Box::new(move || {
                    flag.store(true, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert!(matches!(outcome, PayloadOutcome::Waiting));
        assert!(!resumed.load(Ordering::SeqCst));

        // Releasing the held page wakes the waiter from this thread.
        drop(held);
        assert!(resumed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_concurrent_release_never_strands_waiter() {
        // Threads race allocation against release on a tiny pool; every
        // parked allocation must be resumed by some release.
        let arena = arena_with(2, 4096);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let arena = Arc::clone(&arena);
            handles.push(std::thread::spawn(move || {
                for _ in 0..200 {
                    let buf = loop {
                        let (tx, rx) = crossbeam::channel::bounded(1);
                        let outcome = arena
                            .allocate_payload(
                                4096,
                                Box::new(move || {
                                    let _ = tx.send(());
                                }),
                            )
                            .unwrap();
                        match outcome {
                            PayloadOutcome::Ready(buf) => break buf,
                            PayloadOutcome::Waiting => {
                                rx.recv_timeout(std::time::Duration::from_secs(10))
                                    .expect("parked allocation never resumed");
                            }
                        }
                    };
                    drop(buf);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(arena.counters.verify_balanced().is_ok());
    }

    #[test]
    fn test_counters_balance_after_carves() {
        let arena = arena_with(2, 1024);
        {
            let reservation = arena.reserve(2048).unwrap();
            let _a = reservation.carve(300, true).unwrap();
            let _b = reservation.carve(300, true).unwrap();
        }
        assert!(arena.counters.verify_balanced().is_ok());
    }

    #[test]
    fn test_counter_imbalance_detected() {
        let counters = ArenaCounters::default();
        counters.ts_allocated.fetch_add(3, Ordering::Relaxed);
        counters.ts_freed.fetch_add(2, Ordering::Relaxed);
        let err = counters.verify_balanced().unwrap_err();
        assert!(err.contains("thread contexts"));
    }
}
