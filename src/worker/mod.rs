//! Worker thread pool
//!
//! The pool owns every thread the service runs on. Per-core worker threads
//! drive thread-context state machines pulled from their queues; contexts are
//! spread across queues by a stable hash of their id. Alongside the workers
//! run four singleton threads:
//!
//! - the **abort scanner**, sweeping deadlines (see [`crate::scanner`]),
//! - the **housekeeper**, for periodic bookkeeping,
//! - the **peer relay**, carrying forwarded operations (see [`crate::peer`]),
//! - the **replay thread**, which serializes playback contexts.
//!
//! Threads hold only a weak service handle and exit when the service drops,
//! so the pool never keeps a dead service alive.

use crate::context::ThreadContext;
use crate::peer::{self, PeerWork};
use crate::scanner;
use crate::service::GeneratorService;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

/// Cadence of the housekeeping thread.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

/// Items consumed by worker and replay threads.
pub enum WorkItem {
    Run(Arc<ThreadContext>),
    Shutdown,
}

enum ScannerMsg {
    Wake,
    Shutdown,
}

/// The running pool. Created lazily on the first accepted request.
pub struct WorkerPool {
    senders: Vec<Sender<WorkItem>>,
    replay_tx: Sender<WorkItem>,
    peer_tx: Sender<PeerWork>,
    scanner_tx: Sender<ScannerMsg>,
    housekeeper_tx: Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn the per-core workers and the four singleton threads.
    pub fn start(svc: &Arc<GeneratorService>) -> WorkerPool {
        let cores = num_cpus::get().max(1);
        let mut senders = Vec::with_capacity(cores);
        let mut handles = Vec::with_capacity(cores + 4);

        for i in 0..cores {
            let (tx, rx) = unbounded();
            senders.push(tx);
            handles.push(spawn_runner(
                format!("iogen-worker-{}", i),
                Arc::downgrade(svc),
                rx,
            ));
        }

        let (replay_tx, replay_rx) = unbounded();
        handles.push(spawn_runner(
            "iogen-replay".into(),
            Arc::downgrade(svc),
            replay_rx,
        ));

        let (peer_tx, peer_rx) = unbounded();
        {
            let weak = Arc::downgrade(svc);
            handles.push(
                std::thread::Builder::new()
                    .name("iogen-peer".into())
                    .spawn(move || peer::run_relay(weak, peer_rx))
                    .expect("spawn peer relay thread"),
            );
        }

        let (scanner_tx, scanner_rx) = unbounded();
        {
            let weak = Arc::downgrade(svc);
            handles.push(
                std::thread::Builder::new()
                    .name("iogen-scan".into())
                    .spawn(move || run_scanner(weak, scanner_rx))
                    .expect("spawn scanner thread"),
            );
        }

        let (housekeeper_tx, housekeeper_rx) = unbounded();
        {
            let weak = Arc::downgrade(svc);
            handles.push(
                std::thread::Builder::new()
                    .name("iogen-housekeep".into())
                    .spawn(move || run_housekeeper(weak, housekeeper_rx))
                    .expect("spawn housekeeper thread"),
            );
        }

        tracing::info!(workers = cores, "worker pool started");
        WorkerPool {
            senders,
            replay_tx,
            peer_tx,
            scanner_tx,
            housekeeper_tx,
            handles,
        }
    }

    /// Queue a context for execution. Playback contexts go to the replay
    /// thread so a scripted sequence never runs out of order; everything
    /// else lands on a per-core queue by id.
    pub fn enqueue(&self, ts: Arc<ThreadContext>) {
        if ts.is_playback() {
            let _ = self.replay_tx.send(WorkItem::Run(ts));
        } else {
            let slot = ts.thread_hint() % self.senders.len();
            let _ = self.senders[slot].send(WorkItem::Run(ts));
        }
    }

    pub fn forward_to_peer(&self, ts: Arc<ThreadContext>, descriptor: crate::topology::IoDescriptor) {
        let _ = self.peer_tx.send(PeerWork::Forward { ts, descriptor });
    }

    /// Wake the scanner ahead of its computed sleep; used when a new request
    /// with a near deadline starts.
    pub fn kick_scanner(&self) {
        let _ = self.scanner_tx.send(ScannerMsg::Wake);
    }

    /// Stop every thread and join them. Callers check for in-flight work
    /// first; anything still queued is dropped.
    pub fn shutdown(mut self) {
        for tx in &self.senders {
            let _ = tx.send(WorkItem::Shutdown);
        }
        let _ = self.replay_tx.send(WorkItem::Shutdown);
        let _ = self.peer_tx.send(PeerWork::Shutdown);
        let _ = self.scanner_tx.send(ScannerMsg::Shutdown);
        let _ = self.housekeeper_tx.send(());

        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        tracing::info!("worker pool stopped");
    }
}

fn spawn_runner(
    name: String,
    svc: Weak<GeneratorService>,
    rx: Receiver<WorkItem>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(name)
        .spawn(move || {
            while let Ok(item) = rx.recv() {
                match item {
                    WorkItem::Run(ts) => {
                        let Some(svc) = svc.upgrade() else { break };
                        ts.step(&svc);
                    }
                    WorkItem::Shutdown => break,
                }
            }
        })
        .expect("spawn worker thread")
}

fn run_scanner(svc: Weak<GeneratorService>, rx: Receiver<ScannerMsg>) {
    loop {
        let wait = match svc.upgrade() {
            Some(svc) => scanner::scan_for_abort(&svc),
            None => break,
        };
        match rx.recv_timeout(wait) {
            Ok(ScannerMsg::Wake) | Err(RecvTimeoutError::Timeout) => continue,
            Ok(ScannerMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn run_housekeeper(svc: Weak<GeneratorService>, rx: Receiver<()>) {
    loop {
        match rx.recv_timeout(HOUSEKEEPING_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        let Some(svc) = svc.upgrade() else { break };
        svc.housekeep();
    }
}
