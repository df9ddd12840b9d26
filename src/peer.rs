//! Peer forwarding relay
//!
//! Specifications flagged `forward_to_peer` do not issue their operations
//! locally. The owning context parks in its await state while a singleton
//! relay thread carries the descriptor to the peer's submission path and
//! routes the completion back. The service counts in-flight peer operations
//! separately because teardown must wait for them like any local operation,
//! while the local abort scanner must leave them alone.

use crate::context::ThreadContext;
use crate::error::IoStatus;
use crate::service::GeneratorService;
use crate::topology::IoDescriptor;
use crossbeam::channel::Receiver;
use std::sync::{Arc, Weak};

/// Work items consumed by the relay thread.
pub enum PeerWork {
    Forward {
        ts: Arc<ThreadContext>,
        descriptor: IoDescriptor,
    },
    Shutdown,
}

/// Relay thread body. Exits on `Shutdown` or when the service is gone.
pub fn run_relay(svc: Weak<GeneratorService>, rx: Receiver<PeerWork>) {
    while let Ok(work) = rx.recv() {
        let (ts, descriptor) = match work {
            PeerWork::Forward { ts, descriptor } => (ts, descriptor),
            PeerWork::Shutdown => break,
        };

        let Some(svc) = svc.upgrade() else { break };
        svc.peer_inflight_add();
        tracing::debug!(ts = ts.id(), token = descriptor.token, "forwarding to peer");

        let weak = Arc::downgrade(&svc);
        let ts_done = Arc::clone(&ts);
        let on_complete = Box::new(move |status: IoStatus| {
            ts_done.clear_sent_to_peer();
            ts_done.complete_io(status);
            if let Some(svc) = weak.upgrade() {
                svc.peer_inflight_sub();
                svc.enqueue(ts_done);
            }
        });

        if let Err(err) = svc.io_path().submit(descriptor, on_complete) {
            tracing::error!(ts = ts.id(), error = %err, "peer forward failed");
            ts.clear_sent_to_peer();
            ts.complete_io(IoStatus::IoFailure);
            svc.peer_inflight_sub();
            svc.enqueue(ts);
        }
    }
}
