//! Abort and timeout scanning
//!
//! A singleton scanner thread periodically sweeps every active context and
//! cancels in-flight operations that outlived their deadline. The sweep also
//! computes how long the scanner can sleep before the next deadline comes
//! due, so contexts with short abort windows are canceled promptly without
//! polling hot.
//!
//! Peer-forwarded operations are never canceled locally; the peer side owns
//! their deadlines.

use crate::service::GeneratorService;
use crate::spec::SpecOptions;
use std::time::{Duration, Instant};

/// Longest the scanner sleeps when nothing has a nearer deadline.
pub const MAX_SCAN_INTERVAL: Duration = Duration::from_secs(5);

/// One sweep over every active request. Returns how long the scanner should
/// wait before the next sweep.
pub fn scan_for_abort(svc: &GeneratorService) -> Duration {
    let now = Instant::now();
    let mut min_wait = MAX_SCAN_INTERVAL;
    let mut canceled = 0u64;

    for request in svc.active_requests() {
        let expected = request.has_explicit_deadline()
            || request.spec().options.is_set(SpecOptions::EXPECT_ABORTS)
            || request.is_stopped();

        for ts in request.contexts() {
            // Snapshot is None for idle or peer-forwarded contexts.
            let Some((token, deadline)) = ts.outstanding_deadline() else {
                continue;
            };

            if deadline > now {
                min_wait = min_wait.min(deadline - now);
                continue;
            }

            if expected {
                tracing::debug!(ts = ts.id(), token, "canceling expired operation");
            } else {
                // Past the service default with no caller-provided deadline:
                // something below the generator is stuck.
                tracing::warn!(
                    ts = ts.id(),
                    token,
                    target = %ts.target().identity(),
                    "canceling operation past the service timeout"
                );
            }

            // A false return means the operation completed since the
            // snapshot; its completion is already on its way.
            if svc.io_path().cancel(token) {
                canceled += 1;
            }
        }
    }

    if canceled > 0 {
        tracing::debug!(canceled, "abort scan canceled operations");
    }
    min_wait
}
