//! Statistics collection and aggregation
//!
//! Counters live at two levels. Each thread context accumulates its own
//! counts and response times with no sharing; when the context finishes,
//! everything folds into its request exactly once under the request lock.
//! Live aggregate counters on the request are plain atomics so snapshot reads
//! never take the coarse locks.

use crate::error::IoStatus;
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Highest response time the histograms can record (1 hour in microseconds).
const MAX_RESPONSE_US: u64 = 3_600_000_000;

/// Per-context operation counters. Owned by one context, folded into the
/// request on finish.
#[derive(Debug, Default, Clone)]
pub struct TsCounters {
    pub io_count: u64,
    pub pass_count: u64,
    pub error_count: u64,
    pub media_error_count: u64,
    pub invalid_request_count: u64,
    pub congested_count: u64,
    pub io_failure_count: u64,
    pub aborted_count: u64,
}

impl TsCounters {
    /// Record one completed operation.
    pub fn record(&mut self, status: IoStatus) {
        match status {
            IoStatus::Success => self.io_count += 1,
            IoStatus::Aborted => self.aborted_count += 1,
            IoStatus::MediaError => {
                self.error_count += 1;
                self.media_error_count += 1;
            }
            IoStatus::InvalidRequest => {
                self.error_count += 1;
                self.invalid_request_count += 1;
            }
            IoStatus::Congested => {
                self.error_count += 1;
                self.congested_count += 1;
            }
            IoStatus::IoFailure => {
                self.error_count += 1;
                self.io_failure_count += 1;
            }
        }
    }
}

/// Response-time accumulator backed by an HDR histogram.
pub struct ResponseTimes {
    hist: Histogram<u64>,
}

impl ResponseTimes {
    pub fn new() -> Self {
        ResponseTimes {
            hist: Histogram::new_with_bounds(1, MAX_RESPONSE_US, 3)
                .expect("histogram bounds are static"),
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        let us = (elapsed.as_micros() as u64).clamp(1, MAX_RESPONSE_US);
        let _ = self.hist.record(us);
    }

    pub fn merge_into(&self, other: &mut ResponseTimes) {
        let _ = other.hist.add(&self.hist);
    }

    pub fn summary(&self) -> ResponseSummary {
        ResponseSummary {
            samples: self.hist.len(),
            mean_us: self.hist.mean() as u64,
            p95_us: self.hist.value_at_quantile(0.95),
            max_us: self.hist.max(),
        }
    }
}

impl Default for ResponseTimes {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable response-time digest for snapshots.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResponseSummary {
    pub samples: u64,
    pub mean_us: u64,
    pub p95_us: u64,
    pub max_us: u64,
}

/// Live aggregate counters on a request. Folded contexts add here with
/// atomic increments; readers take point-in-time snapshots.
#[derive(Debug, Default)]
pub struct RequestCounters {
    pub io_count: AtomicU64,
    pub pass_count: AtomicU64,
    pub error_count: AtomicU64,
    pub media_error_count: AtomicU64,
    pub invalid_request_count: AtomicU64,
    pub congested_count: AtomicU64,
    pub io_failure_count: AtomicU64,
    pub aborted_count: AtomicU64,
}

impl RequestCounters {
    /// Fold a finished context's counters in. Called exactly once per
    /// context, under the request lock.
    pub fn fold(&self, ts: &TsCounters) {
        self.io_count.fetch_add(ts.io_count, Ordering::Relaxed);
        self.pass_count.fetch_add(ts.pass_count, Ordering::Relaxed);
        self.error_count.fetch_add(ts.error_count, Ordering::Relaxed);
        self.media_error_count
            .fetch_add(ts.media_error_count, Ordering::Relaxed);
        self.invalid_request_count
            .fetch_add(ts.invalid_request_count, Ordering::Relaxed);
        self.congested_count
            .fetch_add(ts.congested_count, Ordering::Relaxed);
        self.io_failure_count
            .fetch_add(ts.io_failure_count, Ordering::Relaxed);
        self.aborted_count
            .fetch_add(ts.aborted_count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Statistics {
        Statistics {
            io_count: self.io_count.load(Ordering::Relaxed),
            pass_count: self.pass_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            media_error_count: self.media_error_count.load(Ordering::Relaxed),
            invalid_request_count: self.invalid_request_count.load(Ordering::Relaxed),
            congested_count: self.congested_count.load(Ordering::Relaxed),
            io_failure_count: self.io_failure_count.load(Ordering::Relaxed),
            aborted_count: self.aborted_count.load(Ordering::Relaxed),
            requests: 0,
            response_times: ResponseSummary::default(),
        }
    }
}

/// Read-only aggregate snapshot returned by `get_statistics`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub io_count: u64,
    pub pass_count: u64,
    pub error_count: u64,
    pub media_error_count: u64,
    pub invalid_request_count: u64,
    pub congested_count: u64,
    pub io_failure_count: u64,
    pub aborted_count: u64,
    /// Requests contributing to this snapshot (live plus completed).
    pub requests: u64,
    pub response_times: ResponseSummary,
}

impl Statistics {
    pub fn accumulate(&mut self, other: &Statistics) {
        self.io_count += other.io_count;
        self.pass_count += other.pass_count;
        self.error_count += other.error_count;
        self.media_error_count += other.media_error_count;
        self.invalid_request_count += other.invalid_request_count;
        self.congested_count += other.congested_count;
        self.io_failure_count += other.io_failure_count;
        self.aborted_count += other.aborted_count;
        self.requests += other.requests;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ts_counters_classify_status() {
        let mut counters = TsCounters::default();
        counters.record(IoStatus::Success);
        counters.record(IoStatus::Success);
        counters.record(IoStatus::MediaError);
        counters.record(IoStatus::Congested);
        counters.record(IoStatus::Aborted);

        assert_eq!(counters.io_count, 2);
        assert_eq!(counters.error_count, 2);
        assert_eq!(counters.media_error_count, 1);
        assert_eq!(counters.congested_count, 1);
        assert_eq!(counters.aborted_count, 1);
        assert_eq!(counters.io_failure_count, 0);
    }

    #[test]
    fn test_fold_adds_once() {
        let request = RequestCounters::default();
        let mut a = TsCounters::default();
        a.io_count = 10;
        a.error_count = 1;
        let mut b = TsCounters::default();
        b.io_count = 5;
        b.aborted_count = 2;

        request.fold(&a);
        request.fold(&b);

        let snap = request.snapshot();
        assert_eq!(snap.io_count, 15);
        assert_eq!(snap.error_count, 1);
        assert_eq!(snap.aborted_count, 2);
    }

    #[test]
    fn test_response_times_merge() {
        let mut a = ResponseTimes::new();
        let mut b = ResponseTimes::new();
        a.record(Duration::from_micros(100));
        a.record(Duration::from_micros(200));
        b.record(Duration::from_micros(400));

        a.merge_into(&mut b);
        let summary = b.summary();
        assert_eq!(summary.samples, 3);
        assert!(summary.max_us >= 400);
    }

    #[test]
    fn test_statistics_accumulate() {
        let mut total = Statistics::default();
        let mut one = Statistics::default();
        one.io_count = 4;
        one.requests = 1;
        total.accumulate(&one);
        total.accumulate(&one);
        assert_eq!(total.io_count, 8);
        assert_eq!(total.requests, 2);
    }
}
