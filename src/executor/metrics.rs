//! Executor counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct ExecutorMetrics {
    engine_calls: AtomicU64,
    engine_failures: AtomicU64,
    // Waited on an identical in-flight calculation instead of calling the engine
    coalesced: AtomicU64,
    // Found committed by a concurrent batch after partitioning
    late_hits: AtomicU64,
    in_flight: AtomicU64,
}

impl ExecutorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_engine_call(&self) {
        self.engine_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_engine_failure(&self) {
        self.engine_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late_hit(&self) {
        self.late_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn start_call(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finish_call(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn engine_calls(&self) -> u64 {
        self.engine_calls.load(Ordering::Relaxed)
    }

    pub fn engine_failures(&self) -> u64 {
        self.engine_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ExecutorMetricsSnapshot {
        ExecutorMetricsSnapshot {
            engine_calls: self.engine_calls(),
            engine_failures: self.engine_failures(),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            late_hits: self.late_hits.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutorMetricsSnapshot {
    pub engine_calls: u64,
    pub engine_failures: u64,
    pub coalesced: u64,
    pub late_hits: u64,
    pub in_flight: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_gauge() {
        let metrics = ExecutorMetrics::new();
        metrics.start_call();
        metrics.start_call();
        metrics.finish_call();
        metrics.record_engine_call();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.in_flight, 1);
        assert_eq!(snapshot.engine_calls, 1);
    }
}
