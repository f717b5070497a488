//! Watcher metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Watcher counters.
#[derive(Debug, Default)]
pub struct WatcherMetrics {
    /// Poll cycles run.
    pub cycles: AtomicU64,

    /// Cycles that found no pending task.
    pub idle_polls: AtomicU64,

    /// Tasks whose handler completed successfully.
    pub completed: AtomicU64,

    /// Handler invocations that returned an error, panicked or timed out.
    pub handler_failures: AtomicU64,

    /// Tasks redelivered after a failure.
    pub redelivered: AtomicU64,

    /// Tasks moved to the dead letter status.
    pub dead_lettered: AtomicU64,

    /// Tasks dropped for an unknown tag or malformed payload.
    pub dropped: AtomicU64,

    /// Storage errors observed by the loop.
    pub storage_errors: AtomicU64,

    /// Time spent inside handlers (microseconds).
    pub handler_time_us: AtomicU64,

    start_time: parking_lot::RwLock<Option<Instant>>,
}

impl WatcherMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of the watcher loop.
    pub fn mark_start(&self) {
        *self.start_time.write() = Some(Instant::now());
    }

    /// Uptime in seconds, zero before the loop started.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .read()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_time(&self, duration_us: u64) {
        self.handler_time_us.fetch_add(duration_us, Ordering::Relaxed);
    }

    /// Snapshot of the current counters.
    pub fn snapshot(&self) -> WatcherMetricsSnapshot {
        WatcherMetricsSnapshot {
            timestamp: Utc::now(),
            uptime_secs: self.uptime_secs(),
            cycles: self.cycles.load(Ordering::Relaxed),
            idle_polls: self.idle_polls.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            handler_time_us: self.handler_time_us.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`WatcherMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct WatcherMetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    pub cycles: u64,
    pub idle_polls: u64,
    pub completed: u64,
    pub handler_failures: u64,
    pub redelivered: u64,
    pub dead_lettered: u64,
    pub dropped: u64,
    pub storage_errors: u64,
    pub handler_time_us: u64,
}

impl WatcherMetricsSnapshot {
    /// Mean handler time in milliseconds over all handled tasks.
    pub fn avg_handler_time_ms(&self) -> f64 {
        let handled = self.completed + self.handler_failures;
        if handled == 0 {
            0.0
        } else {
            self.handler_time_us as f64 / handled as f64 / 1000.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = WatcherMetrics::new();
        assert_eq!(metrics.cycles.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.uptime_secs(), 0);
    }

    #[test]
    fn test_snapshot() {
        let metrics = WatcherMetrics::new();
        WatcherMetrics::incr(&metrics.cycles);
        WatcherMetrics::incr(&metrics.cycles);
        WatcherMetrics::incr(&metrics.completed);
        metrics.record_handler_time(3000);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cycles, 2);
        assert_eq!(snapshot.completed, 1);
        assert!((snapshot.avg_handler_time_ms() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_avg_handler_time_without_tasks() {
        let snapshot = WatcherMetrics::new().snapshot();
        assert_eq!(snapshot.avg_handler_time_ms(), 0.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = WatcherMetrics::new().snapshot();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["dead_lettered"], 0);
    }
}
