use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// In-process telemetry for the async job queue.
///
/// One instance is constructed at startup and injected into every component
/// that emits events, so tests can build isolated registries. Counters are
/// purely additive and never reset during the process lifetime.
#[derive(Debug, Default)]
pub struct JobTelemetry {
    claimed: AtomicU64,
    retry_scheduled: AtomicU64,
    stale_recovered: AtomicU64,
    cleanup_deleted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    total_duration_ms: AtomicU64,
    max_duration_ms: AtomicU64,
    terminal_by_status: Mutex<BTreeMap<String, u64>>,
}

impl JobTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A worker claimed a job row.
    pub fn record_claim(&self) {
        self.claimed.fetch_add(1, Ordering::Relaxed);
    }

    /// A failure was rescheduled for retry.
    pub fn record_retry_scheduled(&self) {
        self.retry_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// A stale running job was recovered back to a runnable/terminal state.
    pub fn record_stale_recovered(&self) {
        self.stale_recovered.fetch_add(1, Ordering::Relaxed);
    }

    /// Cleanup deleted old terminal rows.
    pub fn record_cleanup_deleted(&self, count: u64) {
        if count > 0 {
            self.cleanup_deleted.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// A job reached a terminal status after `duration_ms` of lifetime.
    pub fn record_terminal(&self, terminal_status: &str, duration_ms: u64) {
        {
            let mut by_status = self
                .terminal_by_status
                .lock()
                .expect("telemetry mutex poisoned");
            *by_status.entry(terminal_status.to_string()).or_insert(0) += 1;
        }

        match terminal_status {
            "completed" => {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            "failed" => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        self.total_duration_ms.fetch_add(duration_ms, Ordering::Relaxed);
        self.max_duration_ms.fetch_max(duration_ms, Ordering::Relaxed);
    }

    /// Immutable snapshot for the admin endpoint.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let terminal_by_status = self
            .terminal_by_status
            .lock()
            .expect("telemetry mutex poisoned")
            .clone();

        let terminal_total: u64 = terminal_by_status.values().sum();
        let total_duration_ms = self.total_duration_ms.load(Ordering::Relaxed);
        let avg_terminal_duration_ms = if terminal_total == 0 {
            0.0
        } else {
            total_duration_ms as f64 / terminal_total as f64
        };

        TelemetrySnapshot {
            at: Utc::now(),
            claimed: self.claimed.load(Ordering::Relaxed),
            retry_scheduled: self.retry_scheduled.load(Ordering::Relaxed),
            stale_recovered: self.stale_recovered.load(Ordering::Relaxed),
            cleanup_deleted: self.cleanup_deleted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            avg_terminal_duration_ms,
            max_terminal_duration_ms: self.max_duration_ms.load(Ordering::Relaxed),
            terminal_by_status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub at: DateTime<Utc>,
    pub claimed: u64,
    pub retry_scheduled: u64,
    pub stale_recovered: u64,
    pub cleanup_deleted: u64,
    pub completed: u64,
    pub failed: u64,
    pub avg_terminal_duration_ms: f64,
    pub max_terminal_duration_ms: u64,
    pub terminal_by_status: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let t = JobTelemetry::new();
        t.record_claim();
        t.record_claim();
        t.record_retry_scheduled();
        t.record_stale_recovered();
        t.record_cleanup_deleted(5);
        t.record_cleanup_deleted(0);

        let snap = t.snapshot();
        assert_eq!(snap.claimed, 2);
        assert_eq!(snap.retry_scheduled, 1);
        assert_eq!(snap.stale_recovered, 1);
        assert_eq!(snap.cleanup_deleted, 5);
    }

    #[test]
    fn terminal_durations_track_sum_and_max() {
        let t = JobTelemetry::new();
        t.record_terminal("completed", 100);
        t.record_terminal("completed", 300);
        t.record_terminal("failed", 200);

        let snap = t.snapshot();
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.max_terminal_duration_ms, 300);
        assert!((snap.avg_terminal_duration_ms - 200.0).abs() < f64::EPSILON);
        assert_eq!(snap.terminal_by_status.get("completed"), Some(&2));
        assert_eq!(snap.terminal_by_status.get("failed"), Some(&1));
    }

    #[test]
    fn empty_registry_reports_zero_average() {
        let snap = JobTelemetry::new().snapshot();
        assert_eq!(snap.avg_terminal_duration_ms, 0.0);
        assert_eq!(snap.max_terminal_duration_ms, 0);
        assert!(snap.terminal_by_status.is_empty());
    }
}
