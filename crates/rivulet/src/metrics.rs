use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::info;

/// Scheduler counters
///
/// Written by the owner loop and read from anywhere, so every counter is atomic.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// Fetches handed to the transport, retries included
    pub dispatched: AtomicU64,
    /// Dispatches that had to wait out a rate-limit delay
    pub rate_delayed: AtomicU64,
    /// Sum of rate-limit delays in milliseconds
    pub rate_delay_sum_ms: AtomicU64,
    /// Chunks fetched successfully
    pub completed: AtomicU64,
    /// Bytes delivered by completed chunks
    pub completed_bytes: AtomicU64,
    /// Failed attempts that were retried
    pub retried: AtomicU64,
    /// Attempts that hit the per-request timeout
    pub timed_out: AtomicU64,
    /// Requests dropped after exhausting their retries
    pub exceeded_retries: AtomicU64,
    /// Outcomes that arrived after cancellation or for unknown requests
    pub stale_discarded: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dispatch(&self, delay_ms: u64) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        if delay_ms > 0 {
            self.rate_delayed.fetch_add(1, Ordering::Relaxed);
            self.rate_delay_sum_ms.fetch_add(delay_ms, Ordering::Relaxed);
        }
    }

    pub fn record_completed(&self, bytes: u64) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.completed_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exceeded_retries(&self) {
        self.exceeded_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_discarded(&self) {
        self.stale_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Share of finished requests that completed, 0.0 to 1.0
    ///
    /// Returns None until at least one request has finished
    pub fn success_rate(&self) -> Option<f64> {
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.exceeded_retries.load(Ordering::Relaxed);
        let total = completed + failed;
        if total == 0 {
            return None;
        }
        Some(completed as f64 / total as f64)
    }

    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        let success_rate = self
            .success_rate()
            .map(|r| format!("{:.1}%", r * 100.0))
            .unwrap_or_else(|| "N/A".to_string());

        info!(
            dispatched = snapshot.dispatched,
            rate_delayed = snapshot.rate_delayed,
            rate_delay_sum_ms = snapshot.rate_delay_sum_ms,
            completed = snapshot.completed,
            completed_bytes = snapshot.completed_bytes,
            retried = snapshot.retried,
            timed_out = snapshot.timed_out,
            exceeded_retries = snapshot.exceeded_retries,
            stale_discarded = snapshot.stale_discarded,
            success_rate = %success_rate,
            "Chunk scheduler summary"
        );
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            rate_delayed: self.rate_delayed.load(Ordering::Relaxed),
            rate_delay_sum_ms: self.rate_delay_sum_ms.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            completed_bytes: self.completed_bytes.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            exceeded_retries: self.exceeded_retries.load(Ordering::Relaxed),
            stale_discarded: self.stale_discarded.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`SchedulerMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub dispatched: u64,
    pub rate_delayed: u64,
    pub rate_delay_sum_ms: u64,
    pub completed: u64,
    pub completed_bytes: u64,
    pub retried: u64,
    pub timed_out: u64,
    pub exceeded_retries: u64,
    pub stale_discarded: u64,
}
