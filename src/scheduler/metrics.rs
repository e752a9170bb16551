//! Event-loop observability.
//!
//! Counters and duration aggregates owned exclusively by the scheduler;
//! everyone else sees immutable snapshots. Uses atomic counters so the
//! producer side never takes a lock on the tick path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::info;

/// Aggregate counters for tick and action processing.
#[derive(Debug, Default)]
pub struct EventLoopMetrics {
    /// Ticks completed since start
    ticks_processed: AtomicU64,
    /// Actions executed since start
    actions_processed: AtomicU64,
    /// Actions that panicked and were isolated
    actions_failed: AtomicU64,
    /// Duration of the most recent tick
    last_tick_micros: AtomicU64,
    /// Longest tick seen since the last reset
    max_tick_micros: AtomicU64,
    /// Duration of the most recent action
    last_action_micros: AtomicU64,
    /// Longest action seen since the last reset
    max_action_micros: AtomicU64,
    // Accumulators behind the moving averages; cleared on reset.
    accum_tick_micros: AtomicU64,
    accum_tick_count: AtomicU64,
    accum_action_micros: AtomicU64,
    accum_action_count: AtomicU64,
}

impl EventLoopMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_tick(&self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        self.ticks_processed.fetch_add(1, Ordering::Relaxed);
        self.last_tick_micros.store(micros, Ordering::Relaxed);
        self.max_tick_micros.fetch_max(micros, Ordering::Relaxed);
        self.accum_tick_micros.fetch_add(micros, Ordering::Relaxed);
        self.accum_tick_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_action(&self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        self.actions_processed.fetch_add(1, Ordering::Relaxed);
        self.last_action_micros.store(micros, Ordering::Relaxed);
        self.max_action_micros.fetch_max(micros, Ordering::Relaxed);
        self.accum_action_micros.fetch_add(micros, Ordering::Relaxed);
        self.accum_action_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.actions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Clear the accumulated-time counters; lifetime totals are kept.
    pub(crate) fn reset_accumulated(&self) {
        self.accum_tick_micros.store(0, Ordering::Relaxed);
        self.accum_tick_count.store(0, Ordering::Relaxed);
        self.accum_action_micros.store(0, Ordering::Relaxed);
        self.accum_action_count.store(0, Ordering::Relaxed);
        self.max_tick_micros.store(0, Ordering::Relaxed);
        self.max_action_micros.store(0, Ordering::Relaxed);
    }

    /// Point-in-time snapshot; queue depths are filled in by the scheduler.
    pub(crate) fn snapshot(&self) -> EventLoopMetricsSnapshot {
        let avg = |total: &AtomicU64, count: &AtomicU64| {
            let count = count.load(Ordering::Relaxed);
            if count == 0 {
                0
            } else {
                total.load(Ordering::Relaxed) / count
            }
        };

        EventLoopMetricsSnapshot {
            ticks_processed: self.ticks_processed.load(Ordering::Relaxed),
            actions_processed: self.actions_processed.load(Ordering::Relaxed),
            actions_failed: self.actions_failed.load(Ordering::Relaxed),
            last_tick_micros: self.last_tick_micros.load(Ordering::Relaxed),
            avg_tick_micros: avg(&self.accum_tick_micros, &self.accum_tick_count),
            max_tick_micros: self.max_tick_micros.load(Ordering::Relaxed),
            last_action_micros: self.last_action_micros.load(Ordering::Relaxed),
            avg_action_micros: avg(&self.accum_action_micros, &self.accum_action_count),
            max_action_micros: self.max_action_micros.load(Ordering::Relaxed),
            queued_high: 0,
            queued_normal: 0,
            queued_low: 0,
            delayed_pending: 0,
        }
    }
}

/// Snapshot of scheduler metrics at a point in time.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventLoopMetricsSnapshot {
    pub ticks_processed: u64,
    pub actions_processed: u64,
    pub actions_failed: u64,
    pub last_tick_micros: u64,
    pub avg_tick_micros: u64,
    pub max_tick_micros: u64,
    pub last_action_micros: u64,
    pub avg_action_micros: u64,
    pub max_action_micros: u64,
    /// Ready-set depth per priority at snapshot time.
    pub queued_high: u64,
    pub queued_normal: u64,
    pub queued_low: u64,
    pub delayed_pending: u64,
}

impl EventLoopMetricsSnapshot {
    /// Log the snapshot through tracing.
    pub fn log(&self) {
        info!(
            ticks_processed = self.ticks_processed,
            actions_processed = self.actions_processed,
            actions_failed = self.actions_failed,
            last_tick_micros = self.last_tick_micros,
            avg_tick_micros = self.avg_tick_micros,
            max_tick_micros = self.max_tick_micros,
            last_action_micros = self.last_action_micros,
            avg_action_micros = self.avg_action_micros,
            max_action_micros = self.max_action_micros,
            queued_high = self.queued_high,
            queued_normal = self.queued_normal,
            queued_low = self.queued_low,
            delayed_pending = self.delayed_pending,
            "Event loop metrics snapshot"
        );
    }
}
