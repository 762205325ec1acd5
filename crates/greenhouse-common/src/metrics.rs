//! Dispatcher loop metrics.
//!
//! Counters are sized once at construction so recording never allocates in
//! the steady-state loop.

use std::time::Duration;

/// Loop metrics: iterations, per-subsystem tick counts, backlog clamps, and
/// the sleep the dispatcher requested after each iteration.
#[derive(Debug, Clone)]
pub struct LoopMetrics {
    /// Tick count per subsystem slot.
    ticks: Box<[u64]>,
    /// Completed iterations.
    iterations: u64,
    /// Due times pulled forward by the backlog clamp.
    backlog_clamps: u64,
    /// Minimum requested sleep in milliseconds.
    min_sleep_ms: u64,
    /// Maximum requested sleep in milliseconds.
    max_sleep_ms: u64,
    /// Sum of requested sleeps for mean calculation.
    sum_sleep_ms: u64,
}

impl LoopMetrics {
    /// Create a collector for `subsystems` tick slots.
    #[must_use]
    pub fn new(subsystems: usize) -> Self {
        Self {
            ticks: vec![0u64; subsystems.max(1)].into_boxed_slice(),
            iterations: 0,
            backlog_clamps: 0,
            min_sleep_ms: u64::MAX,
            max_sleep_ms: 0,
            sum_sleep_ms: 0,
        }
    }

    /// Record one tick of the subsystem in `slot`.
    ///
    /// Out-of-range slots are ignored.
    pub fn record_tick(&mut self, slot: usize) {
        if let Some(count) = self.ticks.get_mut(slot) {
            *count += 1;
        }
    }

    /// Record a due time that had to be clamped to the backlog window.
    pub fn record_backlog_clamp(&mut self) {
        self.backlog_clamps += 1;
    }

    /// Record a finished iteration and the sleep requested after it.
    pub fn record_iteration(&mut self, sleep: Duration) {
        let ms = u64::try_from(sleep.as_millis()).unwrap_or(u64::MAX);
        self.iterations += 1;
        self.min_sleep_ms = self.min_sleep_ms.min(ms);
        self.max_sleep_ms = self.max_sleep_ms.max(ms);
        self.sum_sleep_ms = self.sum_sleep_ms.saturating_add(ms);
    }

    /// Ticks recorded for `slot`.
    #[must_use]
    pub fn ticks(&self, slot: usize) -> u64 {
        self.ticks.get(slot).copied().unwrap_or(0)
    }

    /// Total ticks across all subsystems.
    #[must_use]
    pub fn total_ticks(&self) -> u64 {
        self.ticks.iter().sum()
    }

    /// Completed iterations.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Number of backlog clamps.
    #[must_use]
    pub fn backlog_clamps(&self) -> u64 {
        self.backlog_clamps
    }

    /// Shortest requested sleep.
    #[must_use]
    pub fn min_sleep(&self) -> Option<Duration> {
        (self.iterations > 0).then(|| Duration::from_millis(self.min_sleep_ms))
    }

    /// Longest requested sleep.
    #[must_use]
    pub fn max_sleep(&self) -> Option<Duration> {
        (self.iterations > 0).then(|| Duration::from_millis(self.max_sleep_ms))
    }

    /// Mean requested sleep.
    #[must_use]
    pub fn mean_sleep(&self) -> Option<Duration> {
        (self.iterations > 0).then(|| Duration::from_millis(self.sum_sleep_ms / self.iterations))
    }

    /// Get a snapshot of current metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            iterations: self.iterations,
            total_ticks: self.total_ticks(),
            backlog_clamps: self.backlog_clamps,
            min_sleep_ms: (self.iterations > 0).then_some(self.min_sleep_ms),
            max_sleep_ms: (self.iterations > 0).then_some(self.max_sleep_ms),
            mean_sleep_ms: (self.iterations > 0).then(|| self.sum_sleep_ms / self.iterations),
        }
    }
}

/// Immutable snapshot of metrics for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Completed iterations.
    pub iterations: u64,
    /// Ticks across all subsystems.
    pub total_ticks: u64,
    /// Backlog clamps.
    pub backlog_clamps: u64,
    /// Shortest requested sleep in milliseconds.
    pub min_sleep_ms: Option<u64>,
    /// Longest requested sleep in milliseconds.
    pub max_sleep_ms: Option<u64>,
    /// Mean requested sleep in milliseconds.
    pub mean_sleep_ms: Option<u64>,
}
