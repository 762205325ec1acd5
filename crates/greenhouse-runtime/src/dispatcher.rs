//! Cooperative due-time dispatcher.
//!
//! Every subsystem keeps its own next-due timestamp. One iteration walks the
//! subsystems in a fixed order:
//! 1. Clamp the due time to the backlog window
//! 2. Run the tick if it is strictly overdue and advance the due time
//! 3. Track the earliest due time across all subsystems
//!
//! The caller then suspends for the time until the earliest due time,
//! bounded by the configured minimum and maximum sleep.

use greenhouse_common::config::DispatcherConfig;
use greenhouse_common::metrics::LoopMetrics;
use std::fmt;
use std::time::Duration;
use tracing::{debug, trace};

/// Subsystems driven by the dispatcher, in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskId {
    /// Network association link.
    Network,
    /// Network time source link.
    TimeSource,
    /// Clock fusion engine.
    Clock,
    /// Tank pressure sampling.
    Sensor,
    /// Pump schedule and valve output.
    Valve,
    /// Telemetry session.
    Telemetry,
    /// Periodic status report.
    Report,
}

impl TaskId {
    /// Number of subsystems.
    pub const COUNT: usize = 7;

    /// All subsystems in dispatch order.
    pub const ALL: [TaskId; Self::COUNT] = [
        Self::Network,
        Self::TimeSource,
        Self::Clock,
        Self::Sensor,
        Self::Valve,
        Self::Telemetry,
        Self::Report,
    ];

    /// Slot index of this subsystem.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::TimeSource => "time-source",
            Self::Clock => "clock",
            Self::Sensor => "sensor",
            Self::Valve => "valve",
            Self::Telemetry => "telemetry",
            Self::Report => "report",
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Due-time dispatcher.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    /// Next-due timestamp per subsystem, in milliseconds.
    next_ms: [i64; TaskId::COUNT],
    /// Earliest due timestamp seen during the current iteration.
    global_next_ms: i64,
    min_sleep_ms: i64,
    max_sleep_ms: i64,
    max_backlog_ms: i64,
    metrics: LoopMetrics,
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

impl Dispatcher {
    /// Create a dispatcher with every subsystem due immediately.
    #[must_use]
    pub fn new(config: &DispatcherConfig) -> Self {
        let min_sleep_ms = duration_ms(config.min_sleep);
        Self {
            next_ms: [0; TaskId::COUNT],
            global_next_ms: 0,
            min_sleep_ms,
            max_sleep_ms: duration_ms(config.max_sleep).max(min_sleep_ms),
            max_backlog_ms: duration_ms(config.max_backlog),
            metrics: LoopMetrics::new(TaskId::COUNT),
        }
    }

    /// Start an iteration at `now_ms`.
    pub fn begin_iteration(&mut self, now_ms: i64) {
        self.global_next_ms = now_ms.saturating_add(self.max_sleep_ms);
    }

    /// Dispatch one subsystem.
    ///
    /// The due time is first pulled forward to at most `max_backlog` behind
    /// `now_ms`, so a stall never causes a burst of catch-up ticks. If the
    /// subsystem is then strictly overdue, `tick` runs once and its returned
    /// delay is added to the (clamped) due time.
    ///
    /// Returns true if the tick ran.
    pub fn dispatch<F>(&mut self, task: TaskId, now_ms: i64, tick: F) -> bool
    where
        F: FnOnce() -> Duration,
    {
        let slot = task.index();
        let floor = now_ms.saturating_sub(self.max_backlog_ms);
        if self.next_ms[slot] < floor {
            self.next_ms[slot] = floor;
            self.metrics.record_backlog_clamp();
        }

        let ran = now_ms > self.next_ms[slot];
        if ran {
            let delay = tick();
            self.next_ms[slot] = self.next_ms[slot].saturating_add(duration_ms(delay));
            self.metrics.record_tick(slot);
            trace!(
                task = task.name(),
                delay_ms = delay.as_millis(),
                next_ms = self.next_ms[slot],
                "Tick"
            );
        }

        self.global_next_ms = self.global_next_ms.min(self.next_ms[slot]);
        ran
    }

    /// Finish the iteration and return how long to suspend.
    ///
    /// `now_ms` should be re-read after the ticks ran.
    pub fn finish_iteration(&mut self, now_ms: i64) -> Duration {
        let sleep_ms = self
            .global_next_ms
            .saturating_sub(now_ms)
            .clamp(self.min_sleep_ms, self.max_sleep_ms);
        let sleep = Duration::from_millis(u64::try_from(sleep_ms).unwrap_or(0));
        self.metrics.record_iteration(sleep);

        if self.metrics.iterations() % 1000 == 0 {
            debug!(
                iterations = self.metrics.iterations(),
                total_ticks = self.metrics.total_ticks(),
                backlog_clamps = self.metrics.backlog_clamps(),
                "Dispatcher progress"
            );
        }

        sleep
    }

    /// Next-due timestamp of a subsystem.
    #[must_use]
    pub fn next_due(&self, task: TaskId) -> i64 {
        self.next_ms[task.index()]
    }

    /// Earliest due timestamp seen in the current iteration.
    #[must_use]
    pub fn global_next(&self) -> i64 {
        self.global_next_ms
    }

    /// Loop metrics.
    #[must_use]
    pub fn metrics(&self) -> &LoopMetrics {
        &self.metrics
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(&DispatcherConfig::default())
    }
}
