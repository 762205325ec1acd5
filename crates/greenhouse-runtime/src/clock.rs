//! Clock fusion: local RTC, wrapping microsecond counter and network time.
//!
//! Best time is `rtc + offset`. The offset snaps straight to the network
//! offset for the first few corrections and is then slew-limited to a
//! fraction of the local time elapsed since the previous correction, so the
//! clock never jumps once it is settled.

use crate::peripherals::{MicrosCounter, RealTimeClock};
use crate::telemetry::TelemetryPacket;
use greenhouse_common::time::{format_epoch_micros, MICROS_PER_SECOND};
use std::time::Duration;
use tracing::{debug, info};

/// Corrections applied without slew limiting after the first sample.
pub const BOOTSTRAP_CORRECTIONS: u32 = 4;

/// Maximum offset correction in microseconds per second of elapsed local
/// time (10%).
pub const MAX_SLEW_US_PER_SECOND: i64 = 100_000;

const CLOCK_TICK: Duration = Duration::from_secs(5);
const CLOCK_IDLE: Duration = Duration::from_secs(1);

/// One accepted network time sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkSample {
    /// Network time in microseconds since the epoch.
    pub network_time_us: i64,
    /// Local RTC reading taken when the sample was accepted.
    pub local_time_us: i64,
}

impl NetworkSample {
    /// Offset that would make the local clock read network time.
    #[must_use]
    pub fn offset_us(&self) -> i64 {
        self.network_time_us - self.local_time_us
    }
}

/// Fused system time.
///
/// Between clock ticks the best time is extrapolated from the counter
/// snapshot taken at the last tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SysTime {
    /// Best estimate of epoch microseconds at `counter_snapshot`.
    pub best_time_us: i64,
    /// Counter value when `best_time_us` was computed.
    pub counter_snapshot: u32,
    /// Most recent network sample, if any.
    pub last_sample: Option<NetworkSample>,
}

impl SysTime {
    /// Best time for a counter reading taken after the snapshot.
    ///
    /// Correct across a single counter wrap.
    #[must_use]
    pub fn best_micros(&self, counter_now: u32) -> i64 {
        i64::from(counter_now.wrapping_sub(self.counter_snapshot)) + self.best_time_us
    }

    /// Network time of the last sample, or 0.
    #[must_use]
    pub fn network_time_us(&self) -> i64 {
        self.last_sample.map_or(0, |s| s.network_time_us)
    }
}

/// Offset engine fusing RTC and network time.
#[derive(Debug, Clone)]
pub struct ClockFusion {
    sys_time: SysTime,
    offset_us: i64,
    /// Offset at the end of bootstrap; `None` until the first correction.
    initial_offset_us: Option<i64>,
    bootstrap_remaining: u32,
    /// Local time of the previous correction.
    last_correction_us: i64,
}

impl Default for ClockFusion {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockFusion {
    /// Create an engine with zero offset and no samples.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sys_time: SysTime::default(),
            offset_us: 0,
            initial_offset_us: None,
            bootstrap_remaining: BOOTSTRAP_CORRECTIONS,
            last_correction_us: 0,
        }
    }

    /// Record a network time sample taken at local time `local_time_us`.
    ///
    /// Returns false if the network time equals the stored sample.
    pub fn accept_sample(&mut self, network_time_us: i64, local_time_us: i64) -> bool {
        if let Some(previous) = self.sys_time.last_sample {
            if previous.network_time_us == network_time_us {
                return false;
            }
        }
        self.sys_time.last_sample = Some(NetworkSample {
            network_time_us,
            local_time_us,
        });
        true
    }

    /// Clock tick.
    ///
    /// Refreshes best time and the counter snapshot, then moves the offset
    /// toward the latest network sample. Returns the re-poll delay.
    pub fn tick(
        &mut self,
        time_source_ready: bool,
        rtc: &dyn RealTimeClock,
        counter: &dyn MicrosCounter,
        packet: &mut TelemetryPacket,
    ) -> Duration {
        self.refresh(rtc.epoch_micros(), counter.micros());

        if !time_source_ready {
            return CLOCK_IDLE;
        }
        let Some(sample) = self.sys_time.last_sample else {
            return CLOCK_IDLE;
        };

        self.apply_correction(sample.offset_us(), rtc.epoch_micros());
        self.refresh(rtc.epoch_micros(), counter.micros());
        packet.rtc_offset_post_init = self.offset_since_bootstrap();

        CLOCK_TICK
    }

    /// Move the offset toward `desired_offset_us`.
    ///
    /// During bootstrap the offset snaps. Afterwards the step is limited to
    /// `MAX_SLEW_US_PER_SECOND` per second of local time since the previous
    /// correction.
    pub fn apply_correction(&mut self, desired_offset_us: i64, local_now_us: i64) {
        if self.initial_offset_us.is_none() || self.bootstrap_remaining > 0 {
            self.offset_us = desired_offset_us;
            self.initial_offset_us = Some(desired_offset_us);
            self.bootstrap_remaining = self.bootstrap_remaining.saturating_sub(1);
            info!(
                offset_us = desired_offset_us,
                remaining = self.bootstrap_remaining,
                "Clock offset set"
            );
        } else {
            let elapsed_us = (local_now_us - self.last_correction_us).max(0);
            let max_step = elapsed_us.saturating_mul(MAX_SLEW_US_PER_SECOND) / MICROS_PER_SECOND;
            let applied = desired_offset_us.clamp(
                self.offset_us.saturating_sub(max_step),
                self.offset_us.saturating_add(max_step),
            );
            debug!(
                desired_us = desired_offset_us,
                applied_us = applied,
                max_step_us = max_step,
                "Clock offset slewed"
            );
            self.offset_us = applied;
        }
        self.last_correction_us = local_now_us;
    }

    fn refresh(&mut self, rtc_us: i64, counter: u32) {
        self.sys_time.best_time_us = rtc_us + self.offset_us;
        self.sys_time.counter_snapshot = counter;
    }

    /// Fused time state.
    #[must_use]
    pub fn sys_time(&self) -> &SysTime {
        &self.sys_time
    }

    /// Best time for a counter reading.
    #[must_use]
    pub fn best_micros(&self, counter_now: u32) -> i64 {
        self.sys_time.best_micros(counter_now)
    }

    /// Current offset applied to the RTC.
    #[must_use]
    pub fn offset_us(&self) -> i64 {
        self.offset_us
    }

    /// Drift corrected since bootstrap finished; 0 before the first
    /// correction.
    #[must_use]
    pub fn offset_since_bootstrap(&self) -> i64 {
        self.initial_offset_us.map_or(0, |initial| self.offset_us - initial)
    }

    /// Returns true once bootstrap corrections are used up.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.bootstrap_remaining == 0
    }

    /// Human-readable best time.
    #[must_use]
    pub fn describe(&self, counter_now: u32) -> String {
        format_epoch_micros(self.best_micros(counter_now))
    }
}
