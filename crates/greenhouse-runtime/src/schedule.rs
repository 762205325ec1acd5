//! Pump schedule evaluation and valve control.

use crate::clock::ClockFusion;
use crate::peripherals::{MicrosCounter, Valve};
use crate::telemetry::TelemetryPacket;
use greenhouse_common::config::Schedule;
use greenhouse_common::time::{
    time_of_day_from_epoch_micros, ScheduleInterval, SecondOfDay, SECONDS_PER_DAY,
};
use std::time::Duration;
use tracing::{debug, info};

/// Reported seconds-to-next value when no interval is configured.
pub const NO_NEXT_PUMP: i32 = 100_000;

const VALVE_TICK: Duration = Duration::from_millis(500);

/// Result of evaluating the schedule at one time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    /// Some interval contains the time.
    pub active: bool,
    /// Seconds until the nearest interval start, 0 while active, `None` for
    /// an empty schedule.
    pub seconds_to_next: Option<u32>,
}

/// Returns true if `interval` contains `time_of_day`.
///
/// The start is inclusive and the end exclusive. Intervals whose start is
/// after their end wrap past midnight; zero-length intervals never match.
#[must_use]
pub fn interval_contains(interval: ScheduleInterval, time_of_day: u32) -> bool {
    let lo = interval.start_sec.min(interval.end_sec);
    let hi = interval.start_sec.max(interval.end_sec);
    let within = lo <= time_of_day && time_of_day < hi;
    if interval.start_sec <= interval.end_sec {
        within
    } else {
        !within
    }
}

/// Evaluate the schedule at `time_of_day` (seconds into the UTC day).
#[must_use]
pub fn evaluate(intervals: &[ScheduleInterval], time_of_day: u32) -> Evaluation {
    let active = intervals.iter().any(|&i| interval_contains(i, time_of_day));
    let nearest_start = intervals
        .iter()
        .map(|i| (i.start_sec + SECONDS_PER_DAY - time_of_day % SECONDS_PER_DAY) % SECONDS_PER_DAY)
        .min();
    Evaluation {
        active,
        seconds_to_next: nearest_start.map(|d| if active { 0 } else { d }),
    }
}

/// Valve control subsystem.
#[derive(Debug, Default)]
pub struct ValveControl {
    pumping: bool,
    last: Option<Evaluation>,
}

impl ValveControl {
    /// Create a controller with the valve considered off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Valve tick: evaluate the schedule at best time and drive the valve.
    ///
    /// The valve output is written on every tick. Switching the valve bumps
    /// the packet version.
    pub fn tick(
        &mut self,
        schedule: &Schedule,
        clock: &ClockFusion,
        counter: &dyn MicrosCounter,
        valve: &mut dyn Valve,
        packet: &mut TelemetryPacket,
    ) -> Duration {
        let time_of_day = time_of_day_from_epoch_micros(clock.best_micros(counter.micros()));
        let evaluation = evaluate(schedule.intervals(), time_of_day);

        valve.set_active(evaluation.active);
        if evaluation.active != self.pumping {
            info!(
                pumping = evaluation.active,
                utc = %SecondOfDay(time_of_day),
                "Valve switched"
            );
            self.pumping = evaluation.active;
            packet.bump();
        }

        packet.sec_to_next_pump = evaluation
            .seconds_to_next
            .map_or(NO_NEXT_PUMP, |s| i32::try_from(s).unwrap_or(NO_NEXT_PUMP));
        if self.last != Some(evaluation) {
            debug!(
                active = evaluation.active,
                seconds_to_next = ?evaluation.seconds_to_next,
                "Schedule evaluated"
            );
        }
        self.last = Some(evaluation);
        VALVE_TICK
    }

    /// Force the valve off.
    pub fn shutdown(&mut self, valve: &mut dyn Valve) {
        valve.set_active(false);
        self.pumping = false;
    }

    /// Returns true while the valve is energized.
    #[must_use]
    pub fn is_pumping(&self) -> bool {
        self.pumping
    }

    /// Most recent evaluation.
    #[must_use]
    pub fn last_evaluation(&self) -> Option<Evaluation> {
        self.last
    }
}
