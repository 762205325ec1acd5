//! Periodic status report.

use crate::clock::ClockFusion;
use crate::peripherals::MicrosCounter;
use crate::sensor::PressureSampler;
use crate::telemetry::TelemetryPacket;
use greenhouse_common::metrics::MetricsSnapshot;
use greenhouse_common::state::StatusView;
use std::time::Duration;
use tracing::info;

const REPORT_TICK: Duration = Duration::from_secs(5);

/// Status report subsystem.
#[derive(Debug, Default)]
pub struct StatusReporter {
    reports: u64,
}

impl StatusReporter {
    /// Create a reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report tick: log fused time, link status and loop counters.
    pub fn tick(
        &mut self,
        clock: &ClockFusion,
        counter: &dyn MicrosCounter,
        packet: &TelemetryPacket,
        sampler: &PressureSampler,
        status: StatusView,
        metrics: &MetricsSnapshot,
    ) -> Duration {
        self.reports += 1;
        let sys = clock.sys_time();
        let counter_now = counter.micros();
        info!(
            best_time = %clock.describe(counter_now),
            best_time_us = sys.best_time_us,
            counter_snapshot = sys.counter_snapshot,
            network_time_us = sys.network_time_us(),
            offset_us = clock.offset_us(),
            network = status.network_ready,
            time_source = status.time_source_ready,
            telemetry = status.telemetry_ready,
            pumping = status.pumping,
            version = packet.version(),
            tank_pressure = packet.tank_pressure(),
            sec_to_next_pump = packet.sec_to_next_pump,
            sensor_reads = sampler.reads(),
            sensor_changes = sampler.changes(),
            sensor_refreshes = sampler.refreshes(),
            report = self.reports,
            iterations = metrics.iterations,
            backlog_clamps = metrics.backlog_clamps,
            "Status"
        );
        REPORT_TICK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter;

    impl MicrosCounter for Counter {
        fn micros(&self) -> u32 {
            12
        }
    }

    #[test]
    fn test_report_period() {
        let mut reporter = StatusReporter::new();
        let delay = reporter.tick(
            &ClockFusion::new(),
            &Counter,
            &TelemetryPacket::default(),
            &PressureSampler::new(),
            StatusView::default(),
            &MetricsSnapshot::default(),
        );
        assert_eq!(delay, Duration::from_secs(5));
        assert_eq!(reporter.reports, 1);
    }
}
