//! Tank pressure sampling.
//!
//! A changed reading bumps the packet version. A steady reading still bumps
//! it once the version has been idle for [`REFRESH_READS`] reads, so the
//! telemetry session keeps publishing (and feeding the watchdog) on a healthy
//! link with a constant sensor.

use crate::peripherals::PressureSensor;
use crate::telemetry::TelemetryPacket;
use std::time::Duration;
use tracing::{debug, trace};

// Off the round periods so sensor reads drift relative to the other ticks.
const SENSOR_TICK: Duration = Duration::from_millis(517);

/// Reads without any version movement before a steady reading is re-reported.
///
/// About one publish interval of sensor ticks.
pub const REFRESH_READS: u32 = 20;

/// Pressure sampling subsystem.
#[derive(Debug, Default)]
pub struct PressureSampler {
    reads: u64,
    changes: u64,
    refreshes: u64,
    idle_reads: u32,
    seen_version: u64,
}

impl PressureSampler {
    /// Create a sampler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sensor tick: read the filtered pressure into the packet.
    pub fn tick(&mut self, sensor: &mut dyn PressureSensor, packet: &mut TelemetryPacket) -> Duration {
        let pressure = sensor.read_filtered();
        let first = self.reads == 0;
        self.reads += 1;
        if packet.version() != self.seen_version {
            self.idle_reads = 0;
        }

        if packet.set_tank_pressure(pressure) {
            self.changes += 1;
            self.idle_reads = 0;
            debug!(pressure, version = packet.version(), "Tank pressure changed");
        } else if first || self.idle_reads + 1 >= REFRESH_READS {
            packet.bump();
            self.refreshes += 1;
            self.idle_reads = 0;
            debug!(pressure, version = packet.version(), "Tank pressure re-reported");
        } else {
            self.idle_reads += 1;
            trace!(pressure, "Tank pressure unchanged");
        }
        self.seen_version = packet.version();
        SENSOR_TICK
    }

    /// Total reads.
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads
    }

    /// Reads that changed the reported value.
    #[must_use]
    pub fn changes(&self) -> u64 {
        self.changes
    }

    /// Steady reads re-reported to keep the packet moving.
    #[must_use]
    pub fn refreshes(&self) -> u64 {
        self.refreshes
    }
}
