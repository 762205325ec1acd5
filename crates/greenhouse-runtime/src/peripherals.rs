//! Peripheral seams between the control loop and the board.
//!
//! Every trait here is implemented by a driver layer outside the core
//! (`greenhouse-board` provides simulated and host implementations). Calls
//! must return promptly: a tick that blocks starves every other subsystem.

use greenhouse_common::config::{MqttConfig, NtpConfig, WifiConfig};
use greenhouse_common::error::ControllerResult;
use std::time::Duration;

/// Free-running hardware microsecond counter.
///
/// Wraps around at `u32::MAX` (roughly every 71 minutes).
pub trait MicrosCounter {
    /// Current counter value.
    fn micros(&self) -> u32;
}

/// Local real-time clock.
pub trait RealTimeClock {
    /// Local time in microseconds since the Unix epoch.
    fn epoch_micros(&self) -> i64;

    /// Local time in milliseconds since the Unix epoch.
    fn epoch_millis(&self) -> i64 {
        self.epoch_micros().div_euclid(1000)
    }
}

/// Network association (Wi-Fi station or equivalent).
pub trait NetworkInterface {
    /// Returns true if the interface is associated and has an address.
    fn is_associated(&mut self) -> bool;

    /// Issue a non-blocking (re)association request.
    fn begin_association(&mut self, wifi: &WifiConfig);

    /// Drop any current or pending association.
    fn disconnect(&mut self);
}

/// Network time source session.
pub trait TimeSource {
    /// Open a session with the configured server.
    ///
    /// Must not block on the network.
    ///
    /// # Errors
    ///
    /// Returns an error if the session could not be opened; the caller
    /// retries on a later tick.
    fn begin(&mut self, ntp: &NtpConfig) -> ControllerResult<()>;

    /// Close the session.
    fn stop(&mut self);

    /// Current network time in microseconds since the epoch, if known.
    ///
    /// Sources may return the same cached value between their own refresh
    /// cycles.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is no longer usable and must be
    /// reopened.
    fn poll(&mut self) -> ControllerResult<Option<i64>>;
}

/// Publish/subscribe telemetry transport.
pub trait TelemetryTransport {
    /// Issue a connect request to the configured broker.
    fn connect(&mut self, mqtt: &MqttConfig);

    /// Transport-level connected status.
    fn is_connected(&mut self) -> bool;

    /// Publish one payload, returning true if the transport accepted it.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> bool;

    /// Close the session.
    fn disconnect(&mut self);
}

/// Filtered tank pressure sensor.
pub trait PressureSensor {
    /// Latest filtered reading in raw sensor units.
    fn read_filtered(&mut self) -> i32;
}

/// Irrigation valve (pump) output.
pub trait Valve {
    /// Energize or release the valve.
    fn set_active(&mut self, active: bool);
}

/// Liveness watchdog collaborator.
pub trait WatchdogHandle {
    /// Start the countdown. Called once at startup.
    ///
    /// # Errors
    ///
    /// Returns an error if the watchdog cannot be started.
    fn arm(&mut self, timeout: Duration) -> ControllerResult<()>;

    /// Reset the countdown.
    fn keep_alive(&mut self);
}

/// All peripherals the control loop drives, allocated once at boot.
pub struct Peripherals {
    /// Wrapping microsecond counter.
    pub counter: Box<dyn MicrosCounter>,
    /// Local real-time clock.
    pub rtc: Box<dyn RealTimeClock>,
    /// Network interface.
    pub network: Box<dyn NetworkInterface>,
    /// Network time source.
    pub time_source: Box<dyn TimeSource>,
    /// Telemetry transport.
    pub transport: Box<dyn TelemetryTransport>,
    /// Tank pressure sensor.
    pub sensor: Box<dyn PressureSensor>,
    /// Valve output.
    pub valve: Box<dyn Valve>,
    /// Liveness watchdog.
    pub watchdog: Box<dyn WatchdogHandle>,
}

impl std::fmt::Debug for Peripherals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peripherals").finish_non_exhaustive()
    }
}
