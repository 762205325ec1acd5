//! Telemetry packet and uplink session.
//!
//! The packet is a single shared record. Writers that change reported state
//! bump its version, and the sensor tick re-reports a steady reading so the
//! version keeps moving. The session publishes whenever the version moved
//! past the last one it sent, and each version is sent at most once.
//!
//! A connect that times out is not retried until the version moves again.

use crate::peripherals::{TelemetryTransport, WatchdogHandle};
use greenhouse_common::config::MqttConfig;
use greenhouse_common::state::SessionState;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Status polls allowed while a connect is pending.
pub const CONNECT_POLLS: u32 = 100;

/// Consecutive publish failures tolerated before the session is dropped.
pub const MAX_PUBLISH_FAILURES: u32 = 10;

const SESSION_IDLE: Duration = Duration::from_secs(1);
const CONNECT_POLL: Duration = Duration::from_millis(500);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const PUBLISH_INTERVAL: Duration = Duration::from_secs(10);
const PUBLISH_CHECK: Duration = Duration::from_millis(100);

/// Versioned telemetry record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryPacket {
    version: u64,
    tank_pressure: i32,
    /// Seconds until the next pump interval starts; 0 while pumping.
    ///
    /// Informational: writing it does not bump the version.
    pub sec_to_next_pump: i32,
    /// Clock drift corrected since bootstrap, in microseconds.
    ///
    /// Informational: writing it does not bump the version.
    pub rtc_offset_post_init: i64,
}

impl TelemetryPacket {
    /// Current version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Mark the packet as changed.
    pub fn bump(&mut self) {
        self.version += 1;
    }

    /// Last filtered tank pressure.
    #[must_use]
    pub fn tank_pressure(&self) -> i32 {
        self.tank_pressure
    }

    /// Store a pressure reading, bumping the version if it changed.
    ///
    /// Returns true if the reading changed.
    pub fn set_tank_pressure(&mut self, pressure: i32) -> bool {
        if self.tank_pressure == pressure {
            return false;
        }
        self.tank_pressure = pressure;
        self.bump();
        true
    }

    /// Wire form of the current contents.
    #[must_use]
    pub fn payload(&self) -> TelemetryPayload {
        TelemetryPayload {
            data: TelemetryData {
                ping_count: self.version,
                tank_pressure: self.tank_pressure,
                sec_to_next_pump: self.sec_to_next_pump,
                rtc_offset_post_init: self.rtc_offset_post_init,
            },
        }
    }
}

/// Published JSON document: `{"data": {...}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    /// Reported fields.
    pub data: TelemetryData,
}

/// Reported fields, serialized with kebab-case keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TelemetryData {
    /// Packet version.
    pub ping_count: u64,
    /// Filtered tank pressure.
    pub tank_pressure: i32,
    /// Seconds to the next pump interval.
    pub sec_to_next_pump: i32,
    /// Clock drift corrected since bootstrap.
    pub rtc_offset_post_init: i64,
}

/// Telemetry uplink session.
#[derive(Debug)]
pub struct TelemetrySession {
    state: SessionState,
    last_sent_version: u64,
    publish_failures: u32,
    published: u64,
    /// Set when a connect timed out: reconnect only past this version.
    resume_after_version: Option<u64>,
    /// Reused serialization buffer.
    buffer: Vec<u8>,
}

impl Default for TelemetrySession {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySession {
    /// Create a disconnected session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            last_sent_version: 0,
            publish_failures: 0,
            published: 0,
            resume_after_version: None,
            buffer: Vec::with_capacity(256),
        }
    }

    /// Telemetry tick. Returns the re-poll delay.
    pub fn tick(
        &mut self,
        network_ready: bool,
        transport: &mut dyn TelemetryTransport,
        mqtt: &MqttConfig,
        packet: &TelemetryPacket,
        watchdog: &mut dyn WatchdogHandle,
    ) -> Duration {
        if !network_ready {
            if self.state != SessionState::Disconnected {
                info!(state = %self.state, "Telemetry session closed, no network");
                transport.disconnect();
                self.state = SessionState::Disconnected;
            }
            self.resume_after_version = None;
            return SESSION_IDLE;
        }

        match self.state {
            SessionState::Disconnected => {
                if let Some(version) = self.resume_after_version {
                    if packet.version() <= version {
                        return PUBLISH_CHECK;
                    }
                    self.resume_after_version = None;
                }
                info!(broker = %mqtt.broker, port = mqtt.port, "Connecting telemetry session");
                transport.disconnect();
                transport.connect(mqtt);
                self.state = SessionState::Connecting {
                    polls_remaining: CONNECT_POLLS,
                };
                CONNECT_POLL
            }
            SessionState::Connecting { polls_remaining } => {
                if transport.is_connected() {
                    info!("Telemetry session connected");
                    self.state = SessionState::Connected;
                } else {
                    let remaining = polls_remaining.saturating_sub(1);
                    if remaining == 0 {
                        warn!(
                            version = packet.version(),
                            "Telemetry connect timed out, waiting for new data"
                        );
                        self.state = SessionState::Disconnected;
                        self.resume_after_version = Some(packet.version());
                    } else {
                        self.state = SessionState::Connecting {
                            polls_remaining: remaining,
                        };
                    }
                }
                CONNECT_POLL
            }
            SessionState::Connected => {
                if !transport.is_connected() {
                    warn!("Telemetry session lost");
                    self.state = SessionState::Disconnected;
                    return RECONNECT_BACKOFF;
                }
                if packet.version() <= self.last_sent_version {
                    return PUBLISH_CHECK;
                }
                self.publish(transport, mqtt, packet, watchdog)
            }
        }
    }

    fn publish(
        &mut self,
        transport: &mut dyn TelemetryTransport,
        mqtt: &MqttConfig,
        packet: &TelemetryPacket,
        watchdog: &mut dyn WatchdogHandle,
    ) -> Duration {
        self.buffer.clear();
        let accepted = match serde_json::to_writer(&mut self.buffer, &packet.payload()) {
            Ok(()) => transport.publish(&mqtt.topic, &self.buffer),
            Err(e) => {
                warn!("Telemetry payload serialization failed: {e}");
                false
            }
        };
        self.last_sent_version = packet.version();

        if accepted {
            self.publish_failures = 0;
            self.published += 1;
            watchdog.keep_alive();
            debug!(
                version = packet.version(),
                bytes = self.buffer.len(),
                topic = %mqtt.topic,
                "Telemetry published"
            );
        } else {
            self.publish_failures += 1;
            warn!(
                version = packet.version(),
                failures = self.publish_failures,
                "Telemetry publish failed"
            );
            if self.publish_failures > MAX_PUBLISH_FAILURES {
                warn!("Too many publish failures, dropping telemetry session");
                self.state = SessionState::Disconnected;
                self.publish_failures = 0;
                return RECONNECT_BACKOFF;
            }
        }
        PUBLISH_INTERVAL
    }

    /// Close the session if one is open.
    pub fn shutdown(&mut self, transport: &mut dyn TelemetryTransport) {
        if self.state != SessionState::Disconnected {
            transport.disconnect();
            self.state = SessionState::Disconnected;
        }
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true if the session is connected.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.is_connected()
    }

    /// Highest version handed to the transport.
    #[must_use]
    pub fn last_sent_version(&self) -> u64 {
        self.last_sent_version
    }

    /// Consecutive publish failures.
    #[must_use]
    pub fn publish_failures(&self) -> u32 {
        self.publish_failures
    }

    /// Successful publishes.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published
    }
}
