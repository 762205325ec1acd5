//! Configuration structures for the greenhouse controller.
//!
//! The on-device format is JSON with camelCase keys; TOML is accepted as well
//! for host deployments. Every section has defaults so a partial file still
//! yields a usable snapshot. The snapshot is immutable once loaded: the core
//! only ever borrows it.

use crate::time::{Hms, ScheduleInterval};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Hard cap on the number of pump intervals.
pub const MAX_SCHEDULE_INTERVALS: usize = 20;

/// Top-level controller configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Network credentials.
    pub wifi: WifiConfig,
    /// Time source.
    pub ntp: NtpConfig,
    /// Telemetry broker session.
    pub mqtt: MqttConfig,
    /// Daily pump schedule.
    pub pump_schedule: PumpScheduleConfig,
    /// Liveness watchdog.
    pub watchdog: WatchdogConfig,
    /// Dispatcher sleep and backlog bounds.
    pub dispatcher: DispatcherConfig,
}

/// Network association credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    /// Network name.
    pub ssid: String,
    /// Network passphrase.
    pub password: String,
}

/// Network time source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NtpConfig {
    /// Server host name, optionally with `:port`.
    pub server: String,
}

impl Default for NtpConfig {
    fn default() -> Self {
        Self {
            server: String::from("pool.ntp.org"),
        }
    }
}

/// Telemetry broker session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MqttConfig {
    /// Broker host name or address.
    pub broker: String,
    /// Broker TCP port.
    pub port: u16,
    /// Session user name.
    pub user: String,
    /// Session password.
    pub password: String,
    /// Client identifier.
    pub device_id: String,
    /// Topic every telemetry packet is published to.
    pub topic: String,
    /// Protocol keep-alive interval.
    #[serde(with = "humantime_serde")]
    pub keep_alive: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: String::new(),
            port: 1883,
            user: String::new(),
            password: String::new(),
            device_id: String::new(),
            topic: String::new(),
            keep_alive: Duration::from_secs(47),
        }
    }
}

/// One pump interval as written in the configuration file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    /// Local start time.
    pub start: Hms,
    /// Local end time (exclusive).
    pub end: Hms,
}

/// Daily pump schedule in local time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PumpScheduleConfig {
    /// Hours to subtract from local times to obtain UTC.
    pub utc_offset: i32,
    /// Ordered active windows.
    pub pump: Vec<IntervalConfig>,
}

/// Liveness watchdog configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Time without a successful publish before the device restarts.
    ///
    /// Long enough that at least one watering still happens while the broker
    /// is unreachable.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(11 * 3600 + 3117),
        }
    }
}

/// Dispatcher bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DispatcherConfig {
    /// Shortest suspension between iterations.
    #[serde(with = "humantime_serde")]
    pub min_sleep: Duration,
    /// Longest suspension between iterations.
    #[serde(with = "humantime_serde")]
    pub max_sleep: Duration,
    /// How far in the past a due time may lie before it is clamped.
    #[serde(with = "humantime_serde")]
    pub max_backlog: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            min_sleep: Duration::from_millis(50),
            max_sleep: Duration::from_millis(10_000),
            max_backlog: Duration::from_millis(100),
        }
    }
}

/// Frozen list of UTC day intervals, bounded by [`MAX_SCHEDULE_INTERVALS`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    intervals: Vec<ScheduleInterval>,
}

impl Schedule {
    /// Build the schedule, applying the UTC offset once.
    ///
    /// Intervals beyond the cap are dropped with a warning.
    #[must_use]
    pub fn from_config(config: &PumpScheduleConfig) -> Self {
        if config.pump.len() > MAX_SCHEDULE_INTERVALS {
            warn!(
                configured = config.pump.len(),
                cap = MAX_SCHEDULE_INTERVALS,
                "Too many pump intervals, truncating"
            );
        }

        let intervals = config
            .pump
            .iter()
            .take(MAX_SCHEDULE_INTERVALS)
            .map(|i| {
                ScheduleInterval::new(
                    i.start.to_second_of_utc_day(config.utc_offset),
                    i.end.to_second_of_utc_day(config.utc_offset),
                )
            })
            .collect();

        Self { intervals }
    }

    /// Build directly from UTC intervals (truncated at the cap).
    #[must_use]
    pub fn from_intervals(intervals: &[ScheduleInterval]) -> Self {
        Self {
            intervals: intervals
                .iter()
                .take(MAX_SCHEDULE_INTERVALS)
                .copied()
                .collect(),
        }
    }

    /// The ordered intervals.
    #[must_use]
    pub fn intervals(&self) -> &[ScheduleInterval] {
        &self.intervals
    }

    /// Number of intervals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// Returns true if no interval is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}

impl ControllerConfig {
    /// Load configuration from a file.
    ///
    /// Files ending in `.toml` are parsed as TOML, everything else as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_json(&content),
        }
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(ConfigError::Json)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Build the frozen UTC schedule.
    #[must_use]
    pub fn schedule(&self) -> Schedule {
        Schedule::from_config(&self.pump_schedule)
    }

    /// Log the configuration with secrets masked.
    pub fn log_summary(&self) {
        info!(
            ssid = %or_unset(&self.wifi.ssid),
            password = mask(&self.wifi.password),
            "wifi"
        );
        info!(server = %or_unset(&self.ntp.server), "ntp");
        info!(
            broker = %or_unset(&self.mqtt.broker),
            port = self.mqtt.port,
            user = %or_unset(&self.mqtt.user),
            password = mask(&self.mqtt.password),
            device_id = %or_unset(&self.mqtt.device_id),
            topic = %or_unset(&self.mqtt.topic),
            "mqtt"
        );
        let schedule = self.schedule();
        info!(
            interval_count = schedule.len(),
            utc_offset = self.pump_schedule.utc_offset,
            "schedule"
        );
        for (n, interval) in schedule.intervals().iter().enumerate() {
            info!(
                interval = n + 1,
                start_sec = interval.start_sec,
                end_sec = interval.end_sec,
                utc = %interval,
                "schedule interval"
            );
        }
    }
}

fn or_unset(value: &str) -> &str {
    if value.is_empty() {
        "(not set)"
    } else {
        value
    }
}

fn mask(value: &str) -> &'static str {
    if value.is_empty() {
        "(not set)"
    } else {
        "***"
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// JSON parsing error.
    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
