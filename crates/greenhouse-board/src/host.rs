//! Host (Linux/desktop) peripherals.
//!
//! Used by the daemon outside simulation. The host has no radio to manage,
//! so "association" is a routing probe, and there is no valve hardware, so
//! the valve output is logged.

use crate::filter::KalmanFilter;
use crate::mqtt::MqttTransport;
use crate::sntp::SntpClient;
use greenhouse_common::config::WifiConfig;
use greenhouse_common::error::{ControllerError, ControllerResult};
use greenhouse_runtime::peripherals::{
    MicrosCounter, NetworkInterface, Peripherals, PressureSensor, RealTimeClock, Valve,
    WatchdogHandle,
};
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Host peripheral options.
#[derive(Debug, Clone)]
pub struct HostOptions {
    /// Address used to check that a default route exists.
    pub probe_addr: String,
    /// Raw pressure input, e.g. an IIO `in_voltageN_raw` file.
    pub pressure_input: Option<PathBuf>,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            probe_addr: String::from("1.1.1.1:53"),
            pressure_input: None,
        }
    }
}

/// Build the host peripheral set around the given watchdog.
///
/// # Errors
///
/// Returns [`ControllerError::Config`] if the probe address is not an
/// `ip:port` pair, and [`ControllerError::Io`] if a pressure input is given
/// but cannot be read.
pub fn host_peripherals(
    options: &HostOptions,
    watchdog: Box<dyn WatchdogHandle>,
) -> ControllerResult<Peripherals> {
    let probe: SocketAddr = options.probe_addr.parse().map_err(|e| {
        ControllerError::Config(format!("invalid probe address {:?}: {e}", options.probe_addr))
    })?;
    if let Some(path) = &options.pressure_input {
        std::fs::read_to_string(path).map_err(|e| {
            ControllerError::Io(format!("pressure input {}: {e}", path.display()))
        })?;
    }

    let clock = SystemClock::new();
    Ok(Peripherals {
        counter: Box::new(clock.clone()),
        rtc: Box::new(clock),
        network: Box::new(HostNetwork::new(probe)),
        time_source: Box::new(SntpClient::new()),
        transport: Box::new(MqttTransport::new()),
        sensor: Box::new(SysfsPressureSensor::new(options.pressure_input.clone())),
        valve: Box::new(LoggingValve::default()),
        watchdog,
    })
}

/// System wall clock plus a wrapping microsecond counter.
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    /// Create a clock; the counter starts at 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MicrosCounter for SystemClock {
    fn micros(&self) -> u32 {
        let elapsed = self.start.elapsed().as_micros() % (1u128 << 32);
        u32::try_from(elapsed).unwrap_or(0)
    }
}

impl RealTimeClock for SystemClock {
    fn epoch_micros(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => i64::try_from(d.as_micros()).unwrap_or(i64::MAX),
            Err(e) => -i64::try_from(e.duration().as_micros()).unwrap_or(i64::MAX),
        }
    }
}

/// Network "association" backed by a routing probe.
///
/// Connecting a UDP socket sends nothing; it only succeeds when the kernel
/// has a route to the probe address.
#[derive(Debug)]
pub struct HostNetwork {
    probe_addr: SocketAddr,
    requested: bool,
}

impl HostNetwork {
    /// Create a probe against `probe_addr`.
    #[must_use]
    pub fn new(probe_addr: SocketAddr) -> Self {
        Self {
            probe_addr,
            requested: false,
        }
    }

    fn has_route(&self) -> bool {
        let bind = if self.probe_addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let Ok(socket) = UdpSocket::bind(bind) else {
            return false;
        };
        match socket.connect(self.probe_addr) {
            Ok(()) => socket
                .local_addr()
                .map(|a| !a.ip().is_unspecified())
                .unwrap_or(false),
            Err(e) => {
                debug!(probe = %self.probe_addr, "No route: {e}");
                false
            }
        }
    }
}

impl NetworkInterface for HostNetwork {
    fn is_associated(&mut self) -> bool {
        self.requested && self.has_route()
    }

    fn begin_association(&mut self, wifi: &WifiConfig) {
        debug!(ssid = %wifi.ssid, "Host network: association requested");
        self.requested = true;
    }

    fn disconnect(&mut self) {
        self.requested = false;
    }
}

/// Pressure input read from a sysfs file and smoothed.
#[derive(Debug)]
pub struct SysfsPressureSensor {
    path: Option<PathBuf>,
    filter: KalmanFilter,
    last: i32,
    errors: u64,
}

impl SysfsPressureSensor {
    /// Create a sensor. Without a path every read returns 0.
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        if path.is_none() {
            warn!("No pressure input configured, reporting 0");
        }
        Self {
            path,
            filter: KalmanFilter::default(),
            last: 0,
            errors: 0,
        }
    }

    fn read_raw(&self) -> Option<f64> {
        let path = self.path.as_ref()?;
        let text = std::fs::read_to_string(path).ok()?;
        text.trim().parse::<f64>().ok()
    }
}

impl PressureSensor for SysfsPressureSensor {
    #[allow(clippy::cast_possible_truncation)]
    fn read_filtered(&mut self) -> i32 {
        if self.path.is_none() {
            return 0;
        }
        match self.read_raw() {
            Some(raw) => {
                let estimate = self.filter.update(raw);
                self.last = (estimate + 0.5).floor() as i32;
            }
            None => {
                self.errors += 1;
                if self.errors.is_power_of_two() {
                    warn!(errors = self.errors, "Pressure input unreadable, keeping last value");
                }
            }
        }
        self.last
    }
}

/// Valve output that only logs transitions.
#[derive(Debug, Default)]
pub struct LoggingValve {
    active: Option<bool>,
}

impl LoggingValve {
    /// Last commanded state.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.unwrap_or(false)
    }
}

impl Valve for LoggingValve {
    fn set_active(&mut self, active: bool) {
        if self.active != Some(active) {
            info!(active, "Valve output");
            self.active = Some(active);
        }
    }
}
