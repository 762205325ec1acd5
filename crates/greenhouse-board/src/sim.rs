//! In-memory simulated board.
//!
//! All peripheral handles share one [`SimBoard`] state, so a test can flip
//! the network or broker, move the clock, and inspect published payloads
//! and valve writes. Time only moves when [`SimBoard::advance`] is called.

use greenhouse_common::config::{MqttConfig, NtpConfig, WifiConfig};
use greenhouse_common::error::ControllerResult;
use greenhouse_runtime::peripherals::{
    MicrosCounter, NetworkInterface, Peripherals, PressureSensor, RealTimeClock,
    TelemetryTransport, TimeSource, Valve, WatchdogHandle,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tracing::trace;

/// One message accepted by the simulated broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Topic.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
    /// Simulated local time of the publish.
    pub at_us: i64,
}

#[derive(Debug)]
struct SimState {
    /// Local RTC reading.
    now_us: i64,
    /// Added to `now_us` before truncating to the 32-bit counter.
    counter_base: i64,
    network_up: bool,
    association_requested: bool,
    association_requests: u32,
    time_source_running: bool,
    time_source_replies: bool,
    /// Network time minus local time.
    network_offset_us: i64,
    broker_up: bool,
    transport_connected: bool,
    connect_requests: u32,
    publish_accepts: bool,
    published: Vec<PublishedMessage>,
    pressure: i32,
    valve: Option<bool>,
    valve_writes: u64,
    watchdog_timeout: Option<Duration>,
    keep_alives: u64,
}

/// Shared handle to the simulated board.
#[derive(Debug, Clone)]
pub struct SimBoard {
    state: Rc<RefCell<SimState>>,
}

impl SimBoard {
    /// Create a board with a healthy network and broker, local time at
    /// `start_us`, and no network time offset.
    #[must_use]
    pub fn new(start_us: i64) -> Self {
        Self {
            state: Rc::new(RefCell::new(SimState {
                now_us: start_us,
                counter_base: 0,
                network_up: true,
                association_requested: false,
                association_requests: 0,
                time_source_running: false,
                time_source_replies: true,
                network_offset_us: 0,
                broker_up: true,
                transport_connected: false,
                connect_requests: 0,
                publish_accepts: true,
                published: Vec::new(),
                pressure: 0,
                valve: None,
                valve_writes: 0,
                watchdog_timeout: None,
                keep_alives: 0,
            })),
        }
    }

    /// Boxed peripherals backed by this board.
    #[must_use]
    pub fn peripherals(&self) -> Peripherals {
        let handle = || SimPeripheral(Rc::clone(&self.state));
        Peripherals {
            counter: Box::new(handle()),
            rtc: Box::new(handle()),
            network: Box::new(handle()),
            time_source: Box::new(handle()),
            transport: Box::new(handle()),
            sensor: Box::new(handle()),
            valve: Box::new(handle()),
            watchdog: Box::new(handle()),
        }
    }

    /// Move local time forward.
    pub fn advance(&self, by: Duration) {
        let mut s = self.state.borrow_mut();
        s.now_us += i64::try_from(by.as_micros()).unwrap_or(i64::MAX);
    }

    /// Local RTC reading.
    #[must_use]
    pub fn now_us(&self) -> i64 {
        self.state.borrow().now_us
    }

    /// Shift the microsecond counter relative to the RTC (to exercise wrap).
    pub fn set_counter_base(&self, base: i64) {
        self.state.borrow_mut().counter_base = base;
    }

    /// Bring the network up or down. Taking it down drops the association
    /// and any broker session.
    pub fn set_network_up(&self, up: bool) {
        let mut s = self.state.borrow_mut();
        s.network_up = up;
        if !up {
            s.association_requested = false;
            s.transport_connected = false;
        }
    }

    /// Bring the broker up or down.
    pub fn set_broker_up(&self, up: bool) {
        let mut s = self.state.borrow_mut();
        s.broker_up = up;
        if !up {
            s.transport_connected = false;
        }
    }

    /// Whether the time server answers.
    pub fn set_time_source_replies(&self, replies: bool) {
        self.state.borrow_mut().time_source_replies = replies;
    }

    /// Set network time minus local time.
    pub fn set_network_offset(&self, offset_us: i64) {
        self.state.borrow_mut().network_offset_us = offset_us;
    }

    /// Whether the broker accepts publishes.
    pub fn set_publish_accepts(&self, accepts: bool) {
        self.state.borrow_mut().publish_accepts = accepts;
    }

    /// Set the filtered pressure reading.
    pub fn set_pressure(&self, pressure: i32) {
        self.state.borrow_mut().pressure = pressure;
    }

    /// Last valve write, `None` if never written.
    #[must_use]
    pub fn valve(&self) -> Option<bool> {
        self.state.borrow().valve
    }

    /// Number of valve writes.
    #[must_use]
    pub fn valve_writes(&self) -> u64 {
        self.state.borrow().valve_writes
    }

    /// Messages accepted by the broker.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.borrow().published.clone()
    }

    /// Association requests issued.
    #[must_use]
    pub fn association_requests(&self) -> u32 {
        self.state.borrow().association_requests
    }

    /// Broker connect requests issued.
    #[must_use]
    pub fn connect_requests(&self) -> u32 {
        self.state.borrow().connect_requests
    }

    /// Whether the time source session is open.
    #[must_use]
    pub fn time_source_running(&self) -> bool {
        self.state.borrow().time_source_running
    }

    /// Whether the broker session is open.
    #[must_use]
    pub fn transport_connected(&self) -> bool {
        let s = self.state.borrow();
        s.transport_connected && s.network_up && s.broker_up
    }

    /// Timeout the watchdog was armed with.
    #[must_use]
    pub fn watchdog_timeout(&self) -> Option<Duration> {
        self.state.borrow().watchdog_timeout
    }

    /// Watchdog keep-alives received.
    #[must_use]
    pub fn keep_alives(&self) -> u64 {
        self.state.borrow().keep_alives
    }
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new(0)
    }
}

/// One peripheral view of the shared simulated state.
struct SimPeripheral(Rc<RefCell<SimState>>);

impl MicrosCounter for SimPeripheral {
    fn micros(&self) -> u32 {
        let s = self.0.borrow();
        let raw = s.now_us.wrapping_add(s.counter_base).rem_euclid(1 << 32);
        u32::try_from(raw).unwrap_or(0)
    }
}

impl RealTimeClock for SimPeripheral {
    fn epoch_micros(&self) -> i64 {
        self.0.borrow().now_us
    }
}

impl NetworkInterface for SimPeripheral {
    fn is_associated(&mut self) -> bool {
        let s = self.0.borrow();
        s.network_up && s.association_requested
    }

    fn begin_association(&mut self, wifi: &WifiConfig) {
        let mut s = self.0.borrow_mut();
        trace!(ssid = %wifi.ssid, "sim: association requested");
        s.association_requests += 1;
        s.association_requested = s.network_up;
    }

    fn disconnect(&mut self) {
        self.0.borrow_mut().association_requested = false;
    }
}

impl TimeSource for SimPeripheral {
    fn begin(&mut self, _ntp: &NtpConfig) -> ControllerResult<()> {
        self.0.borrow_mut().time_source_running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.0.borrow_mut().time_source_running = false;
    }

    fn poll(&mut self) -> ControllerResult<Option<i64>> {
        let s = self.0.borrow();
        Ok((s.time_source_running && s.network_up && s.time_source_replies)
            .then(|| s.now_us + s.network_offset_us))
    }
}

impl TelemetryTransport for SimPeripheral {
    fn connect(&mut self, _mqtt: &MqttConfig) {
        let mut s = self.0.borrow_mut();
        s.connect_requests += 1;
        s.transport_connected = s.network_up && s.broker_up;
    }

    fn is_connected(&mut self) -> bool {
        let s = self.0.borrow();
        s.transport_connected && s.network_up && s.broker_up
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> bool {
        let mut s = self.0.borrow_mut();
        if !(s.transport_connected && s.network_up && s.broker_up && s.publish_accepts) {
            return false;
        }
        let at_us = s.now_us;
        s.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            at_us,
        });
        true
    }

    fn disconnect(&mut self) {
        self.0.borrow_mut().transport_connected = false;
    }
}

impl PressureSensor for SimPeripheral {
    fn read_filtered(&mut self) -> i32 {
        self.0.borrow().pressure
    }
}

impl Valve for SimPeripheral {
    fn set_active(&mut self, active: bool) {
        let mut s = self.0.borrow_mut();
        s.valve = Some(active);
        s.valve_writes += 1;
    }
}

impl WatchdogHandle for SimPeripheral {
    fn arm(&mut self, timeout: Duration) -> ControllerResult<()> {
        self.0.borrow_mut().watchdog_timeout = Some(timeout);
        Ok(())
    }

    fn keep_alive(&mut self) {
        self.0.borrow_mut().keep_alives += 1;
    }
}
