//! Network association and time source links.

use crate::clock::ClockFusion;
use crate::peripherals::{NetworkInterface, RealTimeClock, TimeSource};
use greenhouse_common::config::{NtpConfig, WifiConfig};
use greenhouse_common::state::{LinkMachine, LinkState};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

const NETWORK_CHECK: Duration = Duration::from_secs(10);
const NETWORK_RETRY: Duration = Duration::from_secs(3);
const TIME_SOURCE_IDLE: Duration = Duration::from_secs(1);
const TIME_SOURCE_POLL: Duration = Duration::from_secs(20);

/// Network association link.
///
/// While associated the link only checks status every 10 s. Otherwise every
/// tick drops the association and issues a fresh request.
#[derive(Debug, Default)]
pub struct NetworkLink {
    machine: LinkMachine,
    attempts: u64,
}

impl NetworkLink {
    /// Create a link in `NOT_READY`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Network tick. Returns the re-poll delay.
    pub fn tick(&mut self, iface: &mut dyn NetworkInterface, wifi: &WifiConfig) -> Duration {
        if iface.is_associated() {
            if self.machine.enter(LinkState::Ready) {
                info!(ssid = %wifi.ssid, attempts = self.attempts, "Network connected");
                self.attempts = 0;
            } else {
                trace!("Network still associated");
            }
            return NETWORK_CHECK;
        }

        if self.machine.is_ready() {
            self.machine.enter(LinkState::NotReady);
            warn!(ssid = %wifi.ssid, "Network association lost");
        }

        self.attempts += 1;
        debug!(ssid = %wifi.ssid, attempt = self.attempts, "Requesting network association");
        iface.disconnect();
        iface.begin_association(wifi);
        self.machine.enter(LinkState::Attempting);
        NETWORK_RETRY
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.machine.state()
    }

    /// Returns true if the network is usable.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.machine.is_ready()
    }

    /// Association requests since the link was last ready.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts
    }
}

/// Network time source link.
///
/// Follows network readiness: the session is opened once the network is up
/// and torn down when it goes away. While ready it polls every 20 s and
/// hands fresh samples to the clock fusion engine. A session that fails to
/// open, or fails later, is reopened on the next tick.
#[derive(Debug, Default)]
pub struct TimeSourceLink {
    machine: LinkMachine,
    samples: u64,
}

impl TimeSourceLink {
    /// Create a link in `NOT_READY`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Time source tick. Returns the re-poll delay.
    pub fn tick(
        &mut self,
        network_ready: bool,
        source: &mut dyn TimeSource,
        ntp: &NtpConfig,
        rtc: &dyn RealTimeClock,
        clock: &mut ClockFusion,
    ) -> Duration {
        if !network_ready {
            if self.machine.enter(LinkState::NotReady) {
                source.stop();
                info!("Time source stopped, no network");
            }
            return TIME_SOURCE_IDLE;
        }

        if !self.machine.is_ready() {
            if let Err(e) = source.begin(ntp) {
                warn!(server = %ntp.server, "Time source start failed: {e}");
                self.machine.enter(LinkState::Attempting);
                return TIME_SOURCE_IDLE;
            }
            self.machine.enter(LinkState::Ready);
            info!(server = %ntp.server, "Time source started");
            return TIME_SOURCE_IDLE;
        }

        match source.poll() {
            Ok(Some(network_time_us)) => {
                if clock.accept_sample(network_time_us, rtc.epoch_micros()) {
                    self.samples += 1;
                    debug!(network_time_us, samples = self.samples, "Time sample accepted");
                } else {
                    debug!(network_time_us, "Time sample unchanged, discarded");
                }
            }
            Ok(None) => debug!("Time source has no reply yet"),
            Err(e) => {
                warn!(server = %ntp.server, "Time source failed: {e}");
                source.stop();
                self.machine.enter(LinkState::NotReady);
                return TIME_SOURCE_IDLE;
            }
        }
        TIME_SOURCE_POLL
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.machine.state()
    }

    /// Returns true if the session is up.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.machine.is_ready()
    }

    /// Fresh samples handed to the clock.
    #[must_use]
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Stop the session if it is up.
    pub fn shutdown(&mut self, source: &mut dyn TimeSource) {
        if self.machine.is_ready() {
            source.stop();
        }
        self.machine.enter(LinkState::NotReady);
    }
}
