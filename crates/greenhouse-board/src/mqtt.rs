//! MQTT telemetry transport over `rumqttc`.
//!
//! `rumqttc`'s synchronous client needs its connection iterated to make
//! progress, so each session gets a small network thread that drives the
//! event loop and mirrors the CONNACK/disconnect status into an atomic flag.
//! The control loop itself only ever calls the non-blocking `try_*` methods.

use greenhouse_common::config::MqttConfig;
use greenhouse_runtime::peripherals::TelemetryTransport;
use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

const REQUEST_CAPACITY: usize = 10;
const DEFAULT_CLIENT_ID: &str = "greenhouse-controller";

/// MQTT transport.
#[derive(Default)]
pub struct MqttTransport {
    client: Option<Client>,
    session: Option<Arc<SessionFlags>>,
}

#[derive(Debug, Default)]
struct SessionFlags {
    connected: AtomicBool,
    closing: AtomicBool,
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl MqttTransport {
    /// Create a transport with no session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn options(mqtt: &MqttConfig) -> MqttOptions {
        let client_id = if mqtt.device_id.is_empty() {
            DEFAULT_CLIENT_ID
        } else {
            mqtt.device_id.as_str()
        };
        let mut options = MqttOptions::new(client_id, mqtt.broker.as_str(), mqtt.port);
        if !mqtt.keep_alive.is_zero() {
            options.set_keep_alive(mqtt.keep_alive.max(Duration::from_secs(1)));
        }
        if !mqtt.user.is_empty() {
            options.set_credentials(mqtt.user.as_str(), mqtt.password.as_str());
        }
        options
    }

    fn drive(mut connection: Connection, flags: &SessionFlags) {
        for event in connection.iter() {
            if flags.closing.load(Ordering::Acquire) {
                break;
            }
            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    debug!(code = ?ack.code, "MQTT CONNACK");
                    flags.connected.store(true, Ordering::Release);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("MQTT broker sent disconnect");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("MQTT connection ended: {e}");
                    break;
                }
            }
        }
        flags.connected.store(false, Ordering::Release);
    }
}

impl TelemetryTransport for MqttTransport {
    fn connect(&mut self, mqtt: &MqttConfig) {
        self.disconnect();

        let (client, connection) = Client::new(Self::options(mqtt), REQUEST_CAPACITY);
        let flags = Arc::new(SessionFlags::default());
        let thread_flags = Arc::clone(&flags);

        let spawned = thread::Builder::new()
            .name("greenhouse-mqtt".into())
            .spawn(move || Self::drive(connection, &thread_flags));

        match spawned {
            Ok(_) => {
                info!(broker = %mqtt.broker, port = mqtt.port, "MQTT connect issued");
                self.client = Some(client);
                self.session = Some(flags);
            }
            Err(e) => warn!("Failed to spawn MQTT thread: {e}"),
        }
    }

    fn is_connected(&mut self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|f| f.connected.load(Ordering::Acquire))
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> bool {
        if !self.is_connected() {
            return false;
        }
        let Some(client) = self.client.as_ref() else {
            return false;
        };
        match client.try_publish(topic, QoS::AtMostOnce, false, payload.to_vec()) {
            Ok(()) => true,
            Err(e) => {
                debug!("MQTT publish rejected: {e}");
                false
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(flags) = self.session.take() {
            flags.closing.store(true, Ordering::Release);
            flags.connected.store(false, Ordering::Release);
        }
        if let Some(client) = self.client.take() {
            if let Err(e) = client.try_disconnect() {
                debug!("MQTT disconnect not queued: {e}");
            }
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}
