//! Non-blocking SNTP client (RFC 4330) implementing `TimeSource`.
//!
//! Neither `begin()` nor `poll()` waits on the network. A server given by
//! name is looked up on a helper thread. `poll()` drains any reply already
//! queued on the socket, sends a new request when the refresh interval has
//! passed, and returns the last server time extrapolated with the local
//! monotonic clock.

use greenhouse_common::config::NtpConfig;
use greenhouse_common::error::{ControllerError, ControllerResult};
use greenhouse_runtime::peripherals::TimeSource;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Seconds between the NTP era start (1900) and the Unix epoch.
pub const NTP_UNIX_OFFSET_SECS: i64 = 2_208_988_800;

const NTP_PORT: u16 = 123;
const PACKET_LEN: usize = 48;
/// LI = 0, VN = 4, Mode = 3 (client).
const CLIENT_HEADER: u8 = 0b00_100_011;
const MODE_SERVER: u8 = 4;
const DEFAULT_REFRESH: Duration = Duration::from_secs(60);
const RETRY_AFTER: Duration = Duration::from_secs(5);

/// Build a client request packet.
#[must_use]
pub fn build_request() -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = CLIENT_HEADER;
    packet
}

/// Extract the transmit timestamp of a server reply as Unix microseconds.
///
/// Returns `None` for short packets, non-server modes, kiss-o'-death
/// (stratum 0) and zero timestamps.
#[must_use]
pub fn parse_reply(packet: &[u8]) -> Option<i64> {
    if packet.len() < PACKET_LEN {
        return None;
    }
    if packet[0] & 0x07 != MODE_SERVER || packet[1] == 0 {
        return None;
    }
    let seconds = u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]);
    let fraction = u32::from_be_bytes([packet[44], packet[45], packet[46], packet[47]]);
    if seconds == 0 {
        return None;
    }
    let micros = (u64::from(fraction) * 1_000_000) >> 32;
    let unix_secs = i64::from(seconds) - NTP_UNIX_OFFSET_SECS;
    Some(unix_secs * 1_000_000 + i64::try_from(micros).ok()?)
}

/// SNTP session state.
#[derive(Debug)]
pub struct SntpClient {
    socket: Option<UdpSocket>,
    server: Option<SocketAddr>,
    /// Pending lookup of a server given by name.
    lookup: Option<Receiver<io::Result<SocketAddr>>>,
    refresh: Duration,
    last_request: Option<Instant>,
    /// Server time and the instant it was received.
    latest: Option<(i64, Instant)>,
}

impl SntpClient {
    /// Create a closed client with a 60 s refresh interval.
    #[must_use]
    pub fn new() -> Self {
        Self::with_refresh(DEFAULT_REFRESH)
    }

    /// Create a closed client with a custom refresh interval.
    #[must_use]
    pub fn with_refresh(refresh: Duration) -> Self {
        Self {
            socket: None,
            server: None,
            lookup: None,
            refresh,
            last_request: None,
            latest: None,
        }
    }

    fn target(server: &str) -> String {
        if server.contains(':') {
            server.to_string()
        } else {
            format!("{server}:{NTP_PORT}")
        }
    }

    fn resolve(target: &str) -> io::Result<SocketAddr> {
        target.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no address for time server")
        })
    }

    fn open(&mut self, addr: SocketAddr) -> io::Result<()> {
        let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind)?;
        socket.set_nonblocking(true)?;
        socket.connect(addr)?;
        info!(%addr, "SNTP session opened");
        self.socket = Some(socket);
        self.server = Some(addr);
        self.last_request = None;
        Ok(())
    }

    /// Pick up a finished lookup and open the socket.
    fn finish_lookup(&mut self) -> ControllerResult<()> {
        let Some(lookup) = self.lookup.as_ref() else {
            return Ok(());
        };
        match lookup.try_recv() {
            Ok(Ok(addr)) => {
                self.lookup = None;
                self.open(addr)?;
                Ok(())
            }
            Ok(Err(e)) => {
                self.lookup = None;
                Err(ControllerError::Io(format!("time server lookup failed: {e}")))
            }
            Err(TryRecvError::Empty) => Ok(()),
            Err(TryRecvError::Disconnected) => {
                self.lookup = None;
                Err(ControllerError::Io("time server lookup aborted".into()))
            }
        }
    }

    fn drain(&mut self) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        let mut buf = [0u8; 128];
        loop {
            match socket.recv(&mut buf) {
                Ok(n) => match parse_reply(&buf[..n]) {
                    Some(t) => {
                        self.latest = Some((t, Instant::now()));
                        debug!(server_time_us = t, "SNTP reply");
                    }
                    None => debug!(len = n, "SNTP reply ignored"),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("SNTP receive failed: {e}");
                    break;
                }
            }
        }
    }

    fn request_due(&self) -> bool {
        let interval = if self.latest.is_some() {
            self.refresh
        } else {
            RETRY_AFTER
        };
        self.last_request.map_or(true, |at| at.elapsed() >= interval)
    }

    fn send_request(&mut self) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        match socket.send(&build_request()) {
            Ok(_) => debug!(server = ?self.server, "SNTP request sent"),
            Err(e) => debug!("SNTP send failed: {e}"),
        }
        self.last_request = Some(Instant::now());
    }
}

impl Default for SntpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SntpClient {
    /// Opens the socket directly for a literal address. A host name is
    /// looked up on a helper thread and the socket opened by a later `poll`.
    fn begin(&mut self, ntp: &NtpConfig) -> ControllerResult<()> {
        self.stop();
        let target = Self::target(&ntp.server);
        if let Ok(addr) = target.parse::<SocketAddr>() {
            return self.open(addr).map_err(ControllerError::from);
        }

        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("greenhouse-sntp-lookup".into())
            .spawn(move || {
                let _ = tx.send(Self::resolve(&target));
            })?;
        debug!(server = %ntp.server, "SNTP server lookup started");
        self.lookup = Some(rx);
        Ok(())
    }

    fn stop(&mut self) {
        if self.socket.take().is_some() {
            info!("SNTP session closed");
        }
        self.server = None;
        self.lookup = None;
    }

    fn poll(&mut self) -> ControllerResult<Option<i64>> {
        self.finish_lookup()?;
        if self.socket.is_none() && self.lookup.is_none() {
            return Err(ControllerError::Io("SNTP session not open".into()));
        }
        self.drain();
        if self.socket.is_some() && self.request_due() {
            self.send_request();
        }
        Ok(self.latest.map(|(t, at)| {
            t.saturating_add(i64::try_from(at.elapsed().as_micros()).unwrap_or(i64::MAX))
        }))
    }
}
