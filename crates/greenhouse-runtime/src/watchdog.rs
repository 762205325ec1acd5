//! Software liveness watchdog.
//!
//! A monitor thread checks how long ago the control loop last confirmed
//! progress (a successful telemetry publish). When the timeout passes the
//! trigger callback runs once; the daemon uses it to restart the process.

use crate::peripherals::WatchdogHandle;
use greenhouse_common::error::{ControllerError, ControllerResult};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Upper bound on the monitor's polling period, so `stop()` returns quickly
/// even with an hours-long timeout.
const MAX_CHECK_INTERVAL: Duration = Duration::from_millis(250);

type TriggerFn = Arc<dyn Fn() + Send + Sync>;

/// Thread-backed liveness watchdog.
pub struct SoftwareWatchdog {
    /// Shared state between the control loop and the monitor thread.
    state: Arc<WatchdogState>,
    monitor_handle: Option<JoinHandle<()>>,
    timeout: Duration,
    running: Arc<AtomicBool>,
    on_trigger: TriggerFn,
}

#[derive(Debug)]
struct WatchdogState {
    /// Timestamp of last keep-alive (nanoseconds since start).
    last_kick_ns: AtomicU64,
    start_time: Instant,
    triggered: AtomicBool,
    stop_requested: AtomicBool,
}

impl WatchdogState {
    fn new() -> Self {
        Self {
            last_kick_ns: AtomicU64::new(0),
            start_time: Instant::now(),
            triggered: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    fn elapsed_ns(&self) -> u64 {
        u64::try_from(self.start_time.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn kick(&self) {
        self.last_kick_ns.store(self.elapsed_ns(), Ordering::Release);
    }

    fn is_timed_out(&self, timeout_ns: u64) -> bool {
        let last = self.last_kick_ns.load(Ordering::Acquire);
        self.elapsed_ns().saturating_sub(last) > timeout_ns
    }
}

impl fmt::Debug for SoftwareWatchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareWatchdog")
            .field("timeout", &self.timeout)
            .field("running", &self.is_running())
            .field("triggered", &self.has_triggered())
            .finish_non_exhaustive()
    }
}

impl SoftwareWatchdog {
    /// Create a stopped watchdog that calls `on_trigger` on timeout.
    pub fn new<F>(on_trigger: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(WatchdogState::new()),
            monitor_handle: None,
            timeout: Duration::ZERO,
            running: Arc::new(AtomicBool::new(false)),
            on_trigger: Arc::new(on_trigger),
        }
    }

    /// Start the monitor thread with the given timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the watchdog is already running or the monitor
    /// thread cannot be spawned.
    pub fn start(&mut self, timeout: Duration) -> ControllerResult<()> {
        if self.running.load(Ordering::Acquire) {
            return Err(ControllerError::Watchdog("watchdog already running".into()));
        }

        info!(timeout = %humantime::format_duration(timeout), "Starting watchdog");

        self.timeout = timeout;
        self.state.stop_requested.store(false, Ordering::Release);
        self.state.triggered.store(false, Ordering::Release);
        self.state.kick();

        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);
        let on_trigger = Arc::clone(&self.on_trigger);
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        let check_interval = (timeout / 4).clamp(Duration::from_millis(1), MAX_CHECK_INTERVAL);

        self.running.store(true, Ordering::Release);

        let handle = thread::Builder::new()
            .name("greenhouse-watchdog".into())
            .spawn(move || {
                debug!("Watchdog monitor thread started");

                while !state.stop_requested.load(Ordering::Acquire) {
                    thread::sleep(check_interval);

                    if state.stop_requested.load(Ordering::Acquire) {
                        break;
                    }

                    if state.is_timed_out(timeout_ns)
                        && !state.triggered.swap(true, Ordering::AcqRel)
                    {
                        error!("Watchdog timeout, no successful publish within the limit");
                        on_trigger();
                    }
                }

                running.store(false, Ordering::Release);
                debug!("Watchdog monitor thread stopped");
            });

        match handle {
            Ok(h) => {
                self.monitor_handle = Some(h);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(ControllerError::Watchdog(format!(
                    "failed to spawn watchdog thread: {e}"
                )))
            }
        }
    }

    /// Record progress.
    #[inline]
    pub fn kick(&self) {
        self.state.kick();
    }

    /// Returns true once the timeout has fired.
    #[inline]
    pub fn has_triggered(&self) -> bool {
        self.state.triggered.load(Ordering::Acquire)
    }

    /// Stop the monitor thread.
    pub fn stop(&mut self) {
        self.state.stop_requested.store(true, Ordering::Release);
        if let Some(handle) = self.monitor_handle.take() {
            info!("Stopping watchdog");
            if let Err(e) = handle.join() {
                warn!("Watchdog thread panicked: {:?}", e);
            }
        }
    }

    /// Returns true while the monitor thread runs.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Configured timeout; zero until started.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl WatchdogHandle for SoftwareWatchdog {
    fn arm(&mut self, timeout: Duration) -> ControllerResult<()> {
        self.start(timeout)
    }

    fn keep_alive(&mut self) {
        self.kick();
    }
}

impl Drop for SoftwareWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
