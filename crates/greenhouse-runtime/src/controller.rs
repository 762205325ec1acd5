//! Controller aggregate: owns every subsystem and runs dispatcher iterations.
//!
//! One iteration:
//! 1. Read local time
//! 2. Dispatch network, time source, clock, sensor, valve, telemetry, report
//! 3. Re-read local time and compute the suspension until the next due tick
//!
//! Readiness flags are read between ticks, so every consumer sees the state
//! produced by this iteration's network and time source ticks.

use crate::clock::ClockFusion;
use crate::dispatcher::{Dispatcher, TaskId};
use crate::link::{NetworkLink, TimeSourceLink};
use crate::peripherals::Peripherals;
use crate::report::StatusReporter;
use crate::schedule::ValveControl;
use crate::sensor::PressureSampler;
use crate::telemetry::{TelemetryPacket, TelemetrySession};
use greenhouse_common::config::{ControllerConfig, Schedule};
use greenhouse_common::error::ControllerResult;
use greenhouse_common::metrics::LoopMetrics;
use greenhouse_common::state::StatusView;
use std::time::Duration;
use tracing::info;

/// Greenhouse controller.
#[derive(Debug)]
pub struct Controller {
    config: ControllerConfig,
    schedule: Schedule,
    peripherals: Peripherals,
    dispatcher: Dispatcher,
    network: NetworkLink,
    time_source: TimeSourceLink,
    clock: ClockFusion,
    sampler: PressureSampler,
    valve: ValveControl,
    telemetry: TelemetrySession,
    reporter: StatusReporter,
    packet: TelemetryPacket,
    started: bool,
}

impl Controller {
    /// Build a controller. The schedule is frozen here.
    #[must_use]
    pub fn new(config: ControllerConfig, peripherals: Peripherals) -> Self {
        let schedule = config.schedule();
        let dispatcher = Dispatcher::new(&config.dispatcher);
        Self {
            config,
            schedule,
            peripherals,
            dispatcher,
            network: NetworkLink::new(),
            time_source: TimeSourceLink::new(),
            clock: ClockFusion::new(),
            sampler: PressureSampler::new(),
            valve: ValveControl::new(),
            telemetry: TelemetrySession::new(),
            reporter: StatusReporter::new(),
            packet: TelemetryPacket::default(),
            started: false,
        }
    }

    /// Boot: drive the valve off and arm the watchdog.
    ///
    /// # Errors
    ///
    /// Returns an error if the watchdog cannot be armed.
    pub fn start(&mut self) -> ControllerResult<()> {
        self.valve.shutdown(self.peripherals.valve.as_mut());
        self.peripherals.watchdog.arm(self.config.watchdog.timeout)?;
        self.started = true;
        info!(
            intervals = self.schedule.len(),
            watchdog_timeout = %humantime::format_duration(self.config.watchdog.timeout),
            "Controller started"
        );
        Ok(())
    }

    /// Run one dispatcher iteration and return how long to suspend.
    pub fn run_iteration(&mut self) -> Duration {
        let now_ms = self.peripherals.rtc.epoch_millis();
        self.dispatch_all(now_ms);
        let after_ms = self.peripherals.rtc.epoch_millis();
        self.dispatcher.finish_iteration(after_ms)
    }

    fn dispatch_all(&mut self, now_ms: i64) {
        let metrics = self.dispatcher.metrics().snapshot();
        let Self {
            config,
            schedule,
            peripherals,
            dispatcher,
            network,
            time_source,
            clock,
            sampler,
            valve,
            telemetry,
            reporter,
            packet,
            ..
        } = self;

        dispatcher.begin_iteration(now_ms);

        dispatcher.dispatch(TaskId::Network, now_ms, || {
            network.tick(peripherals.network.as_mut(), &config.wifi)
        });
        let network_ready = network.is_ready();

        dispatcher.dispatch(TaskId::TimeSource, now_ms, || {
            time_source.tick(
                network_ready,
                peripherals.time_source.as_mut(),
                &config.ntp,
                peripherals.rtc.as_ref(),
                clock,
            )
        });
        let time_source_ready = time_source.is_ready();

        dispatcher.dispatch(TaskId::Clock, now_ms, || {
            clock.tick(
                time_source_ready,
                peripherals.rtc.as_ref(),
                peripherals.counter.as_ref(),
                packet,
            )
        });

        dispatcher.dispatch(TaskId::Sensor, now_ms, || {
            sampler.tick(peripherals.sensor.as_mut(), packet)
        });

        dispatcher.dispatch(TaskId::Valve, now_ms, || {
            valve.tick(
                schedule,
                clock,
                peripherals.counter.as_ref(),
                peripherals.valve.as_mut(),
                packet,
            )
        });

        dispatcher.dispatch(TaskId::Telemetry, now_ms, || {
            telemetry.tick(
                network_ready,
                peripherals.transport.as_mut(),
                &config.mqtt,
                packet,
                peripherals.watchdog.as_mut(),
            )
        });

        let status = StatusView {
            network_ready,
            time_source_ready,
            telemetry_ready: telemetry.is_ready(),
            pumping: valve.is_pumping(),
        };
        dispatcher.dispatch(TaskId::Report, now_ms, || {
            reporter.tick(
                clock,
                peripherals.counter.as_ref(),
                packet,
                sampler,
                status,
                &metrics,
            )
        });
    }

    /// Safe stop: valve off, sessions closed.
    pub fn shutdown(&mut self) {
        info!("Controller shutting down");
        self.valve.shutdown(self.peripherals.valve.as_mut());
        self.telemetry.shutdown(self.peripherals.transport.as_mut());
        self.time_source.shutdown(self.peripherals.time_source.as_mut());
        self.started = false;
    }

    /// Read-only status for an indicator renderer.
    #[must_use]
    pub fn status(&self) -> StatusView {
        StatusView {
            network_ready: self.network.is_ready(),
            time_source_ready: self.time_source.is_ready(),
            telemetry_ready: self.telemetry.is_ready(),
            pumping: self.valve.is_pumping(),
        }
    }

    /// Returns true between `start()` and `shutdown()`.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Frozen UTC schedule.
    #[must_use]
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Current telemetry packet.
    #[must_use]
    pub fn packet(&self) -> &TelemetryPacket {
        &self.packet
    }

    /// Clock fusion engine.
    #[must_use]
    pub fn clock(&self) -> &ClockFusion {
        &self.clock
    }

    /// Network link.
    #[must_use]
    pub fn network(&self) -> &NetworkLink {
        &self.network
    }

    /// Time source link.
    #[must_use]
    pub fn time_source(&self) -> &TimeSourceLink {
        &self.time_source
    }

    /// Telemetry session.
    #[must_use]
    pub fn telemetry(&self) -> &TelemetrySession {
        &self.telemetry
    }

    /// Dispatcher (due times and metrics).
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Loop metrics.
    #[must_use]
    pub fn metrics(&self) -> &LoopMetrics {
        self.dispatcher.metrics()
    }
}
