//! Common utilities for acceptance tests.
//!
//! Provides a [`Rig`] pairing a `Controller` with the `SimBoard` it runs on,
//! and helpers to step simulated time the way the daemon loop does.

#![allow(dead_code)]

use greenhouse_board::SimBoard;
use greenhouse_common::config::{ControllerConfig, IntervalConfig};
use greenhouse_common::time::Hms;
use greenhouse_runtime::controller::Controller;
use greenhouse_runtime::telemetry::{TelemetryData, TelemetryPayload};
use std::time::Duration;

/// 2023-11-14 22:13:20 UTC, second 80000 of the day.
pub const START_US: i64 = 1_700_000_000_000_000;

/// Second of the UTC day at [`START_US`].
pub const START_SECOND_OF_DAY: u32 = 80_000;

/// Topic used by [`default_config`].
pub const TOPIC: &str = "greenhouse/tank";

/// Controller running on a simulated board.
pub struct Rig {
    /// Simulated peripherals.
    pub board: SimBoard,
    /// Controller under test, already started.
    pub controller: Controller,
}

impl Rig {
    /// Boot a controller on a fresh board.
    pub fn new(config: ControllerConfig) -> Self {
        Self::with_board(config, SimBoard::new(START_US))
    }

    /// Boot a controller on a prepared board.
    pub fn with_board(config: ControllerConfig, board: SimBoard) -> Self {
        let mut controller = Controller::new(config, board.peripherals());
        controller.start().expect("controller start");
        Self { board, controller }
    }

    /// One loop iteration followed by the requested suspension.
    pub fn step(&mut self) -> Duration {
        let sleep = self.controller.run_iteration();
        self.board.advance(sleep);
        sleep
    }

    /// Step until at least `duration` of simulated time has passed.
    pub fn run_for(&mut self, duration: Duration) {
        let end = self.board.now_us() + i64::try_from(duration.as_micros()).unwrap();
        while self.board.now_us() < end {
            self.step();
        }
    }

    /// Step until `condition` holds, failing after `limit` of simulated time.
    pub fn run_until<F>(&mut self, limit: Duration, mut condition: F)
    where
        F: FnMut(&Self) -> bool,
    {
        let end = self.board.now_us() + i64::try_from(limit.as_micros()).unwrap();
        while !condition(self) {
            assert!(
                self.board.now_us() < end,
                "condition not reached within {limit:?}"
            );
            self.step();
        }
    }

    /// Decoded payloads accepted by the broker.
    pub fn payloads(&self) -> Vec<TelemetryData> {
        self.board
            .published()
            .iter()
            .map(|m| {
                serde_json::from_slice::<TelemetryPayload>(&m.payload)
                    .expect("payload is valid JSON")
                    .data
            })
            .collect()
    }

    /// Current local time in milliseconds.
    pub fn now_ms(&self) -> i64 {
        self.board.now_us() / 1000
    }
}

/// Configuration with a broker topic and no schedule.
pub fn default_config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.wifi.ssid = "greenhouse".into();
    config.mqtt.broker = "broker.local".into();
    config.mqtt.topic = TOPIC.into();
    config
}

/// Configuration with one pump interval in local time.
pub fn config_with_interval(start: Hms, end: Hms, utc_offset: i32) -> ControllerConfig {
    let mut config = default_config();
    config.pump_schedule.utc_offset = utc_offset;
    config.pump_schedule.pump = vec![IntervalConfig { start, end }];
    config
}
