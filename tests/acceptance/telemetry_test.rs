//! Broker failures, publish give-up and the liveness watchdog.

use super::common::{default_config, Rig, START_US};
use greenhouse_board::SimBoard;
use greenhouse_common::state::SessionState;
use greenhouse_runtime::telemetry::MAX_PUBLISH_FAILURES;
use greenhouse_runtime::watchdog::SoftwareWatchdog;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn connected_rig() -> Rig {
    let board = SimBoard::new(START_US);
    board.set_pressure(10);
    let mut rig = Rig::with_board(default_config(), board);
    rig.run_until(Duration::from_secs(30), |r| r.board.published().len() == 1);
    rig
}

#[test]
fn test_rejected_publishes_drop_session() {
    let board = SimBoard::new(START_US);
    board.set_publish_accepts(false);
    let mut rig = Rig::with_board(default_config(), board);

    // Keep producing new versions so every publish slot has something to send.
    let mut pressure = 0;
    let end = rig.board.now_us() + 150_000_000;
    while rig.board.now_us() < end {
        pressure += 1;
        rig.board.set_pressure(pressure);
        rig.step();
        assert!(rig.controller.telemetry().publish_failures() <= MAX_PUBLISH_FAILURES);
    }

    assert!(rig.board.published().is_empty());
    assert_eq!(rig.board.keep_alives(), 0);
    assert!(rig.board.connect_requests() >= 2);

    rig.board.set_publish_accepts(true);
    rig.board.set_pressure(-1);
    rig.run_until(Duration::from_secs(30), |r| !r.board.published().is_empty());

    assert_eq!(rig.controller.telemetry().publish_failures(), 0);
    assert_eq!(rig.board.keep_alives(), 1);
}

#[test]
fn test_failed_version_is_not_resent() {
    let board = SimBoard::new(START_US);
    board.set_pressure(50);
    board.set_publish_accepts(false);
    let mut rig = Rig::with_board(default_config(), board);

    rig.run_for(Duration::from_secs(30));
    let failures = rig.controller.telemetry().publish_failures();
    assert!((2..=MAX_PUBLISH_FAILURES).contains(&failures), "failures = {failures}");
    let rejected = rig.controller.telemetry().last_sent_version();
    assert!(rejected >= 2);

    rig.board.set_publish_accepts(true);
    rig.board.set_pressure(51);
    rig.run_until(Duration::from_secs(15), |r| !r.board.published().is_empty());

    let data = rig.payloads()[0];
    assert!(data.ping_count > rejected, "resent version {}", data.ping_count);
    assert_eq!(data.tank_pressure, 51);
    assert_eq!(rig.controller.telemetry().publish_failures(), 0);
}

#[test]
fn test_steady_reading_keeps_watchdog_fed() {
    let mut rig = connected_rig();
    let end = rig.board.now_us() + 3 * 3600 * 1_000_000;
    while rig.board.now_us() < end {
        rig.step();
    }

    let published = rig.board.published();
    assert_eq!(rig.board.keep_alives(), u64::try_from(published.len()).unwrap());
    assert!(published.len() > 500, "published {}", published.len());

    let max_gap_us = published
        .windows(2)
        .map(|w| w[1].at_us - w[0].at_us)
        .max()
        .unwrap();
    assert!(max_gap_us <= 30_000_000, "longest silence {max_gap_us} us");

    let data = rig.payloads();
    assert!(data.iter().all(|d| d.tank_pressure == 10));
    assert!(data.windows(2).all(|w| w[1].ping_count > w[0].ping_count));
}

#[test]
fn test_zero_reading_is_published() {
    // A sensor stuck at the packet default still reports.
    let mut rig = Rig::new(default_config());
    rig.run_until(Duration::from_secs(30), |r| !r.board.published().is_empty());

    let data = rig.payloads()[0];
    assert_eq!(data.ping_count, 1);
    assert_eq!(data.tank_pressure, 0);
    assert_eq!(rig.board.keep_alives(), 1);
}

#[test]
fn test_broker_outage_reconnects() {
    let mut rig = connected_rig();

    rig.board.set_broker_up(false);
    rig.board.set_pressure(11);
    rig.run_for(Duration::from_secs(80));

    assert!(!rig.controller.status().telemetry_ready);
    assert!(matches!(
        rig.controller.telemetry().state(),
        SessionState::Connecting { .. } | SessionState::Disconnected
    ));
    // Initial connect, reconnect after the loss, retry once new data arrives
    // after the give-up.
    assert!(rig.board.connect_requests() >= 3);
    assert_eq!(rig.board.published().len(), 1);

    rig.board.set_broker_up(true);
    rig.run_until(Duration::from_secs(150), |r| r.board.published().len() == 2);

    let data = rig.payloads();
    assert_eq!(data[1].tank_pressure, 11);
    assert!(data[1].ping_count > data[0].ping_count);
    assert!(rig.controller.status().telemetry_ready);
}

#[test]
fn test_watchdog_fires_without_publishes() {
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);

    let board = SimBoard::new(START_US);
    board.set_pressure(1);
    let mut peripherals = board.peripherals();
    peripherals.watchdog = Box::new(SoftwareWatchdog::new(move || {
        flag.store(true, Ordering::SeqCst);
    }));

    let mut config = default_config();
    config.watchdog.timeout = Duration::from_millis(300);
    let mut controller = greenhouse_runtime::controller::Controller::new(config, peripherals);
    controller.start().unwrap();

    let mut rig = Rig { board, controller };
    rig.run_until(Duration::from_secs(30), |r| r.board.published().len() == 1);
    assert!(!fired.load(Ordering::SeqCst));

    // Publishing stops; only real time matters to the monitor thread.
    rig.board.set_network_up(false);
    rig.run_for(Duration::from_secs(15));
    std::thread::sleep(Duration::from_millis(800));
    assert!(fired.load(Ordering::SeqCst));
}
