//! Boot, association, synchronisation and link recovery.

use super::common::{default_config, Rig, START_US, TOPIC};
use greenhouse_board::SimBoard;
use greenhouse_common::state::{LinkState, SessionState};
use greenhouse_runtime::dispatcher::TaskId;
use greenhouse_runtime::schedule::NO_NEXT_PUMP;
use std::time::Duration;

#[test]
fn test_boot_without_network() {
    let board = SimBoard::new(START_US);
    board.set_network_up(false);
    board.set_pressure(120);
    let mut rig = Rig::with_board(default_config(), board);

    rig.run_for(Duration::from_secs(30));

    assert_eq!(rig.board.valve(), Some(false));
    assert_eq!(rig.board.watchdog_timeout(), Some(Duration::from_secs(42_717)));
    assert!(rig.board.association_requests() >= 5);
    assert!(!rig.board.time_source_running());
    assert_eq!(rig.board.connect_requests(), 0);
    assert!(rig.board.published().is_empty());
    assert_eq!(rig.board.keep_alives(), 0);

    let status = rig.controller.status();
    assert!(!status.network_ready);
    assert!(!status.time_source_ready);
    assert!(!status.telemetry_ready);
    assert!(!status.pumping);
    assert_eq!(rig.controller.network().state(), LinkState::Attempting);
    assert_eq!(rig.controller.clock().offset_us(), 0);

    // The reading is tracked and re-reported even with nothing to publish to.
    assert_eq!(rig.controller.packet().tank_pressure(), 120);
    assert!(rig.controller.packet().version() >= 2);
}

#[test]
fn test_first_publish_after_sync() {
    let board = SimBoard::new(START_US);
    board.set_network_offset(1_500_000);
    board.set_pressure(321);
    let mut rig = Rig::with_board(default_config(), board);

    rig.run_until(Duration::from_secs(10), |r| !r.board.published().is_empty());
    let data = rig.payloads()[0];
    assert_eq!(data.ping_count, 1);
    assert_eq!(data.tank_pressure, 321);
    assert_eq!(data.sec_to_next_pump, NO_NEXT_PUMP);
    assert_eq!(data.rtc_offset_post_init, 0);
    assert_eq!(rig.board.published()[0].topic, TOPIC);
    assert_eq!(rig.board.keep_alives(), 1);
    assert_eq!(rig.controller.telemetry().last_sent_version(), 1);

    rig.run_for(Duration::from_secs(20));

    let status = rig.controller.status();
    assert!(status.network_ready);
    assert!(status.time_source_ready);
    assert!(status.telemetry_ready);
    assert!(rig.board.time_source_running());
    assert_eq!(rig.controller.clock().offset_us(), 1_500_000);

    // The steady reading keeps going out.
    let published = rig.board.published().len();
    assert!(published >= 2, "published {published}");
    assert_eq!(rig.board.keep_alives(), u64::try_from(published).unwrap());
    assert!(rig.payloads().iter().all(|d| d.tank_pressure == 321));
}

#[test]
fn test_payload_wire_keys() {
    let board = SimBoard::new(START_US);
    board.set_pressure(7);
    let mut rig = Rig::with_board(default_config(), board);
    rig.run_until(Duration::from_secs(30), |r| !r.board.published().is_empty());

    let raw = &rig.board.published()[0].payload;
    let value: serde_json::Value = serde_json::from_slice(raw).unwrap();
    let data = value["data"].as_object().unwrap();
    let mut keys: Vec<&str> = data.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(
        keys,
        [
            "ping-count",
            "rtc-offset-post-init",
            "sec-to-next-pump",
            "tank-pressure"
        ]
    );
    assert_eq!(data["tank-pressure"], 7);
}

#[test]
fn test_network_loss_and_recovery() {
    let board = SimBoard::new(START_US);
    board.set_pressure(300);
    let mut rig = Rig::with_board(default_config(), board);
    rig.run_until(Duration::from_secs(30), |r| r.board.published().len() == 1);

    // The time source only notices on its next 20 s poll.
    rig.board.set_network_up(false);
    rig.run_for(Duration::from_secs(25));
    let sent_before_loss = rig.board.published().len();

    assert!(!rig.controller.status().network_ready);
    assert!(!rig.controller.status().time_source_ready);
    assert_eq!(rig.controller.telemetry().state(), SessionState::Disconnected);
    assert!(!rig.board.time_source_running());
    assert!(!rig.board.transport_connected());

    // A reading taken while offline is published after recovery.
    rig.board.set_pressure(400);
    rig.run_for(Duration::from_secs(2));
    assert_eq!(rig.controller.packet().tank_pressure(), 400);
    assert_eq!(rig.board.published().len(), sent_before_loss);

    rig.board.set_network_up(true);
    rig.run_until(Duration::from_secs(30), |r| r.board.published().len() > sent_before_loss);

    let data = rig.payloads();
    assert_eq!(data[sent_before_loss].tank_pressure, 400);
    assert!(data[sent_before_loss].ping_count > data[sent_before_loss - 1].ping_count);
    assert!(rig.controller.status().network_ready);
    assert!(rig.board.time_source_running());
    assert_eq!(rig.controller.network().attempts(), 0);
}

#[test]
fn test_stall_runs_each_tick_once() {
    let mut rig = Rig::new(default_config());
    rig.run_for(Duration::from_secs(20));

    let sensor = TaskId::Sensor.index();
    let ticks_before = rig.controller.metrics().ticks(sensor);
    let clamps_before = rig.controller.metrics().backlog_clamps();

    rig.board.advance(Duration::from_secs(60));
    let stalled_at_ms = rig.now_ms();
    rig.step();

    let metrics = rig.controller.metrics();
    assert_eq!(metrics.ticks(sensor), ticks_before + 1);
    assert_eq!(
        metrics.backlog_clamps(),
        clamps_before + TaskId::COUNT as u64
    );
    assert_eq!(
        rig.controller.dispatcher().next_due(TaskId::Sensor),
        stalled_at_ms - 100 + 517
    );
}

#[test]
fn test_sleep_stays_within_bounds() {
    let mut rig = Rig::new(default_config());
    for _ in 0..500 {
        let sleep = rig.step();
        assert!(sleep >= Duration::from_millis(50), "slept {sleep:?}");
        assert!(sleep <= Duration::from_secs(10), "slept {sleep:?}");
    }
    let snapshot = rig.controller.metrics().snapshot();
    assert_eq!(snapshot.iterations, 500);
    assert!(snapshot.min_sleep_ms.unwrap() >= 50);
}

#[test]
fn test_shutdown_is_safe() {
    let board = SimBoard::new(START_US);
    board.set_pressure(5);
    let mut rig = Rig::with_board(default_config(), board);
    rig.run_until(Duration::from_secs(30), |r| r.board.transport_connected());

    rig.controller.shutdown();

    assert_eq!(rig.board.valve(), Some(false));
    assert!(!rig.board.transport_connected());
    assert!(!rig.board.time_source_running());
    assert!(!rig.controller.is_started());
}
