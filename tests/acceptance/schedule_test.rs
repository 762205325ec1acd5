//! Pump schedule driven by fused network time.

use super::common::{config_with_interval, Rig, START_SECOND_OF_DAY, START_US};
use greenhouse_board::SimBoard;
use greenhouse_common::time::{time_of_day_from_epoch_micros, Hms};
use std::time::Duration;

fn best_time_of_day(rig: &Rig) -> u32 {
    let counter = rig.board.peripherals().counter.micros();
    time_of_day_from_epoch_micros(rig.controller.clock().best_micros(counter))
}

#[test]
fn test_pump_follows_network_time() {
    // 00:15-00:16 at UTC+2 is 22:15:00-22:16:00 UTC.
    let config = config_with_interval(Hms::new(0, 15, 0), Hms::new(0, 16, 0), 2);
    let board = SimBoard::new(START_US);
    // Network time is 100 s ahead: 22:15:00 UTC at boot.
    board.set_network_offset(100_000_000);
    let mut rig = Rig::with_board(config, board);
    assert_eq!(rig.controller.schedule().intervals()[0].start_sec, 80_100);

    // Before sync the local clock is used: still 22:13:2x.
    rig.run_for(Duration::from_secs(2));
    assert_eq!(rig.board.valve(), Some(false));
    assert!(!rig.controller.status().pumping);
    let waiting = rig.controller.packet().sec_to_next_pump;
    assert!((95..=100).contains(&waiting), "sec_to_next_pump = {waiting}");

    let before_on = rig.controller.packet().version();
    rig.run_until(Duration::from_secs(15), |r| r.board.valve() == Some(true));
    assert!(rig.controller.status().pumping);
    assert_eq!(rig.controller.packet().sec_to_next_pump, 0);
    assert!(rig.controller.packet().version() > before_on);

    let sent = rig.board.published().len();
    rig.run_until(Duration::from_secs(15), |r| r.board.published().len() > sent);
    let on = rig.payloads()[sent];
    assert_eq!(on.sec_to_next_pump, 0);

    rig.run_until(Duration::from_secs(70), |r| r.board.valve() == Some(false));
    let switched_off_at = best_time_of_day(&rig);
    assert!(
        (80_160..=80_161).contains(&switched_off_at),
        "switched off at {switched_off_at}"
    );
    assert!(!rig.controller.status().pumping);

    let sent = rig.board.published().len();
    rig.run_until(Duration::from_secs(15), |r| r.board.published().len() > sent);
    let off = rig.payloads()[sent];
    assert!(off.ping_count > on.ping_count);
    assert!(off.sec_to_next_pump > 86_000);

    // The whole window took about one minute of local time.
    let elapsed_s = (rig.board.now_us() - START_US) / 1_000_000;
    assert!((60..80).contains(&elapsed_s), "elapsed {elapsed_s}s");
}

#[test]
fn test_valve_written_every_tick() {
    let config = config_with_interval(Hms::new(3, 0, 0), Hms::new(3, 5, 0), 0);
    let mut rig = Rig::new(config);
    rig.run_for(Duration::from_secs(10));

    // Boot write plus one write per ~500 ms tick.
    assert!(rig.board.valve_writes() >= 16, "writes = {}", rig.board.valve_writes());
    assert_eq!(rig.board.valve(), Some(false));
    assert!(!rig.controller.status().pumping);
}

#[test]
fn test_window_across_midnight() {
    // 23:59:50-00:00:10 UTC, booting 30 s before midnight.
    let config = config_with_interval(Hms::new(23, 59, 50), Hms::new(0, 0, 10), 0);
    let midnight_us = START_US + i64::from(86_400 - START_SECOND_OF_DAY) * 1_000_000;
    let mut rig = Rig::with_board(config, SimBoard::new(midnight_us - 30_000_000));
    assert!(rig.controller.schedule().intervals()[0].crosses_midnight());

    rig.run_until(Duration::from_secs(30), |r| r.board.valve() == Some(true));
    let on_at = best_time_of_day(&rig);
    assert!((86_390..86_400).contains(&on_at), "switched on at {on_at}");

    rig.run_until(Duration::from_secs(30), |r| r.board.valve() == Some(false));
    let off_at = best_time_of_day(&rig);
    assert!((10..=11).contains(&off_at), "switched off at {off_at}");
    assert!(!rig.controller.status().pumping);
}

#[test]
fn test_zero_length_window_never_pumps() {
    let at = Hms::new(22, 13, 30);
    let config = config_with_interval(at, at, 0);
    let mut rig = Rig::new(config);
    rig.run_for(Duration::from_secs(30));

    assert_eq!(rig.board.valve(), Some(false));
    assert!(!rig.controller.status().pumping);
    // Past the window start, the next occurrence is tomorrow.
    assert!(rig.controller.packet().sec_to_next_pump > 86_000);
}
