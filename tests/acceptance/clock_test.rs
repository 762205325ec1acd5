//! Clock fusion on the running controller.

use super::common::{default_config, Rig, START_US};
use greenhouse_board::SimBoard;
use std::time::Duration;

fn synced_rig(offset_us: i64) -> Rig {
    let board = SimBoard::new(START_US);
    board.set_network_offset(offset_us);
    let mut rig = Rig::with_board(default_config(), board);
    rig.run_for(Duration::from_secs(60));
    assert!(rig.controller.clock().is_settled());
    assert_eq!(rig.controller.clock().offset_us(), offset_us);
    rig
}

#[test]
fn test_drift_is_slewed_after_bootstrap() {
    let mut rig = synced_rig(1_500_000);
    assert_eq!(rig.controller.packet().rtc_offset_post_init, 0);

    rig.board.set_network_offset(3_500_000);

    let mut previous = rig.controller.clock().offset_us();
    let mut saw_intermediate = false;
    let end = rig.board.now_us() + 90_000_000;
    while rig.board.now_us() < end {
        rig.step();
        let offset = rig.controller.clock().offset_us();
        // 100 ms per second over one ~5 s clock period, plus dispatch lag.
        assert!(
            (offset - previous).abs() <= 600_000,
            "offset jumped from {previous} to {offset}"
        );
        saw_intermediate |= offset > 1_500_000 && offset < 3_500_000;
        previous = offset;
    }

    assert!(saw_intermediate);
    assert_eq!(rig.controller.clock().offset_us(), 3_500_000);
    assert_eq!(rig.controller.clock().offset_since_bootstrap(), 2_000_000);
    assert_eq!(rig.controller.packet().rtc_offset_post_init, 2_000_000);
}

#[test]
fn test_drift_reported_in_later_payload() {
    let board = SimBoard::new(START_US);
    board.set_network_offset(-250_000);
    board.set_pressure(90);
    let mut rig = Rig::with_board(default_config(), board);
    rig.run_for(Duration::from_secs(60));
    assert!(rig.payloads().iter().all(|d| d.rtc_offset_post_init == 0));

    rig.board.set_network_offset(-50_000);
    rig.run_until(Duration::from_secs(90), |r| {
        r.payloads().last().map(|d| d.rtc_offset_post_init) == Some(200_000)
    });
    assert_eq!(rig.controller.packet().rtc_offset_post_init, 200_000);
}

#[test]
fn test_silent_time_source_keeps_local_time() {
    let board = SimBoard::new(START_US);
    board.set_network_offset(9_000_000);
    board.set_time_source_replies(false);
    let mut rig = Rig::with_board(default_config(), board);
    rig.run_for(Duration::from_secs(60));

    assert!(rig.controller.status().time_source_ready);
    assert_eq!(rig.controller.time_source().samples(), 0);
    assert_eq!(rig.controller.clock().offset_us(), 0);
    assert!(!rig.controller.clock().is_settled());
    assert_eq!(rig.controller.clock().offset_since_bootstrap(), 0);
}

#[test]
fn test_best_time_across_counter_wrap() {
    let board = SimBoard::new(START_US);
    // Counter wraps about ten seconds after boot.
    board.set_counter_base((1i64 << 32) - 10_000_000 - START_US);
    board.set_network_offset(700_000);
    let mut rig = Rig::with_board(default_config(), board);
    let peripherals = rig.board.peripherals();

    while rig.board.now_us() - START_US < 30_000_000 {
        rig.step();
        let best = rig.controller.clock().best_micros(peripherals.counter.micros());
        let expected = rig.board.now_us() + rig.controller.clock().offset_us();
        assert_eq!(best, expected);
    }
    assert_eq!(rig.controller.clock().offset_us(), 700_000);
}
