//! Configuration files feeding a running controller.

use super::common::{Rig, START_US};
use greenhouse_board::SimBoard;
use greenhouse_common::config::{
    ConfigError, ControllerConfig, IntervalConfig, MAX_SCHEDULE_INTERVALS,
};
use greenhouse_common::time::{Hms, ScheduleInterval};
use std::io::Write;
use std::time::Duration;

fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_json_file_drives_controller() {
    let file = write_config(
        ".json",
        r#"{
            "wifi": { "ssid": "tunnel-3", "password": "pw" },
            "mqtt": { "broker": "10.0.0.2", "topic": "farm/tunnel-3", "keepAlive": "30s" },
            "pumpSchedule": {
                "utcOffset": -1,
                "pump": [
                    { "start": { "hour": 21, "minute": 0 }, "end": { "hour": 21, "minute": 1, "second": 30 } },
                    { "start": { "hour": 23, "minute": 30 }, "end": { "hour": 0, "minute": 15 } }
                ]
            },
            "watchdog": { "timeout": "2h" },
            "dispatcher": { "maxSleep": "2s" }
        }"#,
    );
    let config = ControllerConfig::from_file(file.path()).unwrap();

    assert_eq!(config.mqtt.keep_alive, Duration::from_secs(30));
    assert_eq!(config.mqtt.port, 1883);
    assert_eq!(config.ntp.server, "pool.ntp.org");
    assert_eq!(
        config.schedule().intervals(),
        [
            ScheduleInterval::new(22 * 3600, 22 * 3600 + 90),
            ScheduleInterval::new(30 * 60, 3600 + 15 * 60),
        ]
    );

    let board = SimBoard::new(START_US);
    board.set_pressure(3);
    let mut rig = Rig::with_board(config, board);
    assert_eq!(rig.board.watchdog_timeout(), Some(Duration::from_secs(7200)));

    for _ in 0..200 {
        assert!(rig.step() <= Duration::from_secs(2));
    }
    let published = rig.board.published();
    assert!(!published.is_empty());
    assert!(published.iter().all(|m| m.topic == "farm/tunnel-3"));
}

#[test]
fn test_toml_round_trip_through_file() {
    let mut config = ControllerConfig::default();
    config.mqtt.broker = "broker.lan".into();
    config.pump_schedule.utc_offset = 2;
    config.pump_schedule.pump = vec![IntervalConfig {
        start: Hms::new(6, 0, 0),
        end: Hms::new(6, 10, 0),
    }];

    let text = config.to_toml().unwrap();
    let file = write_config(".toml", &text);
    let loaded = ControllerConfig::from_file(file.path()).unwrap();

    assert_eq!(loaded, config);
    assert_eq!(loaded.watchdog.timeout, Duration::from_secs(42_717));
    assert_eq!(
        loaded.schedule().intervals(),
        [ScheduleInterval::new(4 * 3600, 4 * 3600 + 600)]
    );
}

#[test]
fn test_schedule_is_capped() {
    let pump: Vec<String> = (0..25)
        .map(|h| format!(r#"{{"start": {{"hour": {h}}}, "end": {{"hour": {h}, "minute": 5}}}}"#))
        .collect();
    let json = format!(r#"{{"pumpSchedule": {{"pump": [{}]}}}}"#, pump.join(","));
    let file = write_config(".json", &json);

    let config = ControllerConfig::from_file(file.path()).unwrap();
    assert_eq!(config.pump_schedule.pump.len(), 25);

    let rig = Rig::new(config);
    assert_eq!(rig.controller.schedule().len(), MAX_SCHEDULE_INTERVALS);
    assert_eq!(rig.controller.schedule().intervals()[19].start_sec, 19 * 3600);
}

#[test]
fn test_invalid_files_are_rejected() {
    let broken = write_config(".json", "{ \"mqtt\": ");
    assert!(matches!(
        ControllerConfig::from_file(broken.path()),
        Err(ConfigError::Json(_))
    ));

    let wrong_duration = write_config(".toml", "[watchdog]\ntimeout = \"soon\"\n");
    assert!(matches!(
        ControllerConfig::from_file(wrong_duration.path()),
        Err(ConfigError::Parse(_))
    ));

    let missing = std::env::temp_dir().join("greenhouse-missing-config.json");
    assert!(matches!(
        ControllerConfig::from_file(&missing),
        Err(ConfigError::Io { .. })
    ));
}
