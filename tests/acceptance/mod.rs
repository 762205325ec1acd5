//! Scenario tests on the simulated board.

mod clock_test;
mod common;
mod config_test;
mod end_to_end_test;
mod schedule_test;
mod telemetry_test;
