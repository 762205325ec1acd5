#![doc = "Single-threaded cooperative control loop for the greenhouse controller."]

pub mod clock;
pub mod controller;
pub mod dispatcher;
pub mod link;
pub mod peripherals;
pub mod report;
pub mod schedule;
pub mod sensor;
pub mod telemetry;
pub mod watchdog;

pub use clock::*;
pub use controller::*;
pub use dispatcher::*;
pub use link::*;
pub use peripherals::*;
pub use report::*;
pub use schedule::*;
pub use sensor::*;
pub use telemetry::*;
pub use watchdog::*;
