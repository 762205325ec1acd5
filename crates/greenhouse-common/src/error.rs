use thiserror::Error;

/// Controller error types covering configuration, watchdog, and host I/O failures.
///
/// Subsystem ticks never return these: link loss, publish failures, and clock
/// anomalies are recovered locally by the owning state machine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControllerError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Watchdog could not be armed or has already expired.
    #[error("watchdog error: {0}")]
    Watchdog(String),

    /// Host peripheral I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Convenience type alias for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

impl From<std::io::Error> for ControllerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
