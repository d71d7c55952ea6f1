use thiserror::Error;

/// Rejected monitor settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("invalid backend port {0:?}")]
    BackendPort(String),
}

/// Internal fault while handing a record to the aggregator.
/// Logged and counted, never returned to the code that issued the call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordingFailure {
    #[error("record queue is full")]
    QueueFull,
    #[error("aggregator has shut down")]
    Closed,
}
