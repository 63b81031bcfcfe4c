//! Error types for the fan bridge

use std::time::Duration;

use thiserror::Error;

/// Result type alias for the fan bridge
pub type Result<T> = std::result::Result<T, FanBridgeError>;

/// Main error type for the fan bridge
#[derive(Error, Debug)]
pub enum FanBridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid PWM value {0}: expected 0-100")]
    InvalidPwm(u8),

    #[error("Sensor data unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Failed to deliver command to actuator: {0}")]
    SendFailure(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}
