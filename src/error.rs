//! Error handling for the GMC monitoring service
//!
//! All device, MQTT and configuration failures are mapped onto a single
//! service error type so the polling loop can treat any cycle failure
//! uniformly (teardown, reconnect, retry).

use thiserror::Error;

/// GMC Monitoring Service Error Type
#[derive(Error, Debug, Clone)]
pub enum GmcSrvError {
    /// Serial port open/read/write failures
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Operation exceeded its deadline
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Device answered with the wrong number of bytes
    #[error("Invalid response length: expected {expected} bytes, got {actual}")]
    ResponseLength { expected: usize, actual: usize },

    /// Device did not acknowledge a command (missing 0xAA sentinel)
    #[error("Device NACK: {0}")]
    DeviceNack(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// MQTT errors
    #[error("MQTT error: {0}")]
    MqttError(String),

    /// CSV data logging errors
    #[error("Data log error: {0}")]
    DataLogError(String),

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, GmcSrvError>;

impl From<std::io::Error> for GmcSrvError {
    fn from(err: std::io::Error) -> Self {
        GmcSrvError::IoError(err.to_string())
    }
}

impl From<tokio_serial::Error> for GmcSrvError {
    fn from(err: tokio_serial::Error) -> Self {
        GmcSrvError::TransportError(err.to_string())
    }
}

impl From<rumqttc::ClientError> for GmcSrvError {
    fn from(err: rumqttc::ClientError) -> Self {
        GmcSrvError::MqttError(err.to_string())
    }
}

impl From<csv::Error> for GmcSrvError {
    fn from(err: csv::Error) -> Self {
        GmcSrvError::DataLogError(err.to_string())
    }
}

impl From<figment::Error> for GmcSrvError {
    fn from(err: figment::Error) -> Self {
        GmcSrvError::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for GmcSrvError {
    fn from(err: serde_json::Error) -> Self {
        GmcSrvError::DataLogError(err.to_string())
    }
}
