use std::time::Duration;

use thiserror::Error;

pub type TelemetryResult<T> = Result<T, TelemetryError>;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("Connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Channel closed")]
    ChannelClosed,
}
