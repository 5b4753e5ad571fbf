use thiserror::Error;

/// Errors that can occur when working with FTMS bikes
#[derive(Error, Debug)]
pub enum FtmsError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Device not found during scanning
    #[error("FTMS device not found")]
    DeviceNotFound,

    /// Device connection failed
    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// A setting is out of range
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Notification payload could not be decoded
    #[error("Failed to parse payload: {0}")]
    ParseError(String),

    /// Configuration file could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The controller task is no longer running
    #[error("Controller task has shut down")]
    Shutdown,
}

/// Result type for FTMS operations
pub type Result<T> = std::result::Result<T, FtmsError>;

impl FtmsError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_) | Self::ConnectionFailed(_) | Self::DeviceNotFound | Self::Shutdown
        )
    }

    /// Check if this error is recoverable
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::InvalidParameters(_) | Self::ParseError(_)
        )
    }
}
