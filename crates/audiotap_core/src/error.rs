//! Facade Error Types

use thiserror::Error;

/// Errors surfaced by the [`AudioTap`](crate::AudioTap) facade
#[derive(Error, Debug)]
pub enum TapError {
    #[error("No audio devices found")]
    NoDevicesFound,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Audio backend error: {0}")]
    Audio(#[from] audiotap_platform::AudioError),

    #[error("Host enumeration error: {0}")]
    Host(String),

    #[error("Settings error: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for facade operations
pub type TapResult<T> = Result<T, TapError>;
