//! Platform Error Types

use std::time::Duration;

use thiserror::Error;

/// Errors from the session, volume and capture layers
#[derive(Error, Debug)]
pub enum AudioError {
    /// A property value carried a type tag the codec does not understand.
    /// Non-fatal: callers skip the property.
    #[error("Unsupported variant type: 0x{0:04X}")]
    UnsupportedVariantType(u16),

    #[error("Endpoint {endpoint} ({name:?}) reports zero input and zero output channels")]
    InvalidEndpointCapabilities { endpoint: u32, name: String },

    /// The platform would not expose a session enumerator even after priming
    #[error("Audio sessions are not exposed for this endpoint")]
    NoSessionsExposed,

    #[error("Interface activation did not complete within {0:?}")]
    ActivationTimeout(Duration),

    #[error("Interface activation failed: {0}")]
    ActivationFailed(String),

    #[error("Format negotiation failed: {0}")]
    FormatNegotiationFailed(String),

    #[error("Capture stream disrupted: {0}")]
    StreamDisrupted(String),

    #[error("Invalid capture state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Volume {value} outside of range [{min}, {max}]")]
    VolumeOutOfRange { value: f32, min: f32, max: f32 },

    #[error("Feature not available on this platform: {0}")]
    FeatureNotAvailable(String),

    #[error("Backend initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[cfg(target_os = "windows")]
    #[error("Windows API error: {0}")]
    Windows(#[from] windows::core::Error),
}

impl AudioError {
    /// True for the "object does not exist (yet)" class of failures
    pub fn is_not_found(&self) -> bool {
        matches!(self, AudioError::NotFound(_))
    }
}

/// Result type alias for platform operations
pub type Result<T> = std::result::Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AudioError::NotFound("Speakers".into());
        assert!(err.to_string().contains("Speakers"));

        let err = AudioError::UnsupportedVariantType(0x4000);
        assert_eq!(err.to_string(), "Unsupported variant type: 0x4000");
    }

    #[test]
    fn test_transition_display() {
        let err = AudioError::InvalidStateTransition {
            from: "Stopped",
            to: "Started",
        };
        assert!(err.to_string().contains("Stopped -> Started"));
    }

    #[test]
    fn test_is_not_found() {
        assert!(AudioError::NotFound("x".into()).is_not_found());
        assert!(!AudioError::NoSessionsExposed.is_not_found());
    }
}
