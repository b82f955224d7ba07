//! Facade Configuration

use std::time::Duration;

use audiotap_platform::CaptureConfig;
use serde::{Deserialize, Serialize};

/// Session enumeration tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Pause after opening the priming audio client before the last retry
    pub retry_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { retry_delay_ms: 10 }
    }
}

impl SessionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.retry_delay_ms > 1_000 {
            return Err(format!("Invalid session retry delay: {} ms", self.retry_delay_ms));
        }
        Ok(())
    }
}

/// Overall facade configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    pub capture: CaptureConfig,
    pub session: SessionConfig,
}

impl TapConfig {
    /// Small blocks for live metering
    pub fn low_latency() -> Self {
        Self {
            capture: CaptureConfig::low_latency(),
            session: SessionConfig::default(),
        }
    }

    /// Large lossless queue for recording
    pub fn archival() -> Self {
        Self {
            capture: CaptureConfig::archival(),
            session: SessionConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.capture.validate()?;
        self.session.validate()
    }
}
