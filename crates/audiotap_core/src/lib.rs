//! Audiotap Core - Audio Session and Capture Facade
//!
//! This crate provides the consumer-facing layer over `audiotap_platform`:
//! - Cross-platform host API and endpoint enumeration (via CPAL)
//! - Facade and session configuration
//! - Persisted settings
//! - [`AudioTap`], which wires catalog, sessions, volume and capture to one
//!   set of platform backends
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         AudioTap                             │
//! │  EndpointCatalog   SessionManager   VolumeController         │
//! │        │                 │                 │                 │
//! │  AudioSystem      SessionPlatform     VolumeBackend          │
//! │  (WASAPI / CPAL)  (WASAPI)            (WASAPI)               │
//! └──────────────────────────────────────────────────────────────┘
//!                             │
//!                      CaptureEngine ──worker──► CaptureStream
//!                                  (bounded crossbeam channel)
//! ```

mod config;
mod device;
mod error;
mod settings;
mod tap;

pub use config::{SessionConfig, TapConfig};
pub use device::CpalAudioSystem;
pub use error::{TapError, TapResult};
pub use settings::TapSettings;
pub use tap::{AudioTap, NoSessionApi, SystemTap};

// Re-export the platform types that appear in the facade API
pub use audiotap_platform::{
    AudioError, CaptureConfig, CaptureStream, Device, Direction, Endpoint, EndpointRef, HostApi,
    LoopbackMode, OverflowPolicy, PcmBlock, SampleFormat, Session, SessionCreated, SessionState, StreamMode,
    VolumeTarget, WaveFormat,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let config = TapConfig::default();
        assert_eq!(config.capture, CaptureConfig::default());
        let _ = TapSettings::default();
    }
}
