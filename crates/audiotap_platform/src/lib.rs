//! Audiotap Platform - Audio Sessions and Loopback Capture
//!
//! This crate provides:
//! - Host API and endpoint enumeration with device grouping
//! - Audio session enumeration and session-created notifications
//! - Endpoint and session volume control
//! - Endpoint-wide and process-scoped loopback capture, and input capture
//!
//! # Platform Support
//!
//! | Platform | Endpoints | Sessions | Volume | Endpoint Loopback | Input Capture | Process Loopback |
//! |----------|-----------|----------|--------|-------------------|---------------|------------------|
//! | Windows  | MMDevice  | Yes      | Yes    | Yes               | Yes           | Build 20348+     |
//! | Others   | via cpal (core crate) | No | No | No               | No            | No               |
//!
//! # Architecture
//!
//! The portable modules hold the semantics and talk to the OS through one
//! trait per concern ([`AudioSystem`], [`SessionPlatform`], [`VolumeBackend`],
//! [`CaptureBackend`]). The `windows` module implements all four over WASAPI.
//!
//! ```text
//! CaptureEngine ──spawn──► capture worker
//!                            │ CaptureHandle<B: CaptureBackend>
//!                            ▼
//!                     bounded channel (OverflowPolicy) ──► CaptureStream
//! ```

mod catalog;
mod error;
mod host_api;
mod session;
mod variant;
mod volume;
mod wave_format;

pub mod capture;

#[cfg(target_os = "windows")]
pub mod windows;

pub use capture::{
    ActivationRequest, CaptureBackend, CaptureConfig, CaptureEngine, CaptureHandle, CaptureSource,
    CaptureState, CaptureStream, LoopbackMode, OverflowPolicy, PcmBlock, RawPacket, StreamItem,
    StreamMode,
};
pub use catalog::{
    group_devices, CatalogWarning, Device, Endpoint, EndpointCatalog, EndpointListing, EndpointRef,
};
pub use error::{AudioError, Result};
pub use host_api::{
    keys, AudioSystem, Direction, EndpointId, EndpointRecord, HostApi, HostApiRegistry, Latency,
    SystemSnapshot,
};
pub use session::{
    NotificationHandle, Session, SessionCallback, SessionCreated, SessionManager,
    SessionNotificationRegistration, SessionPlatform, SessionState,
};
pub use variant::{
    datetime_to_filetime, filetime_to_datetime, vt, NoRelease, OwnedVariant, PropertyValue,
    RawVariant, VariantCodec, VariantRelease,
};
pub use volume::{VolumeBackend, VolumeController, VolumeRange, VolumeTarget, SESSION_VOLUME_STEP};
pub use wave_format::{SampleFormat, WaveFormat, WaveFormatExtension};

/// Whether process-scoped loopback can be activated on this machine
pub fn supports_process_loopback() -> bool {
    #[cfg(target_os = "windows")]
    {
        windows::WindowsVersion::current()
            .map(|v| v.supports_process_loopback())
            .unwrap_or(false)
    }
    #[cfg(not(target_os = "windows"))]
    {
        false
    }
}
