//! Windows Platform Backend - WASAPI
//!
//! Platform implementations behind the portable modules:
//!
//! | Portable seam                        | WASAPI implementation   |
//! |--------------------------------------|-------------------------|
//! | [`AudioSystem`](crate::AudioSystem)         | [`WasapiAudioSystem`]     |
//! | [`SessionPlatform`](crate::SessionPlatform) | [`WasapiSessionPlatform`] |
//! | [`VolumeBackend`](crate::VolumeBackend)     | [`WasapiVolume`]          |
//! | [`CaptureBackend`](crate::CaptureBackend)   | [`EndpointCapture`], [`ProcessLoopback`]  |
//!
//! # Threading
//!
//! Queries initialize an apartment-threaded COM context for the duration of
//! the call. Capture clients are created on the capture worker, join the
//! multithreaded apartment, and never leave that thread.
//!
//! # Process Loopback
//!
//! Requires build 20348 or later. Older systems report
//! `FeatureNotAvailable`; endpoint capture works everywhere.

mod activation;
mod capture;
pub mod com;
mod endpoint;
pub mod process;
mod session;
pub mod version;
mod volume;


pub use activation::ProcessLoopback;
pub use capture::EndpointCapture;
pub use com::ComGuard;
pub use endpoint::WasapiAudioSystem;
pub use process::{process_name, ProcessWatch};
pub use session::WasapiSessionPlatform;
pub use version::WindowsVersion;
pub use volume::WasapiVolume;
