//! Endpoint and Session Volume
//!
//! Endpoint volume goes through `IAudioEndpointVolume` in decibels. Session
//! volume goes through the `ISimpleAudioVolume` of the session owned by the
//! target process, as a linear scalar. Session lookups prime the endpoint
//! the same way session enumeration does.

use std::ptr;

use windows::core::Interface;
use windows::Win32::Media::Audio::Endpoints::IAudioEndpointVolume;
use windows::Win32::Media::Audio::ISimpleAudioVolume;
use windows::Win32::System::Com::CLSCTX_ALL;

use super::com::ComGuard;
use super::endpoint::{device_enumerator, resolve_device};
use super::session::{session_controls, WasapiSessionPlatform};
use crate::catalog::EndpointRef;
use crate::error::{AudioError, Result};
use crate::session::SessionManager;
use crate::volume::{VolumeBackend, VolumeRange, VolumeTarget};

fn endpoint_volume(endpoint: &EndpointRef) -> Result<IAudioEndpointVolume> {
    let enumerator = device_enumerator()?;
    let device = resolve_device(&enumerator, endpoint)?;
    unsafe {
        device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| AudioError::Internal(format!("Failed to activate endpoint volume: {}", e)))
    }
}

fn find_session_volume(endpoint: &EndpointRef, pid: u32) -> Result<ISimpleAudioVolume> {
    session_controls(endpoint)?
        .into_iter()
        .find(|(owner, _)| *owner == pid)
        .ok_or_else(|| AudioError::NotFound(format!("audio session for pid {}", pid)))
        .and_then(|(_, control)| Ok(control.cast::<ISimpleAudioVolume>()?))
}

/// Volume backend over WASAPI
///
/// COM is initialized for the duration of each call, so the backend can be
/// used from any thread.
pub struct WasapiVolume {
    sessions: SessionManager<WasapiSessionPlatform>,
}

impl WasapiVolume {
    pub fn new() -> Self {
        Self {
            sessions: SessionManager::new(WasapiSessionPlatform::new()),
        }
    }

    /// Session volume lookups wait this long after opening a priming client
    pub fn with_retry_delay(retry_delay: std::time::Duration) -> Self {
        Self {
            sessions: SessionManager::with_retry_delay(WasapiSessionPlatform::new(), retry_delay),
        }
    }

    fn session_volume(&self, endpoint: &EndpointRef, pid: u32) -> Result<ISimpleAudioVolume> {
        self.sessions
            .with_priming(endpoint, Some(pid), |_| find_session_volume(endpoint, pid))
    }
}

impl Default for WasapiVolume {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeBackend for WasapiVolume {
    fn range(&self, target: &VolumeTarget) -> Result<VolumeRange> {
        match target {
            VolumeTarget::Endpoint(endpoint) => {
                let _com = ComGuard::new()?;
                let volume = endpoint_volume(endpoint)?;
                let (mut min, mut max, mut step) = (0.0f32, 0.0f32, 0.0f32);
                unsafe { volume.GetVolumeRange(&mut min, &mut max, &mut step)? };
                Ok(VolumeRange { min, max, step })
            }
            VolumeTarget::Session { .. } => Ok(VolumeRange::session()),
        }
    }

    fn volume(&self, target: &VolumeTarget) -> Result<f32> {
        let _com = ComGuard::new()?;
        let level = match target {
            VolumeTarget::Endpoint(endpoint) => unsafe {
                endpoint_volume(endpoint)?.GetMasterVolumeLevel()?
            },
            VolumeTarget::Session { endpoint, pid } => unsafe {
                self.session_volume(endpoint, *pid)?.GetMasterVolume()?
            },
        };
        Ok(level)
    }

    fn set_volume(&self, target: &VolumeTarget, value: f32) -> Result<()> {
        let _com = ComGuard::new()?;
        match target {
            VolumeTarget::Endpoint(endpoint) => unsafe {
                endpoint_volume(endpoint)?.SetMasterVolumeLevel(value, ptr::null())?
            },
            VolumeTarget::Session { endpoint, pid } => unsafe {
                self.session_volume(endpoint, *pid)?.SetMasterVolume(value, ptr::null())?
            },
        }
        tracing::debug!("Set volume of {:?} to {}", target, value);
        Ok(())
    }

    fn is_muted(&self, target: &VolumeTarget) -> Result<bool> {
        let _com = ComGuard::new()?;
        let muted = match target {
            VolumeTarget::Endpoint(endpoint) => unsafe { endpoint_volume(endpoint)?.GetMute()? },
            VolumeTarget::Session { endpoint, pid } => unsafe {
                self.session_volume(endpoint, *pid)?.GetMute()?
            },
        };
        Ok(muted.as_bool())
    }

    fn set_mute(&self, target: &VolumeTarget, muted: bool) -> Result<()> {
        let _com = ComGuard::new()?;
        match target {
            VolumeTarget::Endpoint(endpoint) => unsafe {
                endpoint_volume(endpoint)?.SetMute(muted, ptr::null())?
            },
            VolumeTarget::Session { endpoint, pid } => unsafe {
                self.session_volume(endpoint, *pid)?.SetMute(muted, ptr::null())?
            },
        }
        tracing::debug!("Set mute of {:?} to {}", target, muted);
        Ok(())
    }
}
