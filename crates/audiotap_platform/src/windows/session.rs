//! WASAPI Audio Sessions
//!
//! Session enumeration and session-created notifications over
//! `IAudioSessionManager2`. Every call builds its own COM objects and drops
//! them before returning, except notification registrations, which hold the
//! session manager until they are unregistered.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use windows::core::{implement, Interface, HRESULT, PWSTR};
use windows::Win32::Foundation::{BOOL, E_POINTER};
use windows::Win32::Media::Audio::{
    AudioSessionStateActive, AudioSessionStateExpired, IAudioClient, IAudioSessionControl,
    IAudioSessionControl2, IAudioSessionManager2, IAudioSessionNotification,
    IAudioSessionNotification_Impl, ISimpleAudioVolume, AUDCLNT_SHAREMODE_SHARED,
};
use windows::Win32::System::Com::{CoTaskMemFree, CLSCTX_ALL};

use super::com::ComGuard;
use super::endpoint::{device_enumerator, resolve_device, MixFormat};
use super::process::process_name;
use crate::catalog::EndpointRef;
use crate::error::{AudioError, Result};
use crate::session::{
    NotificationHandle, Session, SessionCallback, SessionCreated, SessionPlatform, SessionState,
};

/// `HRESULT_FROM_WIN32(ERROR_NOT_FOUND)`, returned while no session container exists
const E_NOT_FOUND: HRESULT = HRESULT(0x8007_0490_u32 as i32);

/// Buffer for the throwaway priming client
const PRIMING_BUFFER: Duration = Duration::from_millis(100);

fn map_enumerator_error(endpoint: &EndpointRef, e: windows::core::Error) -> AudioError {
    if e.code() == E_NOT_FOUND || e.code() == E_POINTER {
        AudioError::NotFound(format!("session enumerator for {:?}", endpoint))
    } else {
        AudioError::Internal(format!("Failed to get session enumerator: {}", e))
    }
}

fn session_manager(endpoint: &EndpointRef) -> Result<IAudioSessionManager2> {
    let enumerator = device_enumerator()?;
    let device = resolve_device(&enumerator, endpoint)?;
    unsafe {
        device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| AudioError::Internal(format!("Failed to activate session manager: {}", e)))
    }
}

/// Copy and free a COM-allocated string; empty strings become `None`
unsafe fn take_pwstr(value: PWSTR) -> Option<String> {
    if value.is_null() {
        return None;
    }
    let text = value.to_string().ok().filter(|s| !s.is_empty());
    CoTaskMemFree(Some(value.as_ptr() as *const _));
    text
}

/// Controls of every session on `endpoint`, with their owning pid
///
/// COM must be initialized on the calling thread.
pub(crate) fn session_controls(endpoint: &EndpointRef) -> Result<Vec<(u32, IAudioSessionControl2)>> {
    let manager = session_manager(endpoint)?;
    let sessions = unsafe {
        manager
            .GetSessionEnumerator()
            .map_err(|e| map_enumerator_error(endpoint, e))?
    };
    let count = unsafe {
        sessions
            .GetCount()
            .map_err(|e| AudioError::Internal(format!("Failed to get session count: {}", e)))?
    };

    let mut controls = Vec::with_capacity(count.max(0) as usize);
    for i in 0..count {
        let Ok(control) = (unsafe { sessions.GetSession(i) }) else {
            continue;
        };
        let Ok(control2) = control.cast::<IAudioSessionControl2>() else {
            continue;
        };
        let Ok(pid) = (unsafe { control2.GetProcessId() }) else {
            continue;
        };
        controls.push((pid, control2));
    }
    Ok(controls)
}

fn session_snapshot(endpoint: &EndpointRef, pid: u32, control: &IAudioSessionControl2) -> Session {
    let state = match unsafe { control.GetState() } {
        Ok(s) if s == AudioSessionStateActive => SessionState::Active,
        Ok(s) if s == AudioSessionStateExpired => SessionState::Expired,
        _ => SessionState::Inactive,
    };

    let display_name = unsafe { control.GetDisplayName().ok().and_then(|p| take_pwstr(p)) };
    let icon_path = unsafe { control.GetIconPath().ok().and_then(|p| take_pwstr(p)) };

    let (volume, muted) = match control.cast::<ISimpleAudioVolume>() {
        Ok(simple) => unsafe {
            (
                simple.GetMasterVolume().unwrap_or(1.0),
                simple.GetMute().map(|m: BOOL| m.as_bool()).unwrap_or(false),
            )
        },
        Err(_) => (1.0, false),
    };

    Session {
        endpoint: endpoint.clone(),
        pid,
        process_name: process_name(pid),
        display_name,
        icon_path,
        state,
        volume,
        muted,
    }
}

/// Session platform over WASAPI
#[derive(Debug, Default)]
pub struct WasapiSessionPlatform;

impl WasapiSessionPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl SessionPlatform for WasapiSessionPlatform {
    fn enumerate(&self, endpoint: &EndpointRef) -> Result<Vec<Session>> {
        let _com = ComGuard::new()?;
        Ok(session_controls(endpoint)?
            .iter()
            // PID 0 is the system sounds session
            .filter(|(pid, _)| *pid != 0)
            .map(|(pid, control)| session_snapshot(endpoint, *pid, control))
            .collect())
    }

    fn prime_default_session(&self, endpoint: &EndpointRef) -> Result<()> {
        let _com = ComGuard::new()?;
        let manager = session_manager(endpoint)?;
        let _control: IAudioSessionControl = unsafe { manager.GetAudioSessionControl(None, 0)? };
        Ok(())
    }

    fn prime_with_audio_client(&self, endpoint: &EndpointRef, pid: u32) -> Result<()> {
        let _com = ComGuard::new()?;
        let enumerator = device_enumerator()?;
        let device = resolve_device(&enumerator, endpoint)?;
        let client: IAudioClient = unsafe { device.Activate(CLSCTX_ALL, None)? };

        let format = MixFormat::of(&client)?;
        let hns = PRIMING_BUFFER.as_nanos() as i64 / 100;
        let result = unsafe {
            client.Initialize(AUDCLNT_SHAREMODE_SHARED, 0, hns, 0, format.as_ptr(), None)
        };
        tracing::debug!("Opened priming client on {:?} for pid {}: {:?}", endpoint, pid, result.is_ok());
        result?;
        Ok(())
    }

    fn register_notification(
        &self,
        endpoint: &EndpointRef,
        callback: SessionCallback,
    ) -> Result<Box<dyn NotificationHandle>> {
        let com = ComGuard::new()?;
        let manager = session_manager(endpoint)?;

        // Notifications are only delivered once the enumerator has been read
        if let Err(e) = unsafe { manager.GetSessionEnumerator() } {
            tracing::debug!("Session enumerator unavailable before registration: {}", e);
        }

        let notifier: IAudioSessionNotification = SessionNotifier {
            endpoint: endpoint.clone(),
            callback,
        }
        .into();
        unsafe { manager.RegisterSessionNotification(&notifier)? };

        Ok(Box::new(WasapiNotificationHandle {
            manager: Some(manager),
            notifier,
            _com: com,
        }))
    }
}

#[implement(IAudioSessionNotification)]
struct SessionNotifier {
    endpoint: EndpointRef,
    callback: SessionCallback,
}

impl IAudioSessionNotification_Impl for SessionNotifier_Impl {
    fn OnSessionCreated(&self, newsession: Option<&IAudioSessionControl>) -> windows::core::Result<()> {
        let control2 = newsession.and_then(|s| s.cast::<IAudioSessionControl2>().ok());
        let pid = control2.as_ref().and_then(|c| unsafe { c.GetProcessId().ok() });
        let display_name = control2
            .as_ref()
            .and_then(|c| unsafe { c.GetDisplayName().ok().and_then(|p| take_pwstr(p)) });

        let event = SessionCreated {
            endpoint: self.endpoint.clone(),
            pid,
            display_name,
        };

        // Never unwind into the audio service
        if catch_unwind(AssertUnwindSafe(|| (self.callback)(event))).is_err() {
            tracing::error!("Session notification callback panicked");
        }
        Ok(())
    }
}

struct WasapiNotificationHandle {
    manager: Option<IAudioSessionManager2>,
    notifier: IAudioSessionNotification,
    _com: ComGuard,
}

impl NotificationHandle for WasapiNotificationHandle {
    fn unregister(&mut self) -> Result<()> {
        match self.manager.take() {
            Some(manager) => unsafe {
                manager.UnregisterSessionNotification(&self.notifier)?;
                Ok(())
            },
            None => Ok(()),
        }
    }
}
