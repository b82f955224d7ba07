//! Process-Scoped Loopback
//!
//! Activation goes through `ActivateAudioInterfaceAsync` on the virtual
//! process-loopback device with an activation blob naming the target pid.
//! The completion handler only signals; the result is fetched on the
//! activating thread once the signal arrives or the timeout passes.
//!
//! The virtual device cannot report a mix format, so the client is
//! initialized with the configured fallback format and runs event-driven.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use windows::core::{implement, Interface, IUnknown, HRESULT, PCWSTR, PROPVARIANT};
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_FAILED};
use windows::Win32::Media::Audio::{
    ActivateAudioInterfaceAsync, IActivateAudioInterfaceAsyncOperation,
    IActivateAudioInterfaceCompletionHandler, IActivateAudioInterfaceCompletionHandler_Impl,
    IAudioCaptureClient, IAudioClient, AUDCLNT_SHAREMODE_SHARED, AUDCLNT_STREAMFLAGS_EVENTCALLBACK,
    AUDCLNT_STREAMFLAGS_LOOPBACK, VIRTUAL_AUDIO_DEVICE_PROCESS_LOOPBACK, WAVEFORMATEX,
};
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject};

use super::capture::{hns, read_capture_packet};
use super::com::ComGuard;
use super::endpoint::mix_format;
use super::process::ProcessWatch;
use super::version::WindowsVersion;
use crate::capture::{completion, ActivationRequest, CaptureBackend, Completer, RawPacket};
use crate::error::{AudioError, Result};
use crate::variant::{OwnedVariant, RawVariant};
use crate::wave_format::WaveFormat;

/// Completion handler for one activation
///
/// The platform holds a reference to the handler until `ActivateCompleted`
/// runs. The activation parameters are owned here so they outlive a caller
/// that stopped waiting.
#[implement(IActivateAudioInterfaceCompletionHandler)]
struct ActivationHandler {
    completer: Mutex<Option<Completer<()>>>,
    _params: Arc<OwnedVariant>,
}

impl IActivateAudioInterfaceCompletionHandler_Impl for ActivationHandler_Impl {
    fn ActivateCompleted(
        &self,
        _operation: Option<&IActivateAudioInterfaceAsyncOperation>,
    ) -> windows::core::Result<()> {
        if let Some(completer) = self.completer.lock().take() {
            completer.complete(());
        }
        Ok(())
    }
}

/// Loopback capture of one process tree
pub struct ProcessLoopback {
    request: ActivationRequest,
    watch: ProcessWatch,
    fallback: WaveFormat,
    client: Option<IAudioClient>,
    capture: Option<IAudioCaptureClient>,
    event: Option<HANDLE>,
    block_align: usize,
    _com: ComGuard,
}

impl ProcessLoopback {
    /// Activate a process-loopback client, waiting at most `timeout`
    pub fn activate(request: ActivationRequest, timeout: Duration, fallback: WaveFormat) -> Result<Self> {
        let version = WindowsVersion::current()?;
        if !version.supports_process_loopback() {
            return Err(AudioError::FeatureNotAvailable(format!(
                "Process loopback requires build {} or later, running {}",
                WindowsVersion::MIN_PROCESS_LOOPBACK_BUILD,
                version
            )));
        }

        let watch = ProcessWatch::open(request.pid).map_err(|e| {
            AudioError::ActivationFailed(format!("Target process unavailable: {}", e))
        })?;

        let com = ComGuard::multithreaded()?;
        let client = activate_client(&request, timeout)?;

        tracing::info!(
            "Activated process loopback for pid {} ({:?})",
            request.pid,
            request.mode
        );

        Ok(Self {
            request,
            watch,
            fallback,
            client: Some(client),
            capture: None,
            event: None,
            block_align: 0,
            _com: com,
        })
    }

    pub fn pid(&self) -> u32 {
        self.request.pid
    }

    fn client(&self) -> Result<&IAudioClient> {
        self.client
            .as_ref()
            .ok_or_else(|| AudioError::Internal("Audio client already released".into()))
    }
}

fn activate_client(request: &ActivationRequest, timeout: Duration) -> Result<IAudioClient> {
    let params = Arc::new(request.to_variant()?);
    let params_ptr = (params.raw() as *const RawVariant).cast::<PROPVARIANT>();

    let (completer, pending) = completion::<()>();
    let handler: IActivateAudioInterfaceCompletionHandler = ActivationHandler {
        completer: Mutex::new(Some(completer)),
        _params: Arc::clone(&params),
    }
    .into();

    let operation = unsafe {
        ActivateAudioInterfaceAsync(
            VIRTUAL_AUDIO_DEVICE_PROCESS_LOOPBACK,
            &IAudioClient::IID,
            Some(params_ptr),
            &handler,
        )
        .map_err(|e| AudioError::ActivationFailed(format!("ActivateAudioInterfaceAsync: {}", e)))?
    };

    pending.wait(timeout)?;

    let mut result = HRESULT(0);
    let mut activated: Option<IUnknown> = None;
    unsafe {
        operation
            .GetActivateResult(&mut result, &mut activated)
            .map_err(|e| AudioError::ActivationFailed(format!("GetActivateResult: {}", e)))?;
    }
    result
        .ok()
        .map_err(|e| AudioError::ActivationFailed(format!("Activation for pid {}: {}", request.pid, e)))?;
    drop(params);

    activated
        .ok_or_else(|| AudioError::ActivationFailed("Activation returned no interface".into()))?
        .cast::<IAudioClient>()
        .map_err(|e| AudioError::ActivationFailed(format!("Activated interface is not IAudioClient: {}", e)))
}

impl CaptureBackend for ProcessLoopback {
    fn negotiate(&mut self, block: Duration) -> Result<WaveFormat> {
        let client = self.client()?;

        let format = match mix_format(client) {
            Ok(format) => format,
            Err(e) => {
                tracing::debug!("No mix format on process loopback ({}), using fallback", e);
                self.fallback
            }
        };
        let bytes = format.to_bytes();

        unsafe {
            client
                .Initialize(
                    AUDCLNT_SHAREMODE_SHARED,
                    AUDCLNT_STREAMFLAGS_LOOPBACK | AUDCLNT_STREAMFLAGS_EVENTCALLBACK,
                    hns(block),
                    0,
                    bytes.as_ptr().cast::<WAVEFORMATEX>(),
                    None,
                )
                .map_err(|e| {
                    AudioError::FormatNegotiationFailed(format!(
                        "Process loopback initialization for pid {} failed: {}",
                        self.request.pid, e
                    ))
                })?;

            let event = CreateEventW(None, false, false, PCWSTR::null())?;
            self.event = Some(event);
            client.SetEventHandle(event)?;

            self.capture = Some(client.GetService::<IAudioCaptureClient>()?);
        }

        self.block_align = usize::from(format.block_align);
        Ok(format)
    }

    fn start(&mut self) -> Result<()> {
        unsafe { self.client()?.Start()? };
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> Result<()> {
        let event = self
            .event
            .ok_or_else(|| AudioError::Internal("Capture event not created".into()))?;
        let millis = timeout.as_millis().min(u128::from(u32::MAX - 1)) as u32;
        if unsafe { WaitForSingleObject(event, millis) } == WAIT_FAILED {
            return Err(AudioError::StreamDisrupted(format!(
                "Waiting on capture event failed: {}",
                windows::core::Error::from_win32()
            )));
        }
        Ok(())
    }

    fn read_packet(&mut self) -> Result<Option<RawPacket>> {
        let capture = self
            .capture
            .as_ref()
            .ok_or_else(|| AudioError::Internal("Capture client not initialized".into()))?;
        read_capture_packet(capture, self.block_align)
    }

    fn stop(&mut self) -> Result<()> {
        unsafe { self.client()?.Stop()? };
        Ok(())
    }

    fn release(&mut self) {
        drop(self.capture.take());
        drop(self.client.take());
        if let Some(event) = self.event.take() {
            unsafe {
                let _ = CloseHandle(event);
            }
        }
        tracing::debug!("Released process loopback for pid {}", self.request.pid);
    }

    fn source_alive(&self) -> bool {
        self.watch.is_alive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::LoopbackMode;

    #[test]
    fn test_handler_owns_params_past_timeout() {
        let params = Arc::new(ActivationRequest::new(4242, LoopbackMode::IncludeTree).to_variant().unwrap());
        let (completer, pending) = completion::<()>();
        let handler: IActivateAudioInterfaceCompletionHandler = ActivationHandler {
            completer: Mutex::new(Some(completer)),
            _params: Arc::clone(&params),
        }
        .into();

        assert!(matches!(
            pending.wait(Duration::from_millis(1)),
            Err(AudioError::ActivationTimeout(_))
        ));
        assert_eq!(Arc::strong_count(&params), 2);

        // Late callback after the waiter is gone
        unsafe { handler.ActivateCompleted(None::<&IActivateAudioInterfaceAsyncOperation>) }.unwrap();
        drop(handler);
        assert_eq!(Arc::strong_count(&params), 1);
    }
}
