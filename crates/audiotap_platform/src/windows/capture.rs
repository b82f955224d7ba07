//! Endpoint Capture
//!
//! Shared-mode capture on one endpoint. A render endpoint is opened in
//! loopback, delivering everything it plays; a capture endpoint is opened
//! directly, delivering what its microphone or line in hears. The client is
//! polled; packets are copied out of the platform buffer and released
//! immediately.

use std::time::Duration;

use windows::Win32::Media::Audio::{
    eCapture, IAudioCaptureClient, IAudioClient, AUDCLNT_BUFFERFLAGS_SILENT,
    AUDCLNT_SHAREMODE_SHARED, AUDCLNT_STREAMFLAGS_LOOPBACK,
};
use windows::Win32::System::Com::CLSCTX_ALL;

use super::com::ComGuard;
use super::endpoint::{data_flow, device_enumerator, resolve_device, MixFormat};
use crate::capture::{CaptureBackend, RawPacket, StreamMode};
use crate::catalog::EndpointRef;
use crate::error::{AudioError, Result};
use crate::host_api::Direction;
use crate::wave_format::WaveFormat;

/// Buffer duration in 100-nanosecond units
pub(crate) fn hns(duration: Duration) -> i64 {
    (duration.as_nanos() / 100) as i64
}

/// Copy the next packet out of `capture` and hand the buffer back
pub(crate) fn read_capture_packet(
    capture: &IAudioCaptureClient,
    block_align: usize,
) -> Result<Option<RawPacket>> {
    let queued = unsafe { capture.GetNextPacketSize()? };
    if queued == 0 {
        return Ok(None);
    }

    let mut data_ptr = std::ptr::null_mut();
    let mut frames = 0u32;
    let mut flags = 0u32;
    unsafe { capture.GetBuffer(&mut data_ptr, &mut frames, &mut flags, None, None)? };

    let silent = flags & AUDCLNT_BUFFERFLAGS_SILENT.0 as u32 != 0;
    let len = frames as usize * block_align;
    let data = if silent || data_ptr.is_null() {
        vec![0u8; len]
    } else {
        // SAFETY: GetBuffer returned `frames` frames of `block_align` bytes,
        // valid until ReleaseBuffer
        unsafe { std::slice::from_raw_parts(data_ptr, len).to_vec() }
    };

    unsafe { capture.ReleaseBuffer(frames)? };

    Ok(Some(RawPacket { data, frames, silent }))
}

impl StreamMode {
    /// `IAudioClient::Initialize` stream flags
    fn stream_flags(&self) -> u32 {
        match self {
            StreamMode::Loopback => AUDCLNT_STREAMFLAGS_LOOPBACK,
            StreamMode::Direct => 0,
        }
    }
}

/// Capture client on one endpoint
///
/// Created on the capture thread, which it never leaves.
pub struct EndpointCapture {
    endpoint: EndpointRef,
    mode: StreamMode,
    client: Option<IAudioClient>,
    capture: Option<IAudioCaptureClient>,
    block_align: usize,
    _com: ComGuard,
}

impl EndpointCapture {
    pub fn open(endpoint: &EndpointRef) -> Result<Self> {
        let com = ComGuard::multithreaded()?;
        let enumerator = device_enumerator()?;
        let device = resolve_device(&enumerator, endpoint)?;
        let direction = if data_flow(&device)? == eCapture {
            Direction::Input
        } else {
            Direction::Output
        };
        let mode = StreamMode::for_direction(direction);
        let client: IAudioClient = unsafe {
            device.Activate(CLSCTX_ALL, None).map_err(|e| {
                AudioError::ActivationFailed(format!("Failed to activate audio client: {}", e))
            })?
        };

        tracing::debug!("Opened {:?} client on {:?}", mode, endpoint);

        Ok(Self {
            endpoint: endpoint.clone(),
            mode,
            client: Some(client),
            capture: None,
            block_align: 0,
            _com: com,
        })
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    fn client(&self) -> Result<&IAudioClient> {
        self.client
            .as_ref()
            .ok_or_else(|| AudioError::Internal("Audio client already released".into()))
    }

    fn capture(&self) -> Result<&IAudioCaptureClient> {
        self.capture
            .as_ref()
            .ok_or_else(|| AudioError::Internal("Capture client not initialized".into()))
    }
}

impl CaptureBackend for EndpointCapture {
    fn negotiate(&mut self, block: Duration) -> Result<WaveFormat> {
        let client = self.client()?;
        let mix = MixFormat::of(client)?;
        let format = mix.format()?;

        unsafe {
            client
                .Initialize(
                    AUDCLNT_SHAREMODE_SHARED,
                    self.mode.stream_flags(),
                    hns(block),
                    0,
                    mix.as_ptr(),
                    None,
                )
                .map_err(|e| {
                    AudioError::FormatNegotiationFailed(format!(
                        "{:?} initialization on {:?} failed: {}",
                        self.mode, self.endpoint, e
                    ))
                })?;
        }

        let capture: IAudioCaptureClient = unsafe { client.GetService()? };
        self.capture = Some(capture);
        self.block_align = usize::from(format.block_align);
        Ok(format)
    }

    fn start(&mut self) -> Result<()> {
        unsafe { self.client()?.Start()? };
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> Result<()> {
        if unsafe { self.capture()?.GetNextPacketSize()? } == 0 {
            std::thread::sleep(timeout);
        }
        Ok(())
    }

    fn read_packet(&mut self) -> Result<Option<RawPacket>> {
        read_capture_packet(self.capture()?, self.block_align)
    }

    fn stop(&mut self) -> Result<()> {
        unsafe { self.client()?.Stop()? };
        Ok(())
    }

    fn release(&mut self) {
        drop(self.capture.take());
        drop(self.client.take());
        tracing::debug!("Released {:?} client on {:?}", self.mode, self.endpoint);
    }
}
