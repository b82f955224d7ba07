//! Audio Capture
//!
//! A [`CaptureHandle`] walks one platform capture client through
//! `Created -> Initialized -> Started -> Stopped -> Closed`. The platform side
//! is a [`CaptureBackend`]; the Windows module provides endpoint and
//! process-scoped implementations. Output endpoints are recorded through
//! loopback, input endpoints directly. [`CaptureEngine`] runs a handle on its own
//! worker thread and hands blocks to consumers through a bounded channel.

mod channel;
mod completion;
mod engine;
mod pcm;

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::catalog::EndpointRef;
use crate::error::{AudioError, Result};
use crate::host_api::Direction;
use crate::variant::{vt, OwnedVariant, PropertyValue, VariantCodec};
use crate::wave_format::{SampleFormat, WaveFormat};

pub use channel::{OverflowPolicy, StreamItem};
pub use completion::{completion, Completer, Completion};
pub use engine::{CaptureConfig, CaptureEngine, CaptureStream};
pub use pcm::{convert_f32_to_i16, f32_to_i16, PcmBlock};

/// Activation type for process loopback in the activation payload
pub const PROCESS_LOOPBACK_ACTIVATION: u32 = 1;

/// Whether child processes of the target are captured with it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum LoopbackMode {
    #[default]
    IncludeTree = 0,
    ExcludeTree = 1,
}

/// How a client on an endpoint is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamMode {
    /// Record what a render endpoint plays
    Loopback,
    /// Record what a capture endpoint hears
    Direct,
}

impl StreamMode {
    /// Mode for an endpoint with the given data flow
    pub fn for_direction(direction: Direction) -> Self {
        match direction {
            Direction::Input => StreamMode::Direct,
            Direction::Output | Direction::Duplex => StreamMode::Loopback,
        }
    }
}

/// What a capture stream records
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureSource {
    /// Everything rendered to an output endpoint, or everything an input
    /// endpoint (microphone, line in) hears
    Endpoint(EndpointRef),
    /// Only the audio of one process (and optionally its descendants)
    Process { pid: u32, mode: LoopbackMode },
}

/// Payload for asynchronous process-loopback activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationRequest {
    pub pid: u32,
    pub mode: LoopbackMode,
}

impl ActivationRequest {
    pub fn new(pid: u32, mode: LoopbackMode) -> Self {
        Self { pid, mode }
    }

    /// Little-endian `{activation_type, pid, mode}`
    pub fn to_bytes(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0..4].copy_from_slice(&PROCESS_LOOPBACK_ACTIVATION.to_le_bytes());
        out[4..8].copy_from_slice(&self.pid.to_le_bytes());
        out[8..12].copy_from_slice(&(self.mode as u32).to_le_bytes());
        out
    }

    /// Blob variant pointing at the payload, as the activation call expects
    pub fn to_variant(&self) -> Result<OwnedVariant> {
        VariantCodec::encode(&PropertyValue::Blob(self.to_bytes().to_vec()), vt::BLOB)
    }
}

/// One packet copied out of the platform buffer
#[derive(Debug, Clone, PartialEq)]
pub struct RawPacket {
    pub data: Vec<u8>,
    pub frames: u32,
    pub silent: bool,
}

/// Platform capture client
///
/// Implementations own every platform object they acquire and are driven
/// from a single thread.
pub trait CaptureBackend {
    /// Initialize the client for blocks of roughly `block` and return the
    /// format samples will arrive in
    fn negotiate(&mut self, block: Duration) -> Result<WaveFormat>;

    fn start(&mut self) -> Result<()>;

    /// Block until data may be available or `timeout` passes
    fn wait(&mut self, timeout: Duration) -> Result<()>;

    /// Copy the next queued packet and release it back to the platform;
    /// `None` when nothing is queued
    fn read_packet(&mut self) -> Result<Option<RawPacket>>;

    fn stop(&mut self) -> Result<()>;

    /// Release platform resources in reverse acquisition order
    fn release(&mut self);

    /// Whether the captured source still exists
    fn source_alive(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Created,
    Initialized,
    Started,
    Stopped,
    Closed,
}

impl CaptureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Initialized => "Initialized",
            Self::Started => "Started",
            Self::Stopped => "Stopped",
            Self::Closed => "Closed",
        }
    }
}

/// State machine over a [`CaptureBackend`]
pub struct CaptureHandle<B: CaptureBackend> {
    backend: B,
    state: CaptureState,
    format: Option<WaveFormat>,
    sample_format: Option<SampleFormat>,
}

impl<B: CaptureBackend> CaptureHandle<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: CaptureState::Created,
            format: None,
            sample_format: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn format(&self) -> Option<&WaveFormat> {
        self.format.as_ref()
    }

    pub fn source_alive(&self) -> bool {
        self.backend.source_alive()
    }

    fn expect_state(&self, expected: CaptureState, to: CaptureState) -> Result<()> {
        if self.state != expected {
            return Err(AudioError::InvalidStateTransition {
                from: self.state.as_str(),
                to: to.as_str(),
            });
        }
        Ok(())
    }

    pub fn negotiate(&mut self, block: Duration) -> Result<WaveFormat> {
        self.expect_state(CaptureState::Created, CaptureState::Initialized)?;

        let format = self.backend.negotiate(block)?;
        let sample_format = format.sample_format().map_err(|e| {
            AudioError::FormatNegotiationFailed(format!("Unusable mix format: {}", e))
        })?;

        tracing::debug!(
            "Negotiated {:?} {} Hz x{} for {:?} blocks",
            sample_format,
            format.samples_per_sec,
            format.channels,
            block
        );

        self.format = Some(format);
        self.sample_format = Some(sample_format);
        self.state = CaptureState::Initialized;
        Ok(format)
    }

    pub fn start(&mut self) -> Result<()> {
        self.expect_state(CaptureState::Initialized, CaptureState::Started)?;
        self.backend.start()?;
        self.state = CaptureState::Started;
        Ok(())
    }

    pub fn wait(&mut self, timeout: Duration) -> Result<()> {
        self.expect_state(CaptureState::Started, CaptureState::Started)?;
        self.backend.wait(timeout)
    }

    /// Next packet as an owned block; `None` means nothing is queued yet
    pub fn read_block(&mut self) -> Result<Option<PcmBlock>> {
        self.expect_state(CaptureState::Started, CaptureState::Started)?;

        let (Some(format), Some(sample_format)) = (&self.format, self.sample_format) else {
            return Err(AudioError::Internal("Started without a negotiated format".into()));
        };

        let Some(packet) = self.backend.read_packet()? else {
            return Ok(None);
        };
        if packet.frames == 0 {
            return Ok(None);
        }

        let block = PcmBlock::new(
            packet.data,
            sample_format,
            format.samples_per_sec,
            format.channels,
            packet.frames,
            Utc::now(),
        )
        .with_silent(packet.silent);
        Ok(Some(block))
    }

    pub fn stop(&mut self) -> Result<()> {
        self.expect_state(CaptureState::Started, CaptureState::Stopped)?;
        self.backend.stop()?;
        self.state = CaptureState::Stopped;
        Ok(())
    }

    /// Stop if running and release everything; a second close does nothing
    pub fn close(&mut self) {
        if self.state == CaptureState::Closed {
            return;
        }
        if self.state == CaptureState::Started {
            if let Err(e) = self.backend.stop() {
                tracing::warn!("Failed to stop capture client during close: {}", e);
            }
        }
        self.backend.release();
        self.state = CaptureState::Closed;
    }
}

impl<B: CaptureBackend> Drop for CaptureHandle<B> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    /// Observable counters shared with the test after the backend moves
    #[derive(Default)]
    pub struct Probe {
        pub starts: AtomicU32,
        pub stops: AtomicU32,
        pub releases: AtomicU32,
        pub reads: AtomicU32,
        pub dead: AtomicBool,
    }

    pub enum Step {
        Packet(RawPacket),
        Empty,
        Fail,
    }

    pub struct FakeBackend {
        pub probe: Arc<Probe>,
        /// Data flow of the endpoint and the mode the client was opened in
        pub flow: Direction,
        pub mode: StreamMode,
        pub format: WaveFormat,
        pub script: VecDeque<Step>,
        /// What to do once the script runs out
        pub tail: fn() -> Step,
    }

    impl FakeBackend {
        pub fn new(probe: Arc<Probe>, script: Vec<Step>) -> Self {
            Self {
                probe,
                flow: Direction::Output,
                mode: StreamMode::Loopback,
                format: WaveFormat::new(SampleFormat::F32, 48_000, 2),
                script: script.into(),
                tail: || Step::Empty,
            }
        }
    }

    pub fn f32_packet(samples: &[f32]) -> Step {
        Step::Packet(RawPacket {
            data: samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
            frames: (samples.len() / 2) as u32,
            silent: false,
        })
    }

    impl CaptureBackend for FakeBackend {
        fn negotiate(&mut self, _block: Duration) -> Result<WaveFormat> {
            // Loopback on a capture endpoint is refused the way WASAPI refuses it
            if self.mode == StreamMode::Loopback && self.flow == Direction::Input {
                return Err(AudioError::FormatNegotiationFailed(
                    "AUDCLNT_E_WRONG_ENDPOINT_TYPE".into(),
                ));
            }
            Ok(self.format)
        }

        fn start(&mut self) -> Result<()> {
            self.probe.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn wait(&mut self, timeout: Duration) -> Result<()> {
            std::thread::sleep(timeout.min(Duration::from_millis(1)));
            Ok(())
        }

        fn read_packet(&mut self) -> Result<Option<RawPacket>> {
            self.probe.reads.fetch_add(1, Ordering::SeqCst);
            let step = self.script.pop_front().unwrap_or_else(self.tail);
            match step {
                Step::Packet(p) => Ok(Some(p)),
                Step::Empty => Ok(None),
                Step::Fail => Err(AudioError::StreamDisrupted("device invalidated".into())),
            }
        }

        fn stop(&mut self) -> Result<()> {
            self.probe.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn release(&mut self) {
            self.probe.releases.fetch_add(1, Ordering::SeqCst);
        }

        fn source_alive(&self) -> bool {
            !self.probe.dead.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    const BLOCK: Duration = Duration::from_millis(20);

    #[test]
    fn test_activation_payload_layout() {
        let req = ActivationRequest::new(0x0102_0304, LoopbackMode::ExcludeTree);
        assert_eq!(
            req.to_bytes(),
            [1, 0, 0, 0, 0x04, 0x03, 0x02, 0x01, 1, 0, 0, 0]
        );
    }

    #[test]
    fn test_activation_variant_is_blob() {
        let req = ActivationRequest::new(4242, LoopbackMode::IncludeTree);
        let variant = req.to_variant().unwrap();
        assert_eq!(variant.vt(), vt::BLOB);
        assert_eq!(
            variant.decode().unwrap(),
            Some(PropertyValue::Blob(req.to_bytes().to_vec()))
        );
    }

    #[test]
    fn test_stream_mode_follows_data_flow() {
        assert_eq!(StreamMode::for_direction(Direction::Input), StreamMode::Direct);
        assert_eq!(StreamMode::for_direction(Direction::Output), StreamMode::Loopback);
    }

    #[test]
    fn test_input_endpoint_opens_direct() {
        let probe = Arc::new(Probe::default());
        let mut backend = FakeBackend::new(Arc::clone(&probe), vec![]);
        backend.flow = Direction::Input;
        backend.mode = StreamMode::Loopback;
        assert!(matches!(
            CaptureHandle::new(backend).negotiate(BLOCK),
            Err(AudioError::FormatNegotiationFailed(_))
        ));

        let mut backend = FakeBackend::new(probe, vec![f32_packet(&[0.25, 0.25])]);
        backend.flow = Direction::Input;
        backend.mode = StreamMode::for_direction(backend.flow);
        let mut handle = CaptureHandle::new(backend);
        handle.negotiate(BLOCK).unwrap();
        handle.start().unwrap();
        assert_eq!(handle.read_block().unwrap().unwrap().to_f32(), vec![0.25, 0.25]);
    }

    #[test]
    fn test_lifecycle() {
        let probe = Arc::new(Probe::default());
        let mut handle = CaptureHandle::new(FakeBackend::new(
            Arc::clone(&probe),
            vec![f32_packet(&[0.1, 0.2, 0.3, 0.4])],
        ));

        assert_eq!(handle.state(), CaptureState::Created);
        handle.negotiate(BLOCK).unwrap();
        assert_eq!(handle.state(), CaptureState::Initialized);
        handle.start().unwrap();

        let block = handle.read_block().unwrap().unwrap();
        assert_eq!(block.frames(), 2);
        assert_eq!(block.channels(), 2);
        assert_eq!(block.sample_rate(), 48_000);
        assert_eq!(block.sample_format(), SampleFormat::F32);

        handle.stop().unwrap();
        assert_eq!(handle.state(), CaptureState::Stopped);
        handle.close();
        assert_eq!(handle.state(), CaptureState::Closed);
        assert_eq!(probe.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_double_close_releases_once() {
        let probe = Arc::new(Probe::default());
        let mut handle = CaptureHandle::new(FakeBackend::new(Arc::clone(&probe), vec![]));
        handle.negotiate(BLOCK).unwrap();
        handle.start().unwrap();

        handle.close();
        handle.close();
        drop(handle);

        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
        assert_eq!(probe.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_without_start_still_releases() {
        let probe = Arc::new(Probe::default());
        drop(CaptureHandle::new(FakeBackend::new(Arc::clone(&probe), vec![])));
        assert_eq!(probe.stops.load(Ordering::SeqCst), 0);
        assert_eq!(probe.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_out_of_order_transitions_rejected() {
        let probe = Arc::new(Probe::default());
        let mut handle = CaptureHandle::new(FakeBackend::new(probe, vec![]));

        assert!(matches!(
            handle.start(),
            Err(AudioError::InvalidStateTransition { from: "Created", to: "Started" })
        ));
        assert!(handle.read_block().is_err());

        handle.negotiate(BLOCK).unwrap();
        assert!(handle.negotiate(BLOCK).is_err());
        assert!(handle.stop().is_err());

        handle.start().unwrap();
        handle.stop().unwrap();
        assert!(handle.start().is_err());
    }

    #[test]
    fn test_empty_packet_is_not_an_error() {
        let probe = Arc::new(Probe::default());
        let mut handle = CaptureHandle::new(FakeBackend::new(
            probe,
            vec![
                Step::Empty,
                Step::Packet(RawPacket {
                    data: vec![],
                    frames: 0,
                    silent: false,
                }),
                f32_packet(&[0.0, 0.0]),
            ],
        ));
        handle.negotiate(BLOCK).unwrap();
        handle.start().unwrap();

        assert!(handle.read_block().unwrap().is_none());
        assert!(handle.read_block().unwrap().is_none());
        assert!(handle.read_block().unwrap().is_some());
    }

    #[test]
    fn test_unusable_format_fails_negotiation() {
        let probe = Arc::new(Probe::default());
        let mut backend = FakeBackend::new(probe, vec![]);
        backend.format.format_tag = 0x0055; // MP3
        let mut handle = CaptureHandle::new(backend);

        assert!(matches!(
            handle.negotiate(BLOCK),
            Err(AudioError::FormatNegotiationFailed(_))
        ));
        assert_eq!(handle.state(), CaptureState::Created);
    }
}
