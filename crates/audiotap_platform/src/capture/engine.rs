//! Capture worker and consumer-facing stream

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use serde::{Deserialize, Serialize};

use super::channel::{block_channel, BlockSender, OverflowPolicy, SendOutcome, StreamItem};
use super::{CaptureBackend, CaptureHandle, CaptureSource};
use crate::error::{AudioError, Result};
use crate::wave_format::{SampleFormat, WaveFormat};

/// Capture tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Target block size in milliseconds
    pub block_ms: u32,
    /// Blocks buffered between worker and consumer
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    /// Bound on the asynchronous process-loopback handshake
    pub activation_timeout_ms: u64,
    /// Sleep between polls for poll-driven clients, and the event wait bound
    /// for event-driven ones
    pub poll_interval_ms: u64,
    /// Failed reads in a row before the stream is declared disrupted
    pub max_consecutive_failures: u32,
    /// Deliver float captures as s16
    pub convert_to_s16: bool,
    /// Re-encode every block to this sample format; takes precedence over
    /// `convert_to_s16`
    pub output_format: Option<SampleFormat>,
    /// Format assumed when a process-loopback client reports no mix format
    pub fallback_sample_rate: u32,
    pub fallback_channels: u16,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            block_ms: 20,
            queue_capacity: 32,
            overflow: OverflowPolicy::DropOldest,
            activation_timeout_ms: 5_000,
            poll_interval_ms: 5,
            max_consecutive_failures: 8,
            convert_to_s16: false,
            output_format: None,
            fallback_sample_rate: 48_000,
            fallback_channels: 2,
        }
    }
}

impl CaptureConfig {
    /// Small blocks and a short queue for live monitoring
    pub fn low_latency() -> Self {
        Self {
            block_ms: 10,
            queue_capacity: 8,
            poll_interval_ms: 2,
            ..Default::default()
        }
    }

    /// Nothing dropped; the producer waits for the consumer
    pub fn archival() -> Self {
        Self {
            block_ms: 40,
            queue_capacity: 256,
            overflow: OverflowPolicy::Block,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.block_ms == 0 || self.block_ms > 1_000 {
            return Err(format!("block_ms must be within 1..=1000, got {}", self.block_ms));
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be at least 1".into());
        }
        if self.activation_timeout_ms == 0 {
            return Err("activation_timeout_ms must be non-zero".into());
        }
        if self.poll_interval_ms == 0 || self.poll_interval_ms > u64::from(self.block_ms) {
            return Err(format!(
                "poll_interval_ms must be within 1..={} (the block size), got {}",
                self.block_ms, self.poll_interval_ms
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err("max_consecutive_failures must be at least 1".into());
        }
        if self.fallback_sample_rate == 0 || self.fallback_channels == 0 {
            return Err("fallback format needs a sample rate and channel count".into());
        }
        Ok(())
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.block_ms))
    }

    pub fn activation_timeout(&self) -> Duration {
        Duration::from_millis(self.activation_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fallback_format(&self) -> WaveFormat {
        WaveFormat::new(SampleFormat::F32, self.fallback_sample_rate, self.fallback_channels)
    }

    /// Sample format blocks are delivered in for a client producing `native`
    pub fn delivery_format(&self, native: SampleFormat) -> SampleFormat {
        match self.output_format {
            Some(format) => format,
            None if self.convert_to_s16 && native.is_float() => SampleFormat::I16,
            None => native,
        }
    }

    /// Wait bound for the worker's setup report; activation plus slack for
    /// the client initialization that follows it
    fn setup_timeout(&self) -> Duration {
        self.activation_timeout() * 2 + Duration::from_secs(1)
    }
}

/// Opens capture streams on dedicated worker threads
pub struct CaptureEngine {
    config: CaptureConfig,
}

impl CaptureEngine {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Open a stream for `source` with the platform's backend
    pub fn start_source(&self, source: CaptureSource) -> Result<CaptureStream> {
        #[cfg(target_os = "windows")]
        {
            match source {
                CaptureSource::Endpoint(endpoint) => {
                    self.start(move || crate::windows::EndpointCapture::open(&endpoint))
                }
                CaptureSource::Process { pid, mode } => {
                    let config = self.config.clone();
                    self.start(move || {
                        crate::windows::ProcessLoopback::activate(
                            super::ActivationRequest::new(pid, mode),
                            config.activation_timeout(),
                            config.fallback_format(),
                        )
                    })
                }
            }
        }

        #[cfg(not(target_os = "windows"))]
        {
            Err(AudioError::FeatureNotAvailable(format!(
                "Loopback capture of {:?} requires WASAPI",
                source
            )))
        }
    }

    /// Open a stream with a caller-supplied backend
    ///
    /// `factory` runs on the worker thread, so the backend and the platform
    /// objects it holds never cross threads. Setup failures are returned
    /// here; later failures arrive on the stream.
    pub fn start<F, B>(&self, factory: F) -> Result<CaptureStream>
    where
        F: FnOnce() -> Result<B> + Send + 'static,
        B: CaptureBackend + 'static,
    {
        self.config.validate().map_err(AudioError::InitializationFailed)?;

        let stop = Arc::new(AtomicBool::new(false));
        let (sender, receiver, dropped) =
            block_channel(self.config.queue_capacity, self.config.overflow, Arc::clone(&stop));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<WaveFormat>>(1);

        let config = self.config.clone();
        let worker_stop = Arc::clone(&stop);
        let worker = thread::Builder::new()
            .name("audiotap-capture".into())
            .spawn(move || {
                let mut handle = match factory().and_then(|backend| {
                    let mut handle = CaptureHandle::new(backend);
                    handle.negotiate(config.block_duration())?;
                    handle.start()?;
                    Ok(handle)
                }) {
                    Ok(handle) => handle,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let format = handle.format().copied();
                if let Some(format) = format {
                    let _ = ready_tx.send(Ok(format));
                }
                drop(ready_tx);

                run_capture_loop(&mut handle, &sender, &config, &worker_stop);
                handle.close();

                tracing::info!(
                    "Capture worker finished ({} blocks dropped)",
                    sender.dropped()
                );
            })
            .map_err(|e| AudioError::Internal(format!("Failed to spawn capture thread: {}", e)))?;

        let format = match ready_rx.recv_timeout(self.config.setup_timeout()) {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(RecvTimeoutError::Timeout) => {
                // The worker is stuck inside the platform; leave it detached
                stop.store(true, Ordering::SeqCst);
                return Err(AudioError::ActivationTimeout(self.config.setup_timeout()));
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = worker.join();
                return Err(AudioError::ActivationFailed(
                    "Capture worker exited before reporting a format".into(),
                ));
            }
        };

        tracing::info!(
            "Capture started: {} Hz, {} channels, {}-bit",
            format.samples_per_sec,
            format.channels,
            format.bits_per_sample
        );

        let native_sample_format = format.sample_format()?;
        let sample_format = self.config.delivery_format(native_sample_format);
        let output_format = if sample_format == native_sample_format {
            format
        } else {
            WaveFormat::new(sample_format, format.samples_per_sec, format.channels)
        };

        Ok(CaptureStream {
            receiver,
            format: output_format,
            sample_format,
            native_format: format,
            stop,
            dropped,
            worker: Some(worker),
        })
    }
}

impl Default for CaptureEngine {
    fn default() -> Self {
        Self::new(CaptureConfig::default())
    }
}

fn run_capture_loop<B: CaptureBackend>(
    handle: &mut CaptureHandle<B>,
    sender: &BlockSender,
    config: &CaptureConfig,
    stop: &AtomicBool,
) {
    let mut failures = 0u32;

    'outer: while !stop.load(Ordering::SeqCst) {
        if !handle.source_alive() {
            sender.send_terminal(AudioError::StreamDisrupted("Capture source has gone away".into()));
            break;
        }

        if let Err(e) = handle.wait(config.poll_interval()) {
            if record_failure(&mut failures, e, sender, config) {
                break;
            }
            continue;
        }

        // Drain everything queued; stop is only honoured between packets
        while !stop.load(Ordering::SeqCst) {
            match handle.read_block() {
                Ok(Some(block)) => {
                    failures = 0;
                    let target = config.delivery_format(block.sample_format());
                    let block = if target == block.sample_format() {
                        block
                    } else {
                        block.encode(target)
                    };
                    if sender.send(block) == SendOutcome::Closed {
                        break 'outer;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    if record_failure(&mut failures, e, sender, config) {
                        break 'outer;
                    }
                    break;
                }
            }
        }
    }
}

/// Count a failed wait or read; true once the stream should end
fn record_failure(
    failures: &mut u32,
    error: AudioError,
    sender: &BlockSender,
    config: &CaptureConfig,
) -> bool {
    *failures += 1;
    tracing::debug!(
        "Capture read failed ({}/{}): {}",
        failures,
        config.max_consecutive_failures,
        error
    );
    if *failures < config.max_consecutive_failures {
        return false;
    }
    sender.send_terminal(AudioError::StreamDisrupted(format!(
        "{} consecutive failed reads, last: {}",
        failures, error
    )));
    true
}

/// Consumer side of a running capture
///
/// Blocks arrive in capture order. A stream that ends on its own delivers
/// one `Err` item and then disconnects. Dropping the stream stops the
/// worker and waits for it to release the platform client.
pub struct CaptureStream {
    receiver: Receiver<StreamItem>,
    format: WaveFormat,
    sample_format: SampleFormat,
    native_format: WaveFormat,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureStream {
    /// Format of delivered blocks
    pub fn format(&self) -> &WaveFormat {
        &self.format
    }

    /// Encoding of delivered blocks; the only place `I8` output is visible,
    /// since a wave format cannot describe it
    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    /// Format the platform client was initialized with
    pub fn native_format(&self) -> &WaveFormat {
        &self.native_format
    }

    /// Blocks discarded by the overflow policy so far
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Next item; `None` once the stream has ended
    pub fn recv(&self) -> Option<StreamItem> {
        self.receiver.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<StreamItem, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> std::result::Result<StreamItem, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn iter(&self) -> impl Iterator<Item = StreamItem> + '_ {
        self.receiver.iter()
    }

    /// Signal the worker and wait for it to close the client; idempotent
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Capture worker panicked");
            }
            tracing::info!("Capture stopped");
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}
