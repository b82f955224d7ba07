//! audiotap-probe - inspect host APIs, endpoints and sessions, and test capture
//!
//! ```text
//! audiotap-probe [hosts|endpoints|devices|sessions]
//! audiotap-probe capture [endpoint-name] [seconds]
//! audiotap-probe record [input-name] [seconds]
//! audiotap-probe capture-pid <pid> [seconds] [--exclude]
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::process::ExitCode;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use audiotap_core::{
    CaptureStream, CpalAudioSystem, Direction, EndpointRef, LoopbackMode, SystemTap, TapResult, TapSettings,
};
use audiotap_platform::{EndpointCatalog, HostApiRegistry};

const DEFAULT_CAPTURE_SECS: u64 = 5;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("endpoints");

    let result = match command {
        "hosts" => list_hosts(),
        "endpoints" => list_endpoints(),
        "devices" => list_devices(),
        "sessions" => list_sessions(),
        "capture" => capture_endpoint(args.get(1).map(String::as_str), seconds_arg(args.get(2))),
        "record" => record_input(args.get(1).map(String::as_str), seconds_arg(args.get(2))),
        "capture-pid" => match args.get(1).and_then(|p| p.parse::<u32>().ok()) {
            Some(pid) => {
                let mode = if args.iter().any(|a| a == "--exclude") {
                    LoopbackMode::ExcludeTree
                } else {
                    LoopbackMode::IncludeTree
                };
                capture_process(pid, mode, seconds_arg(args.get(2)))
            }
            None => {
                error!("capture-pid needs a numeric process id");
                return ExitCode::FAILURE;
            }
        },
        other => {
            error!("Unknown command: {}", other);
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn seconds_arg(arg: Option<&String>) -> Duration {
    let secs = arg.and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_CAPTURE_SECS);
    Duration::from_secs(secs)
}

fn list_hosts() -> TapResult<()> {
    // Every CPAL host, not only the one the facade uses for sessions
    let system = CpalAudioSystem::new();
    for api in HostApiRegistry::new(&system).list_host_apis()? {
        println!(
            "[{}] {} ({}) - {} devices, default in {:?}, default out {:?}",
            api.index, api.name, api.backend_id, api.device_count, api.default_input, api.default_output
        );
    }
    Ok(())
}

fn list_endpoints() -> TapResult<()> {
    let listing = EndpointCatalog::new(CpalAudioSystem::new()).list_endpoints()?;
    for endpoint in &listing.endpoints {
        println!(
            "{} [{}] {:?} in={} out={} {} Hz{}",
            endpoint.id,
            endpoint.host_api,
            endpoint.name,
            endpoint.max_input_channels,
            endpoint.max_output_channels,
            endpoint.default_sample_rate,
            if endpoint.is_loopback { " (loopback)" } else { "" }
        );
    }
    for warning in &listing.warnings {
        warn!("Endpoint {}: {}", warning.endpoint, warning.error);
    }
    Ok(())
}

fn list_devices() -> TapResult<()> {
    let tap = SystemTap::from_settings(&TapSettings::load())?;
    for device in tap.devices()? {
        let apis: Vec<&str> = device.host_apis().collect();
        println!("{} - {} endpoints via {}", device.name, device.endpoints.len(), apis.join(", "));
    }
    Ok(())
}

fn list_sessions() -> TapResult<()> {
    let settings = TapSettings::load();
    let tap = SystemTap::from_settings(&settings)?;
    for session in tap.visible_sessions(&EndpointRef::DefaultRender, &settings)? {
        println!(
            "pid {:>6} {:<24} {:?} volume {:.2}{}",
            session.pid,
            session.process_name.as_deref().unwrap_or("<exited>"),
            session.state,
            session.volume,
            if session.muted { " (muted)" } else { "" }
        );
    }
    Ok(())
}

fn capture_endpoint(name: Option<&str>, duration: Duration) -> TapResult<()> {
    let settings = TapSettings::load();
    let tap = SystemTap::from_settings(&settings)?;
    let name = name.map(str::to_string).or(settings.preferred_endpoint.clone());
    let stream = match name {
        Some(name) => tap.capture_endpoint_named(&name, Direction::Output)?,
        None => tap.capture_endpoint(EndpointRef::DefaultRender)?,
    };
    drain(stream, duration)
}

fn record_input(name: Option<&str>, duration: Duration) -> TapResult<()> {
    let tap = SystemTap::from_settings(&TapSettings::load())?;
    drain(tap.capture_input(name)?, duration)
}

fn capture_process(pid: u32, mode: LoopbackMode, duration: Duration) -> TapResult<()> {
    let tap = SystemTap::from_settings(&TapSettings::load())?;
    drain(tap.capture_process(pid, mode)?, duration)
}

/// Count blocks and frames until `duration` passes or the stream ends
fn drain(mut stream: CaptureStream, duration: Duration) -> TapResult<()> {
    let format = *stream.format();
    info!(
        "Capturing {} Hz x{} ({:?}) for {:?}",
        format.samples_per_sec,
        format.channels,
        stream.sample_format(),
        duration
    );

    let deadline = Instant::now() + duration;
    let (mut blocks, mut frames, mut silent) = (0u64, 0u64, 0u64);

    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match stream.recv_timeout(remaining) {
            Ok(Ok(block)) => {
                blocks += 1;
                frames += u64::from(block.frames());
                if block.is_silent() {
                    silent += 1;
                }
            }
            Ok(Err(e)) => {
                error!("Stream ended: {}", e);
                break;
            }
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Capture worker exited");
                break;
            }
        }
    }

    stream.stop();
    println!(
        "{} blocks, {} frames ({} silent), {} dropped",
        blocks,
        frames,
        silent,
        stream.dropped_blocks()
    );
    Ok(())
}
