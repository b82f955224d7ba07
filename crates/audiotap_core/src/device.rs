//! Cross-Platform Endpoint Enumeration (CPAL)
//!
//! Presents every CPAL host as a host API and every device it reports as an
//! endpoint record, so the catalog and device grouping work the same way on
//! every platform. Loopback capture itself remains WASAPI-only.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SupportedBufferSize, SupportedStreamConfig};

use audiotap_platform::{
    keys, AudioError, AudioSystem, EndpointId, EndpointRecord, HostApi, Latency, PropertyValue,
    Result, SystemSnapshot,
};

/// Name fragments of devices that replay another endpoint's output
const LOOPBACK_MARKERS: [&str; 3] = ["loopback", "monitor of", "stereo mix"];

/// `AudioSystem` over every host CPAL can open
#[derive(Debug, Default)]
pub struct CpalAudioSystem;

impl CpalAudioSystem {
    pub fn new() -> Self {
        Self
    }

    fn record_for(
        device: &cpal::Device,
        id: EndpointId,
        host_api_index: usize,
    ) -> Option<EndpointRecord> {
        let name = match device.name() {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!("Skipping device without a name: {}", e);
                return None;
            }
        };

        let input = device.default_input_config().ok();
        let output = device.default_output_config().ok();

        let mut record = EndpointRecord::new(id, host_api_index);
        record.platform_id = Some(name.clone());
        record.is_loopback = is_loopback_name(&name);
        record.max_input_channels = input.as_ref().map_or(0, |c| c.channels());
        record.max_output_channels = output.as_ref().map_or(0, |c| c.channels());
        record.default_sample_rate = output
            .as_ref()
            .or(input.as_ref())
            .map_or(0.0, |c| f64::from(c.sample_rate().0));

        let (low_input, high_input) = input.as_ref().map_or((0.0, 0.0), buffer_latency);
        let (low_output, high_output) = output.as_ref().map_or((0.0, 0.0), buffer_latency);
        record.latency = Latency {
            low_input,
            high_input,
            low_output,
            high_output,
        };

        record
            .properties
            .push((keys::FRIENDLY_NAME.to_string(), PropertyValue::String(name)));
        Some(record)
    }
}

/// Latency bounds implied by a config's buffer size range, in seconds
fn buffer_latency(config: &SupportedStreamConfig) -> (f64, f64) {
    let rate = f64::from(config.sample_rate().0);
    match config.buffer_size() {
        SupportedBufferSize::Range { min, max } if rate > 0.0 => {
            (f64::from(*min) / rate, f64::from(*max) / rate)
        }
        _ => (0.0, 0.0),
    }
}

fn is_loopback_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    LOOPBACK_MARKERS.iter().any(|marker| lower.contains(marker))
}

impl AudioSystem for CpalAudioSystem {
    fn snapshot(&self) -> Result<SystemSnapshot> {
        let mut snapshot = SystemSnapshot::default();

        for host_id in cpal::available_hosts() {
            let host = match cpal::host_from_id(host_id) {
                Ok(host) => host,
                Err(e) => {
                    tracing::warn!("Host {} unavailable: {}", host_id.name(), e);
                    continue;
                }
            };

            let index = snapshot.host_apis.len();
            let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
            let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

            let mut api = HostApi {
                index,
                backend_id: format!("{:?}", host_id),
                name: host_id.name().to_string(),
                device_count: 0,
                default_input: None,
                default_output: None,
            };

            let devices = host.devices().map_err(|e| {
                AudioError::Internal(format!("Failed to list {} devices: {}", host_id.name(), e))
            })?;

            for device in devices {
                let id = EndpointId(snapshot.endpoints.len() as u32);
                let Some(record) = Self::record_for(&device, id, index) else {
                    continue;
                };

                if record.platform_id.is_some() && record.platform_id == default_input_name {
                    api.default_input = Some(id);
                }
                if record.platform_id.is_some() && record.platform_id == default_output_name {
                    api.default_output = Some(id);
                }

                api.device_count += 1;
                snapshot.endpoints.push(record);
            }

            tracing::debug!("Host {} reports {} devices", api.name, api.device_count);
            snapshot.host_apis.push(api);
        }

        Ok(snapshot)
    }
}
