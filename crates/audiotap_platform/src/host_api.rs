//! Host API enumeration
//!
//! A host API is a backend family through which the OS exposes endpoints
//! (WASAPI, MME, DirectSound, ALSA, ...). Every query takes a fresh
//! [`SystemSnapshot`] from an [`AudioSystem`]; nothing is cached because
//! host APIs come and go as drivers load.

use serde::{Deserialize, Serialize};

use crate::error::{AudioError, Result};
use crate::variant::PropertyValue;

/// Global endpoint index inside one enumeration snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointId(pub u32);

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stream direction of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
    Duplex,
}

/// One host API as seen in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostApi {
    pub index: usize,
    /// Backend identifier (e.g. "Wasapi", "Alsa")
    pub backend_id: String,
    pub name: String,
    pub device_count: usize,
    pub default_input: Option<EndpointId>,
    pub default_output: Option<EndpointId>,
}

/// Latency figures in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Latency {
    pub low_input: f64,
    pub high_input: f64,
    pub low_output: f64,
    pub high_output: f64,
}

/// Well-known property names in [`EndpointRecord::properties`]
pub mod keys {
    pub const FRIENDLY_NAME: &str = "friendly_name";
    pub const DEVICE_DESCRIPTION: &str = "device_description";
    pub const INTERFACE_NAME: &str = "interface_name";
    /// Raw WAVEFORMATEX blob of the engine's device format
    pub const DEVICE_FORMAT: &str = "device_format";
}

/// Capability record for one endpoint, as read from the platform
#[derive(Debug)]
pub struct EndpointRecord {
    pub id: EndpointId,
    /// Index into [`SystemSnapshot::host_apis`]
    pub host_api_index: usize,
    /// Platform identifier (MMDevice id on Windows)
    pub platform_id: Option<String>,
    /// Decoded property-store values, keyed by [`keys`]
    pub properties: Vec<(String, PropertyValue)>,
    /// Properties that failed to decode; the property is skipped
    pub property_errors: Vec<(String, AudioError)>,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: f64,
    pub latency: Latency,
    pub is_loopback: bool,
}

impl EndpointRecord {
    pub fn new(id: EndpointId, host_api_index: usize) -> Self {
        Self {
            id,
            host_api_index,
            platform_id: None,
            properties: Vec::new(),
            property_errors: Vec::new(),
            max_input_channels: 0,
            max_output_channels: 0,
            default_sample_rate: 0.0,
            latency: Latency::default(),
            is_loopback: false,
        }
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn friendly_name(&self) -> Option<&str> {
        self.property(keys::FRIENDLY_NAME).and_then(PropertyValue::as_str)
    }
}

/// Host API list and endpoint records captured in one pass
#[derive(Debug, Default)]
pub struct SystemSnapshot {
    pub host_apis: Vec<HostApi>,
    pub endpoints: Vec<EndpointRecord>,
}

/// A source of audio system snapshots
///
/// Implemented over `cpal` for every platform and over the MMDevice API on
/// Windows.
pub trait AudioSystem {
    fn snapshot(&self) -> Result<SystemSnapshot>;
}

impl<S: AudioSystem + ?Sized> AudioSystem for &S {
    fn snapshot(&self) -> Result<SystemSnapshot> {
        (**self).snapshot()
    }
}

/// Registry of host APIs, re-queried on every call
pub struct HostApiRegistry<'a, S: AudioSystem + ?Sized> {
    system: &'a S,
}

impl<'a, S: AudioSystem + ?Sized> HostApiRegistry<'a, S> {
    pub fn new(system: &'a S) -> Self {
        Self { system }
    }

    pub fn list_host_apis(&self) -> Result<Vec<HostApi>> {
        let snapshot = self.system.snapshot()?;
        tracing::debug!("Found {} host APIs", snapshot.host_apis.len());
        Ok(snapshot.host_apis)
    }

    /// Default endpoint of `host_api_index` for the given direction
    ///
    /// `Direction::Duplex` resolves to the default output.
    pub fn default_endpoint(&self, host_api_index: usize, direction: Direction) -> Result<EndpointId> {
        let apis = self.list_host_apis()?;
        let api = apis
            .iter()
            .find(|a| a.index == host_api_index)
            .ok_or_else(|| AudioError::NotFound(format!("host API {}", host_api_index)))?;

        let default = match direction {
            Direction::Input => api.default_input,
            Direction::Output | Direction::Duplex => api.default_output,
        };

        default.ok_or_else(|| {
            AudioError::NotFound(format!("no default {:?} endpoint for {}", direction, api.name))
        })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::cell::Cell;

    /// Snapshot source built from plain tuples
    pub struct FakeSystem {
        pub apis: Vec<(&'static str, Option<u32>, Option<u32>)>,
        /// (host api index, name, inputs, outputs)
        pub endpoints: Vec<(usize, &'static str, u16, u16)>,
        pub snapshots: Cell<u32>,
    }

    impl FakeSystem {
        pub fn new(
            apis: Vec<(&'static str, Option<u32>, Option<u32>)>,
            endpoints: Vec<(usize, &'static str, u16, u16)>,
        ) -> Self {
            Self {
                apis,
                endpoints,
                snapshots: Cell::new(0),
            }
        }
    }

    impl AudioSystem for FakeSystem {
        fn snapshot(&self) -> Result<SystemSnapshot> {
            self.snapshots.set(self.snapshots.get() + 1);
            let host_apis = self
                .apis
                .iter()
                .enumerate()
                .map(|(index, (name, input, output))| HostApi {
                    index,
                    backend_id: name.to_lowercase(),
                    name: name.to_string(),
                    device_count: self.endpoints.iter().filter(|e| e.0 == index).count(),
                    default_input: input.map(EndpointId),
                    default_output: output.map(EndpointId),
                })
                .collect();

            let endpoints = self
                .endpoints
                .iter()
                .enumerate()
                .map(|(i, (api, name, inputs, outputs))| {
                    let mut record = EndpointRecord::new(EndpointId(i as u32), *api);
                    record
                        .properties
                        .push((keys::FRIENDLY_NAME.into(), PropertyValue::String(name.to_string())));
                    record.max_input_channels = *inputs;
                    record.max_output_channels = *outputs;
                    record.default_sample_rate = 48_000.0;
                    record
                })
                .collect();

            Ok(SystemSnapshot { host_apis, endpoints })
        }
    }
}
