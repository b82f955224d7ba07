//! Endpoint Catalog
//!
//! Turns a [`SystemSnapshot`] into validated [`Endpoint`]s and groups the
//! endpoints that represent one physical interface into [`Device`]s.
//!
//! # Grouping
//!
//! Legacy host APIs truncate driver names (MME stops at 31 characters), so
//! the same interface shows up as "Speakers (Realtek High Definition Audio)"
//! through WASAPI and "Speakers (Realtek High Definiti" through MME. Two
//! names fold into one device when either is a substring of the other; the
//! longest member name becomes the device name.

use serde::{Deserialize, Serialize};

use crate::error::{AudioError, Result};
use crate::host_api::{AudioSystem, Direction, EndpointId, EndpointRecord, Latency, SystemSnapshot};

/// How the session, volume and capture layers address an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointRef {
    DefaultRender,
    DefaultCapture,
    /// Platform endpoint id (MMDevice id on Windows)
    Id(String),
}

/// One addressable endpoint as seen through one host API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    pub host_api: String,
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: f64,
    pub latency: Latency,
    pub is_loopback: bool,
    pub platform_id: Option<String>,
}

impl Endpoint {
    /// Validate a capability record
    ///
    /// Fails with `InvalidEndpointCapabilities` when the endpoint has
    /// neither input nor output channels.
    pub fn new(record: &EndpointRecord, host_api: &str, name: String) -> Result<Self> {
        if record.max_input_channels == 0 && record.max_output_channels == 0 {
            return Err(AudioError::InvalidEndpointCapabilities {
                endpoint: record.id.0,
                name,
            });
        }

        Ok(Self {
            id: record.id,
            host_api: host_api.to_string(),
            name,
            max_input_channels: record.max_input_channels,
            max_output_channels: record.max_output_channels,
            default_sample_rate: record.default_sample_rate,
            latency: record.latency,
            is_loopback: record.is_loopback,
            platform_id: record.platform_id.clone(),
        })
    }

    pub fn direction(&self) -> Direction {
        match (self.max_input_channels > 0, self.max_output_channels > 0) {
            (true, false) => Direction::Input,
            (false, true) => Direction::Output,
            _ => Direction::Duplex,
        }
    }

    pub fn is_input(&self) -> bool {
        self.max_input_channels > 0
    }

    pub fn is_output(&self) -> bool {
        self.max_output_channels > 0
    }

    /// Platform reference usable by the session/volume/capture layers
    pub fn endpoint_ref(&self) -> Option<EndpointRef> {
        self.platform_id.clone().map(EndpointRef::Id)
    }
}

/// Endpoints of one physical interface across host APIs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub endpoints: Vec<Endpoint>,
}

impl Device {
    /// Channel count of the first grouped endpoint
    pub fn channels(&self) -> u16 {
        self.endpoints
            .first()
            .map(|e| e.max_input_channels.max(e.max_output_channels))
            .unwrap_or(0)
    }

    /// Default sample rate of the first grouped endpoint
    pub fn sample_rate(&self) -> f64 {
        self.endpoints.first().map(|e| e.default_sample_rate).unwrap_or(0.0)
    }

    pub fn host_apis(&self) -> impl Iterator<Item = &str> {
        self.endpoints.iter().map(|e| e.host_api.as_str())
    }

    fn accepts(&self, name: &str) -> bool {
        !name.is_empty()
            && self
                .endpoints
                .iter()
                .any(|e| !e.name.is_empty() && (name.contains(&e.name) || e.name.contains(name)))
    }
}

/// Non-fatal per-endpoint problem found while listing
#[derive(Debug)]
pub struct CatalogWarning {
    pub endpoint: EndpointId,
    pub error: AudioError,
}

/// Result of [`EndpointCatalog::list_endpoints`]
#[derive(Debug, Default)]
pub struct EndpointListing {
    pub endpoints: Vec<Endpoint>,
    pub warnings: Vec<CatalogWarning>,
}

/// Endpoint and device listing over an [`AudioSystem`]
pub struct EndpointCatalog<S: AudioSystem> {
    system: S,
}

impl<S: AudioSystem> EndpointCatalog<S> {
    pub fn new(system: S) -> Self {
        Self { system }
    }

    pub fn system(&self) -> &S {
        &self.system
    }

    /// List every endpoint of every host API
    ///
    /// Host APIs and endpoints come from the same snapshot. Endpoints that
    /// fail validation and properties that fail to decode are reported in
    /// `warnings`; the rest of the listing is still returned.
    pub fn list_endpoints(&self) -> Result<EndpointListing> {
        let SystemSnapshot { host_apis, endpoints } = self.system.snapshot()?;
        let mut listing = EndpointListing::default();

        for mut record in endpoints {
            let host_api = match host_apis.get(record.host_api_index) {
                Some(api) => api.name.as_str(),
                None => {
                    tracing::warn!(
                        "Endpoint {} references unknown host API {}",
                        record.id,
                        record.host_api_index
                    );
                    listing.warnings.push(CatalogWarning {
                        endpoint: record.id,
                        error: AudioError::NotFound(format!("host API {}", record.host_api_index)),
                    });
                    continue;
                }
            };

            for (key, error) in std::mem::take(&mut record.property_errors) {
                tracing::debug!("Endpoint {}: skipping property {}: {}", record.id, key, error);
                listing.warnings.push(CatalogWarning {
                    endpoint: record.id,
                    error,
                });
            }

            let name = record
                .friendly_name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("Endpoint {}", record.id.0));

            match Endpoint::new(&record, host_api, name) {
                Ok(endpoint) => listing.endpoints.push(endpoint),
                Err(error) => {
                    tracing::warn!("{}", error);
                    listing.warnings.push(CatalogWarning {
                        endpoint: record.id,
                        error,
                    });
                }
            }
        }

        tracing::debug!(
            "Listed {} endpoints ({} warnings)",
            listing.endpoints.len(),
            listing.warnings.len()
        );
        Ok(listing)
    }

    /// Group endpoints into devices
    pub fn list_devices(&self) -> Result<Vec<Device>> {
        Ok(group_devices(self.list_endpoints()?.endpoints))
    }

    /// First endpoint whose name contains `name`, ignoring case
    pub fn find_endpoint(&self, name: &str, direction: Option<Direction>) -> Result<Endpoint> {
        let needle = name.to_lowercase();
        self.list_endpoints()?
            .endpoints
            .into_iter()
            .filter(|e| match direction {
                Some(Direction::Input) => e.is_input(),
                Some(Direction::Output) => e.is_output(),
                Some(Direction::Duplex) => e.direction() == Direction::Duplex,
                None => true,
            })
            .find(|e| e.name.to_lowercase().contains(&needle))
            .ok_or_else(|| AudioError::NotFound(format!("endpoint matching {:?}", name)))
    }
}

/// Fold endpoints into devices by name containment
pub fn group_devices(endpoints: Vec<Endpoint>) -> Vec<Device> {
    let mut devices: Vec<Device> = Vec::new();

    for endpoint in endpoints {
        match devices.iter_mut().find(|d| d.accepts(&endpoint.name)) {
            Some(device) => {
                if endpoint.name.len() > device.name.len() {
                    device.name = endpoint.name.clone();
                }
                device.endpoints.push(endpoint);
            }
            None => devices.push(Device {
                name: endpoint.name.clone(),
                endpoints: vec![endpoint],
            }),
        }
    }

    devices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_api::fake::FakeSystem;
    use crate::host_api::keys;
    use crate::variant::PropertyValue;

    fn realtek_system() -> FakeSystem {
        FakeSystem::new(
            vec![("Windows WASAPI", None, Some(0)), ("MME", Some(2), Some(1))],
            vec![
                (0, "Speakers (Realtek)", 0, 2),
                (1, "Speakers (Real", 0, 2),
                (1, "Microphone (USB)", 1, 0),
                (0, "Headset (USB)", 1, 2),
            ],
        )
    }

    #[test]
    fn test_every_endpoint_has_one_direction() {
        let catalog = EndpointCatalog::new(realtek_system());
        let listing = catalog.list_endpoints().unwrap();
        assert_eq!(listing.endpoints.len(), 4);
        assert!(listing.warnings.is_empty());

        let directions: Vec<Direction> = listing.endpoints.iter().map(|e| e.direction()).collect();
        assert_eq!(
            directions,
            vec![Direction::Output, Direction::Output, Direction::Input, Direction::Duplex]
        );
    }

    #[test]
    fn test_host_api_names_from_same_snapshot() {
        let catalog = EndpointCatalog::new(realtek_system());
        let listing = catalog.list_endpoints().unwrap();
        assert_eq!(listing.endpoints[0].host_api, "Windows WASAPI");
        assert_eq!(listing.endpoints[1].host_api, "MME");
        assert_eq!(catalog.system().snapshots.get(), 1);
    }

    #[test]
    fn test_zero_channel_endpoint_becomes_warning() {
        let system = FakeSystem::new(
            vec![("MME", None, None)],
            vec![(0, "Ghost Device", 0, 0), (0, "Line In", 2, 0)],
        );
        let listing = EndpointCatalog::new(system).list_endpoints().unwrap();

        assert_eq!(listing.endpoints.len(), 1);
        assert_eq!(listing.warnings.len(), 1);
        assert_eq!(listing.warnings[0].endpoint, EndpointId(0));
        assert!(matches!(
            listing.warnings[0].error,
            AudioError::InvalidEndpointCapabilities { endpoint: 0, .. }
        ));
    }

    #[test]
    fn test_truncated_names_fold_into_one_device() {
        let devices = EndpointCatalog::new(realtek_system()).list_devices().unwrap();
        let speakers: Vec<&Device> = devices.iter().filter(|d| d.name.starts_with("Speakers")).collect();

        assert_eq!(speakers.len(), 1);
        assert_eq!(speakers[0].name, "Speakers (Realtek)");
        assert_eq!(speakers[0].endpoints.len(), 2);
        assert_eq!(devices.len(), 3);
    }

    #[test]
    fn test_truncated_name_first_still_prefers_longest() {
        let system = FakeSystem::new(
            vec![("MME", None, None), ("Windows WASAPI", None, None)],
            vec![(0, "Speakers (Real", 0, 2), (1, "Speakers (Realtek)", 0, 2)],
        );
        let devices = EndpointCatalog::new(system).list_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Speakers (Realtek)");
        assert_eq!(devices[0].endpoints[0].host_api, "MME");
    }

    #[test]
    fn test_grouping_is_idempotent() {
        let catalog = EndpointCatalog::new(realtek_system());
        let first = catalog.list_devices().unwrap();
        let second = catalog.list_devices().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_device_reads_first_endpoint() {
        let devices = EndpointCatalog::new(realtek_system()).list_devices().unwrap();
        let headset = devices.iter().find(|d| d.name == "Headset (USB)").unwrap();
        assert_eq!(headset.channels(), 2);
        assert_eq!(headset.sample_rate(), 48_000.0);
    }

    #[test]
    fn test_find_endpoint_by_partial_name() {
        let catalog = EndpointCatalog::new(realtek_system());
        let mic = catalog.find_endpoint("microphone", Some(Direction::Input)).unwrap();
        assert_eq!(mic.name, "Microphone (USB)");
        assert!(catalog.find_endpoint("Speakers", Some(Direction::Input)).is_err());
    }

    struct BadPropertySystem;

    impl AudioSystem for BadPropertySystem {
        fn snapshot(&self) -> crate::Result<SystemSnapshot> {
            let mut record = EndpointRecord::new(EndpointId(0), 0);
            record.max_output_channels = 2;
            record.property_errors.push((
                keys::FRIENDLY_NAME.into(),
                AudioError::UnsupportedVariantType(0x4001),
            ));
            let mut named = EndpointRecord::new(EndpointId(1), 0);
            named.max_input_channels = 1;
            named
                .properties
                .push((keys::FRIENDLY_NAME.into(), PropertyValue::String("Mic".into())));

            Ok(SystemSnapshot {
                host_apis: vec![crate::host_api::HostApi {
                    index: 0,
                    backend_id: "wasapi".into(),
                    name: "Windows WASAPI".into(),
                    device_count: 2,
                    default_input: None,
                    default_output: None,
                }],
                endpoints: vec![record, named],
            })
        }
    }

    #[test]
    fn test_undecodable_property_is_skipped_with_warning() {
        let listing = EndpointCatalog::new(BadPropertySystem).list_endpoints().unwrap();
        assert_eq!(listing.endpoints.len(), 2);
        assert_eq!(listing.endpoints[0].name, "Endpoint 0");
        assert_eq!(listing.endpoints[1].name, "Mic");
        assert!(matches!(
            listing.warnings[0].error,
            AudioError::UnsupportedVariantType(0x4001)
        ));
    }
}
