//! MMDevice Endpoint Enumeration
//!
//! Reads endpoint capability records straight from the MMDevice API. Each
//! property-store value is moved out of its `PROPVARIANT` into the variant
//! codec, which releases it with `PropVariantClear` after decoding.

use std::mem;
use std::ptr;

use windows::core::{Interface, GUID, PCWSTR, PROPVARIANT};
use windows::Win32::Media::Audio::{
    eAll, eCapture, eConsole, eRender, EDataFlow, IAudioClient, IMMDevice, IMMDeviceEnumerator,
    IMMEndpoint, MMDeviceEnumerator, DEVICE_STATE_ACTIVE, WAVEFORMATEX,
};
use windows::Win32::System::Com::StructuredStorage::PropVariantClear;
use windows::Win32::System::Com::{CoCreateInstance, CoTaskMemFree, CLSCTX_ALL, STGM_READ};
use windows::Win32::UI::Shell::PropertiesSystem::{IPropertyStore, PROPERTYKEY};

use super::com::ComGuard;
use crate::catalog::EndpointRef;
use crate::error::{AudioError, Result};
use crate::host_api::{keys, AudioSystem, EndpointId, EndpointRecord, HostApi, Latency, SystemSnapshot};
use crate::variant::{RawVariant, VariantCodec, VariantRelease};
use crate::wave_format::WaveFormat;

// RawVariant is read from and written over PROPVARIANT storage
const _: () = assert!(mem::size_of::<RawVariant>() == mem::size_of::<PROPVARIANT>());

/// `PKEY_Device_FriendlyName`
pub const PKEY_DEVICE_FRIENDLY_NAME: PROPERTYKEY = PROPERTYKEY {
    fmtid: GUID::from_u128(0xa45c254e_df1c_4efd_8020_67d146a850e0),
    pid: 14,
};

/// `PKEY_Device_DeviceDesc`
pub const PKEY_DEVICE_DESC: PROPERTYKEY = PROPERTYKEY {
    fmtid: GUID::from_u128(0xa45c254e_df1c_4efd_8020_67d146a850e0),
    pid: 2,
};

/// `PKEY_DeviceInterface_FriendlyName`
pub const PKEY_DEVICE_INTERFACE_FRIENDLY_NAME: PROPERTYKEY = PROPERTYKEY {
    fmtid: GUID::from_u128(0x026e516e_b814_414b_83cd_856d6fef4822),
    pid: 2,
};

/// `PKEY_AudioEngine_DeviceFormat`
pub const PKEY_AUDIO_ENGINE_DEVICE_FORMAT: PROPERTYKEY = PROPERTYKEY {
    fmtid: GUID::from_u128(0xf19f064d_082c_4e27_bc73_6882a1bb8e4c),
    pid: 0,
};

const HOST_API_NAME: &str = "Windows WASAPI";

/// 100-nanosecond units per second
const HNS_PER_SEC: f64 = 10_000_000.0;

/// Releases property-store variants
pub(crate) struct PropVariantRelease;

impl VariantRelease for PropVariantRelease {
    fn release(&self, raw: &mut RawVariant) {
        // SAFETY: RawVariant is layout-compatible with PROPVARIANT and came
        // from a property store that expects PropVariantClear
        unsafe {
            let _ = PropVariantClear((raw as *mut RawVariant).cast::<PROPVARIANT>());
        }
    }
}

/// Create the device enumerator; COM must be initialized
pub(crate) fn device_enumerator() -> Result<IMMDeviceEnumerator> {
    unsafe {
        CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL).map_err(|e| {
            AudioError::InitializationFailed(format!("Failed to create MMDeviceEnumerator: {}", e))
        })
    }
}

/// Resolve an endpoint reference to a device
pub(crate) fn resolve_device(enumerator: &IMMDeviceEnumerator, endpoint: &EndpointRef) -> Result<IMMDevice> {
    let default_for = |flow: EDataFlow| unsafe {
        enumerator
            .GetDefaultAudioEndpoint(flow, eConsole)
            .map_err(|e| AudioError::NotFound(format!("No default {:?} endpoint: {}", endpoint, e)))
    };

    match endpoint {
        EndpointRef::DefaultRender => default_for(eRender),
        EndpointRef::DefaultCapture => default_for(eCapture),
        EndpointRef::Id(id) => {
            let wide: Vec<u16> = id.encode_utf16().chain(Some(0)).collect();
            unsafe {
                enumerator
                    .GetDevice(PCWSTR(wide.as_ptr()))
                    .map_err(|e| AudioError::NotFound(format!("Endpoint {}: {}", id, e)))
            }
        }
    }
}

/// MMDevice id string of a device
pub(crate) fn device_id(device: &IMMDevice) -> Result<String> {
    unsafe {
        let id_pwstr = device
            .GetId()
            .map_err(|e| AudioError::Internal(format!("Failed to get device ID: {}", e)))?;
        let id = id_pwstr.to_string();
        CoTaskMemFree(Some(id_pwstr.as_ptr() as *const _));
        id.map_err(|e| AudioError::Internal(format!("Failed to convert device ID: {}", e)))
    }
}

pub(crate) fn data_flow(device: &IMMDevice) -> Result<EDataFlow> {
    let endpoint: IMMEndpoint = device
        .cast()
        .map_err(|e| AudioError::Internal(format!("Failed to get endpoint interface: {}", e)))?;
    unsafe {
        endpoint
            .GetDataFlow()
            .map_err(|e| AudioError::Internal(format!("Failed to get data flow: {}", e)))
    }
}

/// Read one property and decode it through the codec
fn read_property(store: &IPropertyStore, key: &PROPERTYKEY) -> Result<Option<crate::variant::PropertyValue>> {
    let prop = unsafe { store.GetValue(key)? };

    // SAFETY: PROPVARIANT and RawVariant share a layout; ownership moves to
    // the codec, which clears it exactly once
    unsafe {
        let raw = ptr::read((&prop as *const PROPVARIANT).cast::<RawVariant>());
        mem::forget(prop);
        VariantCodec::decode_owned(raw, &PropVariantRelease)
    }
}

/// Endpoint records from the MMDevice API
///
/// One host API ("Windows WASAPI") whose endpoints are the active render
/// and capture devices.
#[derive(Debug, Default)]
pub struct WasapiAudioSystem;

impl WasapiAudioSystem {
    pub fn new() -> Self {
        Self
    }

    /// Friendly name of the endpoint behind `endpoint`
    pub fn friendly_name(&self, endpoint: &EndpointRef) -> Result<String> {
        let _com = ComGuard::new()?;
        let enumerator = device_enumerator()?;
        let device = resolve_device(&enumerator, endpoint)?;
        let store = unsafe { device.OpenPropertyStore(STGM_READ)? };
        read_property(&store, &PKEY_DEVICE_FRIENDLY_NAME)?
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| AudioError::NotFound(format!("friendly name of {:?}", endpoint)))
    }

    fn record_for(&self, device: &IMMDevice, index: u32) -> Result<(EndpointRecord, EDataFlow)> {
        let mut record = EndpointRecord::new(EndpointId(index), 0);
        record.platform_id = Some(device_id(device)?);
        let flow = data_flow(device)?;

        let store = unsafe {
            device
                .OpenPropertyStore(STGM_READ)
                .map_err(|e| AudioError::Internal(format!("Failed to open property store: {}", e)))?
        };

        let wanted = [
            (keys::FRIENDLY_NAME, &PKEY_DEVICE_FRIENDLY_NAME),
            (keys::DEVICE_DESCRIPTION, &PKEY_DEVICE_DESC),
            (keys::INTERFACE_NAME, &PKEY_DEVICE_INTERFACE_FRIENDLY_NAME),
            (keys::DEVICE_FORMAT, &PKEY_AUDIO_ENGINE_DEVICE_FORMAT),
        ];
        for (name, key) in wanted {
            match read_property(&store, key) {
                Ok(Some(value)) => record.properties.push((name.to_string(), value)),
                Ok(None) => {}
                Err(e) => record.property_errors.push((name.to_string(), e)),
            }
        }

        let format = match record.property(keys::DEVICE_FORMAT).and_then(|v| v.as_blob()) {
            Some(blob) => WaveFormat::from_bytes(blob).ok(),
            None => None,
        };

        // Mix format and device period both come from a throwaway client
        let client: Option<IAudioClient> = unsafe { device.Activate(CLSCTX_ALL, None).ok() };
        let format = match (format, &client) {
            (Some(format), _) => Some(format),
            (None, Some(client)) => mix_format(client).ok(),
            (None, None) => None,
        };

        if let Some(format) = format {
            record.default_sample_rate = f64::from(format.samples_per_sec);
            if flow == eRender {
                record.max_output_channels = format.channels;
            } else {
                record.max_input_channels = format.channels;
            }
        }

        if let Some(client) = &client {
            let mut default_period = 0i64;
            let mut min_period = 0i64;
            let periods = unsafe {
                client.GetDevicePeriod(
                    Some(&mut default_period as *mut i64),
                    Some(&mut min_period as *mut i64),
                )
            };
            if periods.is_ok() {
                let low = min_period as f64 / HNS_PER_SEC;
                let high = default_period as f64 / HNS_PER_SEC;
                record.latency = if flow == eRender {
                    Latency {
                        low_output: low,
                        high_output: high,
                        ..Default::default()
                    }
                } else {
                    Latency {
                        low_input: low,
                        high_input: high,
                        ..Default::default()
                    }
                };
            }
        }

        Ok((record, flow))
    }
}

impl AudioSystem for WasapiAudioSystem {
    fn snapshot(&self) -> Result<SystemSnapshot> {
        let _com = ComGuard::new()?;
        let enumerator = device_enumerator()?;

        let collection = unsafe {
            enumerator
                .EnumAudioEndpoints(eAll, DEVICE_STATE_ACTIVE)
                .map_err(|e| AudioError::Internal(format!("Failed to enumerate devices: {}", e)))?
        };
        let count = unsafe {
            collection
                .GetCount()
                .map_err(|e| AudioError::Internal(format!("Failed to get device count: {}", e)))?
        };

        let default_render = resolve_device(&enumerator, &EndpointRef::DefaultRender)
            .and_then(|d| device_id(&d))
            .ok();
        let default_capture = resolve_device(&enumerator, &EndpointRef::DefaultCapture)
            .and_then(|d| device_id(&d))
            .ok();

        let mut api = HostApi {
            index: 0,
            backend_id: "Wasapi".into(),
            name: HOST_API_NAME.into(),
            device_count: 0,
            default_input: None,
            default_output: None,
        };
        let mut endpoints = Vec::with_capacity(count as usize);

        for i in 0..count {
            let device = match unsafe { collection.Item(i) } {
                Ok(device) => device,
                Err(e) => {
                    tracing::warn!("Skipping endpoint {}: {}", i, e);
                    continue;
                }
            };

            let index = endpoints.len() as u32;
            match self.record_for(&device, index) {
                Ok((record, flow)) => {
                    let default_id = if flow == eRender {
                        &default_render
                    } else {
                        &default_capture
                    };
                    if record.platform_id.is_some() && record.platform_id == *default_id {
                        if flow == eRender {
                            api.default_output = Some(record.id);
                        } else {
                            api.default_input = Some(record.id);
                        }
                    }
                    endpoints.push(record);
                }
                Err(e) => tracing::warn!("Skipping endpoint {}: {}", i, e),
            }
        }

        api.device_count = endpoints.len();
        tracing::debug!("Enumerated {} WASAPI endpoints", endpoints.len());

        Ok(SystemSnapshot {
            host_apis: vec![api],
            endpoints,
        })
    }
}

/// Mix format allocation returned by `GetMixFormat`, freed on drop
pub(crate) struct MixFormat(*mut WAVEFORMATEX);

impl MixFormat {
    pub(crate) fn of(client: &IAudioClient) -> Result<Self> {
        let ptr = unsafe { client.GetMixFormat()? };
        if ptr.is_null() {
            return Err(AudioError::FormatNegotiationFailed("GetMixFormat returned null".into()));
        }
        Ok(Self(ptr))
    }

    pub(crate) fn as_ptr(&self) -> *const WAVEFORMATEX {
        self.0
    }

    pub(crate) fn format(&self) -> Result<WaveFormat> {
        // SAFETY: non-null allocation from GetMixFormat, alive until drop
        unsafe { WaveFormat::from_ptr(self.0 as *const u8) }
    }
}

impl Drop for MixFormat {
    fn drop(&mut self) {
        unsafe { CoTaskMemFree(Some(self.0 as *const _)) };
    }
}

/// Mix format of a client
pub(crate) fn mix_format(client: &IAudioClient) -> Result<WaveFormat> {
    MixFormat::of(client)?.format()
}
