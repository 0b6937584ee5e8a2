//! Windows audio endpoint enumeration via the MMDevice API.
//!
//! Wraps `IMMDeviceEnumerator` to list active capture (microphone) and
//! render (speaker/headphone) endpoints with their friendly names.

use std::collections::HashSet;

use windows::core::{Interface, HSTRING, PWSTR};
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use audio_tap_core::{AudioDevice, CaptureError, DeviceCatalog, Direction, DirectionFilter};

use crate::com::ComApartment;
use crate::error_mapping::enumeration_error;

/// Endpoint catalog backed by `IMMDeviceEnumerator`.
///
/// Enters the multithreaded COM apartment on the calling thread and must be
/// used on that thread only.
pub struct WasapiDeviceCatalog {
    enumerator: IMMDeviceEnumerator,
    _com: ComApartment,
}

impl WasapiDeviceCatalog {
    pub fn new() -> Result<Self, CaptureError> {
        let com = ComApartment::enter()?;
        let enumerator: IMMDeviceEnumerator = unsafe {
            CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| enumeration_error("failed to create device enumerator", &e))?
        };
        Ok(Self { enumerator, _com: com })
    }

    /// Look up an endpoint by id. Fails with `DeviceNotFound` if the id no
    /// longer resolves to an active endpoint.
    pub(crate) fn endpoint(&self, id: &str) -> Result<IMMDevice, CaptureError> {
        unsafe {
            let device = self
                .enumerator
                .GetDevice(&HSTRING::from(id))
                .map_err(|e| CaptureError::DeviceNotFound(format!("{}: {}", id, e)))?;

            let state = device
                .GetState()
                .map_err(|e| CaptureError::DeviceNotFound(format!("{}: {}", id, e)))?;
            if state != DEVICE_STATE_ACTIVE {
                return Err(CaptureError::DeviceNotFound(format!("{} is not active", id)));
            }
            Ok(device)
        }
    }

    /// Build an `AudioDevice` from an endpoint. `None` if the endpoint
    /// cannot report an id.
    pub(crate) fn describe(device: &IMMDevice, fallback_flow: Option<Direction>) -> Option<AudioDevice> {
        let id = endpoint_id(device)?;
        let direction = endpoint_direction(device).or(fallback_flow)?;
        let name = friendly_name(device).unwrap_or_else(|| id.clone());
        Some(AudioDevice { id, name, direction })
    }
}

impl DeviceCatalog for WasapiDeviceCatalog {
    fn enumerate(&self, filter: DirectionFilter) -> Result<Vec<AudioDevice>, CaptureError> {
        let flow = match filter {
            DirectionFilter::Capture => eCapture,
            DirectionFilter::Render => eRender,
            DirectionFilter::Both => eAll,
        };

        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(flow, DEVICE_STATE_ACTIVE)
                .map_err(|e| enumeration_error("EnumAudioEndpoints failed", &e))?;

            let count = collection
                .GetCount()
                .map_err(|e| enumeration_error("GetCount failed", &e))?;

            let mut seen = HashSet::new();
            let mut devices = Vec::with_capacity(count as usize);

            for i in 0..count {
                let device = match collection.Item(i) {
                    Ok(d) => d,
                    Err(e) => {
                        log::debug!("Skipping endpoint {}: {}", i, e);
                        continue;
                    }
                };

                let Some(info) = Self::describe(&device, None) else {
                    continue;
                };
                if !filter.includes(info.direction) || !seen.insert(info.id.clone()) {
                    continue;
                }
                devices.push(info);
            }

            Ok(devices)
        }
    }

    fn default_device(&self, direction: Direction) -> Result<AudioDevice, CaptureError> {
        let flow = data_flow(direction);
        unsafe {
            let device = self
                .enumerator
                .GetDefaultAudioEndpoint(flow, eConsole)
                .map_err(|e| match enumeration_error("no default endpoint", &e) {
                    CaptureError::DeviceNotFound(d) => CaptureError::DeviceNotFound(format!("{} ({})", d, direction)),
                    other => other,
                })?;

            Self::describe(&device, Some(direction))
                .ok_or_else(|| CaptureError::DeviceNotFound(format!("default {} endpoint has no id", direction)))
        }
    }
}

pub(crate) fn data_flow(direction: Direction) -> EDataFlow {
    match direction {
        Direction::Capture => eCapture,
        Direction::Render => eRender,
    }
}

fn endpoint_id(device: &IMMDevice) -> Option<String> {
    unsafe {
        let raw: PWSTR = device.GetId().ok()?;
        let id = raw.to_string().ok();
        CoTaskMemFree(Some(raw.0 as *const _));
        id.filter(|id| !id.is_empty())
    }
}

fn endpoint_direction(device: &IMMDevice) -> Option<Direction> {
    unsafe {
        let endpoint: IMMEndpoint = device.cast().ok()?;
        let flow = endpoint.GetDataFlow().ok()?;
        if flow == eCapture {
            Some(Direction::Capture)
        } else if flow == eRender {
            Some(Direction::Render)
        } else {
            None
        }
    }
}

/// Read `PKEY_Device_FriendlyName` from the endpoint's property store.
fn friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ).ok()?;
        let value = store.GetValue(&PKEY_Device_FriendlyName).ok()?;
        let name = value.to_string();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}
