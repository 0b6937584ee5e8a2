//! Shared-mode WASAPI stream negotiation.
//!
//! Opens either a capture endpoint (microphone) or the loopback tap of a
//! render endpoint (`AUDCLNT_STREAMFLAGS_LOOPBACK`) at the fixed output
//! format, event-driven. The device's shared-mode engine must accept the
//! format as is: no `AUTOCONVERTPCM`, no resampling.
//!
//! Event-driven loopback needs Windows 10 1703 (build 15063) or later.

use std::time::Duration;

use windows::core::PCWSTR;
use windows::Win32::Foundation::S_OK;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::CreateEventW;

use audio_tap_core::{AudioDevice, CaptureError, CaptureFormat, Direction, NegotiatedStream, StreamNegotiator};

use crate::device_catalog::WasapiDeviceCatalog;
use crate::error_mapping::negotiation_error;
use crate::wasapi_stream::{EventHandle, WasapiStream};

/// 100-nanosecond units per microsecond, as used by `REFERENCE_TIME`.
const HNS_PER_MICRO: i64 = 10;

/// Opens WASAPI streams on the controlling thread.
///
/// The returned [`WasapiStream`] is then moved to the capture thread.
pub struct WasapiNegotiator {
    catalog: WasapiDeviceCatalog,
}

impl WasapiNegotiator {
    pub fn new() -> Result<Self, CaptureError> {
        Ok(Self {
            catalog: WasapiDeviceCatalog::new()?,
        })
    }
}

impl StreamNegotiator for WasapiNegotiator {
    type Stream = WasapiStream;

    /// Sequence:
    /// 1. Resolve the endpoint by id and confirm it is active
    /// 2. Confirm its data flow matches the request
    /// 3. Activate IAudioClient
    /// 4. Check the shared-mode engine accepts the format natively
    /// 5. Initialize shared, event-driven (plus LOOPBACK for render endpoints)
    /// 6. Query buffer size and device period
    /// 7. Register the event handle, get IAudioCaptureClient
    fn open(
        &self,
        device: &AudioDevice,
        as_loopback: bool,
        format: &CaptureFormat,
        buffer_duration: Duration,
    ) -> Result<NegotiatedStream<WasapiStream>, CaptureError> {
        if !format.is_supported() {
            return Err(CaptureError::FormatNegotiation(format!("unsupported output format {}", format)));
        }

        let endpoint = self.catalog.endpoint(&device.id)?;
        let expected = if as_loopback { Direction::Render } else { Direction::Capture };
        match WasapiDeviceCatalog::describe(&endpoint, None) {
            Some(info) if info.direction == expected => {}
            Some(info) => {
                return Err(CaptureError::DeviceNotFound(format!(
                    "{} is a {} endpoint, expected {}",
                    device.id, info.direction, expected
                )))
            }
            None => return Err(CaptureError::DeviceNotFound(device.id.clone())),
        }

        unsafe {
            let audio_client: IAudioClient = endpoint
                .Activate(CLSCTX_ALL, None)
                .map_err(|e| negotiation_error("IMMDevice::Activate failed", &e))?;

            let wave_format = pcm_wave_format(format);
            check_format_supported(&audio_client, &wave_format, format)?;

            let mut stream_flags = AUDCLNT_STREAMFLAGS_EVENTCALLBACK | AUDCLNT_STREAMFLAGS_NOPERSIST;
            if as_loopback {
                stream_flags |= AUDCLNT_STREAMFLAGS_LOOPBACK;
            }
            let buffer_hns = buffer_duration.as_micros() as i64 * HNS_PER_MICRO;

            audio_client
                .Initialize(AUDCLNT_SHAREMODE_SHARED, stream_flags, buffer_hns, 0, &wave_format, None)
                .map_err(|e| negotiation_error("IAudioClient::Initialize failed", &e))?;

            let buffer_frames = audio_client
                .GetBufferSize()
                .map_err(|e| negotiation_error("IAudioClient::GetBufferSize failed", &e))?;

            let mut default_period: i64 = 0;
            audio_client
                .GetDevicePeriod(Some(&mut default_period as *mut i64), None)
                .map_err(|e| negotiation_error("IAudioClient::GetDevicePeriod failed", &e))?;
            let periodicity = if default_period > 0 {
                Duration::from_micros((default_period / HNS_PER_MICRO) as u64)
            } else {
                format.frames_to_duration(buffer_frames as u64) / 2
            };

            let event = CreateEventW(None, false, false, PCWSTR::null())
                .map(EventHandle)
                .map_err(|e| CaptureError::Platform(format!("CreateEventW failed: {}", e)))?;
            audio_client
                .SetEventHandle(event.0)
                .map_err(|e| negotiation_error("IAudioClient::SetEventHandle failed", &e))?;

            let capture_client: IAudioCaptureClient = audio_client
                .GetService()
                .map_err(|e| negotiation_error("IAudioClient::GetService failed", &e))?;

            log::debug!(
                "WASAPI stream on {}: {} frames, default period {} hns{}",
                device.id,
                buffer_frames,
                default_period,
                if as_loopback { " (loopback)" } else { "" }
            );

            Ok(NegotiatedStream {
                stream: WasapiStream::new(audio_client, capture_client, event, *format),
                buffer_frames,
                periodicity,
            })
        }
    }
}

/// Plain `WAVE_FORMAT_PCM` description of `format`.
fn pcm_wave_format(format: &CaptureFormat) -> WAVEFORMATEX {
    let block_align = format.bytes_per_frame() as u16;
    WAVEFORMATEX {
        wFormatTag: WAVE_FORMAT_PCM as u16,
        nChannels: format.channels,
        nSamplesPerSec: format.sample_rate,
        nAvgBytesPerSec: format.byte_rate() as u32,
        nBlockAlign: block_align,
        wBitsPerSample: format.bits_per_sample,
        cbSize: 0,
    }
}

/// Fail unless the shared-mode engine takes `wave_format` without conversion.
unsafe fn check_format_supported(
    audio_client: &IAudioClient,
    wave_format: &WAVEFORMATEX,
    format: &CaptureFormat,
) -> Result<(), CaptureError> {
    let mut closest: *mut WAVEFORMATEX = std::ptr::null_mut();
    let hr = audio_client.IsFormatSupported(
        AUDCLNT_SHAREMODE_SHARED,
        wave_format,
        Some(&mut closest as *mut *mut WAVEFORMATEX),
    );

    let suggestion = if closest.is_null() {
        None
    } else {
        let c = *closest;
        let text = format!(
            "{} Hz {}ch {}-bit",
            { c.nSamplesPerSec },
            { c.nChannels },
            { c.wBitsPerSample }
        );
        CoTaskMemFree(Some(closest as *const _));
        Some(text)
    };

    if hr == S_OK {
        return Ok(());
    }
    if hr.is_err() && hr != AUDCLNT_E_UNSUPPORTED_FORMAT {
        return Err(negotiation_error(
            "IAudioClient::IsFormatSupported failed",
            &windows::core::Error::from(hr),
        ));
    }
    Err(CaptureError::FormatNegotiation(match suggestion {
        Some(mix) => format!("device mix is {}, cannot carry {} natively", mix, format),
        None => format!("device cannot carry {} natively", format),
    }))
}
