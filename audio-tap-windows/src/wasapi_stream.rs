//! Event-driven WASAPI capture stream.
//!
//! Runs on the capture thread. Each packet is read through
//! `IAudioCaptureClient::GetBuffer`, handed to the visitor as a borrowed
//! view, and released with `ReleaseBuffer` straight after.

use std::time::Duration;

use windows::core::w;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Threading::{
    AvRevertMmThreadCharacteristics, AvSetMmThreadCharacteristicsW, WaitForSingleObject,
};

use audio_tap_core::{CaptureError, CaptureFormat, CaptureStream, PacketView, WaitOutcome};

use crate::com::ComApartment;
use crate::error_mapping::stream_error;

/// Auto-reset event signaled by the audio engine when a period is ready.
pub(crate) struct EventHandle(pub(crate) HANDLE);

impl Drop for EventHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// A negotiated shared-mode stream.
///
/// Created on the controlling thread by `WasapiNegotiator`, then moved to
/// and used exclusively on the capture thread, which joins the MTA in
/// [`start`](CaptureStream::start).
pub struct WasapiStream {
    capture_client: IAudioCaptureClient,
    audio_client: IAudioClient,
    event: EventHandle,
    format: CaptureFormat,
    running: bool,
    mmcss: Option<HANDLE>,
    // Dropped last, after every COM reference above is released.
    com: Option<ComApartment>,
}

// SAFETY: the COM objects were created in the multithreaded apartment and
// are only ever used by one thread at a time: the controlling thread until
// the stream is handed over, the capture thread afterwards, which enters
// the MTA before touching them.
unsafe impl Send for WasapiStream {}

impl WasapiStream {
    pub(crate) fn new(
        audio_client: IAudioClient,
        capture_client: IAudioCaptureClient,
        event: EventHandle,
        format: CaptureFormat,
    ) -> Self {
        Self {
            capture_client,
            audio_client,
            event,
            format,
            running: false,
            mmcss: None,
            com: None,
        }
    }
}

impl CaptureStream for WasapiStream {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.com.is_none() {
            self.com = Some(ComApartment::enter()?);
        }

        unsafe {
            // MMCSS registration for real-time priority. Capture still works without it.
            let mut task_index: u32 = 0;
            match AvSetMmThreadCharacteristicsW(w!("Pro Audio"), &mut task_index) {
                Ok(handle) => self.mmcss = Some(handle),
                Err(e) => log::warn!("MMCSS registration failed: {}", e),
            }

            self.audio_client
                .Start()
                .map_err(|e| stream_error("IAudioClient::Start failed", &e))?;
        }
        self.running = true;
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome, CaptureError> {
        let millis = timeout.as_millis().min(u32::MAX as u128) as u32;
        let result = unsafe { WaitForSingleObject(self.event.0, millis) };

        if result == WAIT_OBJECT_0 {
            Ok(WaitOutcome::Ready)
        } else if result == WAIT_TIMEOUT {
            Ok(WaitOutcome::TimedOut)
        } else {
            Err(CaptureError::StreamInterrupted(format!(
                "wait on stream event failed ({:#x})",
                result.0
            )))
        }
    }

    fn next_packet(&mut self, visit: &mut dyn FnMut(PacketView<'_>)) -> Result<bool, CaptureError> {
        unsafe {
            let packet_length = self
                .capture_client
                .GetNextPacketSize()
                .map_err(|e| stream_error("GetNextPacketSize failed", &e))?;
            if packet_length == 0 {
                return Ok(false);
            }

            let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
            let mut num_frames: u32 = 0;
            let mut flags: u32 = 0;

            self.capture_client
                .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
                .map_err(|e| stream_error("GetBuffer failed", &e))?;

            let silent = flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0;
            let discontinuity = flags & (AUDCLNT_BUFFERFLAGS_DATA_DISCONTINUITY.0 as u32) != 0;

            let data: &[u8] = if buffer_ptr.is_null() || num_frames == 0 {
                &[]
            } else {
                std::slice::from_raw_parts(buffer_ptr, self.format.frames_to_bytes(num_frames))
            };

            visit(PacketView {
                data,
                frames: num_frames,
                silent,
                discontinuity,
            });

            self.capture_client
                .ReleaseBuffer(num_frames)
                .map_err(|e| stream_error("ReleaseBuffer failed", &e))?;
        }
        Ok(true)
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        unsafe {
            self.audio_client
                .Stop()
                .map_err(|e| stream_error("IAudioClient::Stop failed", &e))
        }
    }
}

impl Drop for WasapiStream {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::debug!("Stream stop on drop: {}", e);
        }
        if let Some(handle) = self.mmcss.take() {
            unsafe {
                let _ = AvRevertMmThreadCharacteristics(handle);
            }
        }
    }
}
