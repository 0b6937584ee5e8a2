//! COM apartment guard.

use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED};

use audio_tap_core::CaptureError;

/// Membership of the calling thread in the multithreaded COM apartment.
///
/// Every thread that touches MMDevice or WASAPI objects holds one of these
/// for as long as it uses them. `CoUninitialize` runs on drop, so it must
/// be dropped on the thread that created it, after the COM objects it
/// guards have been released.
pub struct ComApartment {
    // Not Send: apartment membership is per thread.
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ComApartment {
    pub fn enter() -> Result<Self, CaptureError> {
        unsafe {
            CoInitializeEx(None, COINIT_MULTITHREADED)
                .ok()
                .map_err(|e| CaptureError::Platform(format!("CoInitializeEx failed: {}", e)))?;
        }
        Ok(Self {
            _not_send: std::marker::PhantomData,
        })
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}
