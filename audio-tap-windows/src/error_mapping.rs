//! HRESULT classification into the engine's error taxonomy.

use windows::Win32::Foundation::{E_ACCESSDENIED, E_NOTFOUND, ERROR_FILE_NOT_FOUND};
use windows::Win32::Media::Audio::{
    AUDCLNT_E_DEVICE_INVALIDATED, AUDCLNT_E_DEVICE_IN_USE, AUDCLNT_E_EXCLUSIVE_MODE_ONLY,
    AUDCLNT_E_UNSUPPORTED_FORMAT,
};

use audio_tap_core::CaptureError;

/// Errors while listing endpoints or resolving the default endpoint.
pub(crate) fn enumeration_error(context: &str, error: &windows::core::Error) -> CaptureError {
    let detail = format!("{}: {}", context, error);
    if is_not_found(error) {
        CaptureError::DeviceNotFound(detail)
    } else {
        CaptureError::Enumeration(detail)
    }
}

/// Errors while activating and initializing a stream.
pub(crate) fn negotiation_error(context: &str, error: &windows::core::Error) -> CaptureError {
    let code = error.code();
    let detail = format!("{}: {}", context, error);

    if code == E_ACCESSDENIED {
        CaptureError::AccessDenied(detail)
    } else if code == AUDCLNT_E_DEVICE_IN_USE || code == AUDCLNT_E_EXCLUSIVE_MODE_ONLY {
        CaptureError::DeviceInUse(detail)
    } else if code == AUDCLNT_E_UNSUPPORTED_FORMAT {
        CaptureError::FormatNegotiation(detail)
    } else if code == AUDCLNT_E_DEVICE_INVALIDATED || is_not_found(error) {
        CaptureError::DeviceNotFound(detail)
    } else {
        CaptureError::Platform(detail)
    }
}

/// Errors from a running stream. All of them end the session.
pub(crate) fn stream_error(context: &str, error: &windows::core::Error) -> CaptureError {
    let code = error.code();
    if code == AUDCLNT_E_DEVICE_INVALIDATED {
        CaptureError::StreamInterrupted(format!("{}: device removed or reconfigured", context))
    } else {
        CaptureError::StreamInterrupted(format!("{}: {}", context, error))
    }
}

fn is_not_found(error: &windows::core::Error) -> bool {
    let code = error.code();
    code == E_NOTFOUND || code == ERROR_FILE_NOT_FOUND.to_hresult()
}
