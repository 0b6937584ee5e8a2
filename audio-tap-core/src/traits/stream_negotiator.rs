use std::time::Duration;

use crate::models::device::AudioDevice;
use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;
use crate::traits::capture_stream::CaptureStream;

/// A stream opened by a [`StreamNegotiator`], ready to be started.
pub struct NegotiatedStream<S> {
    pub stream: S,
    /// Engine buffer capacity in frames.
    pub buffer_frames: u32,
    /// Typical interval between engine wake-ups.
    pub periodicity: Duration,
}

/// Opens shared-mode streams at the fixed capture format.
///
/// Implemented by:
/// - `WasapiNegotiator` (Windows)
/// - `ScriptedNegotiator` (tests)
pub trait StreamNegotiator {
    type Stream: CaptureStream + 'static;

    /// Open `device` for capture.
    ///
    /// With `as_loopback` set, `device` must be a render endpoint and the
    /// stream taps what it is playing instead of writing to it. A device
    /// whose shared-mode mix cannot carry `format` natively fails with
    /// `FormatNegotiation`; the engine never resamples.
    fn open(
        &self,
        device: &AudioDevice,
        as_loopback: bool,
        format: &CaptureFormat,
        buffer_duration: Duration,
    ) -> Result<NegotiatedStream<Self::Stream>, CaptureError>;
}
