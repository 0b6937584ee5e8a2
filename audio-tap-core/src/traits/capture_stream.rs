use std::time::Duration;

use crate::models::error::CaptureError;

/// Result of a bounded wait on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The stream signaled that data may be available.
    Ready,
    /// The timeout elapsed without a signal.
    TimedOut,
}

/// A borrowed view of one packet in the OS-owned engine buffer.
///
/// Only valid for the duration of the visitor passed to
/// [`CaptureStream::next_packet`]; the stream releases the packet back to
/// the OS as soon as the visitor returns.
#[derive(Debug, Clone, Copy)]
pub struct PacketView<'a> {
    /// Raw interleaved frames. Exactly `frames * block_align` bytes, except
    /// when `silent` is set, where the OS contents must be ignored.
    pub data: &'a [u8],
    pub frames: u32,
    /// The OS marks the packet as silence.
    pub silent: bool,
    /// Frames were dropped before this packet.
    pub discontinuity: bool,
}

/// A negotiated shared-mode stream, driven from the capture thread.
///
/// Implemented by:
/// - `WasapiStream` (Windows)
/// - `ScriptedStream` (tests)
///
/// The stream is moved onto the capture thread and used only there.
pub trait CaptureStream: Send {
    /// Start the engine. Called once, on the capture thread.
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Block until the stream signals or `timeout` elapses.
    fn wait(&mut self, timeout: Duration) -> Result<WaitOutcome, CaptureError>;

    /// Retrieve the next packet, if any, and hand it to `visit`.
    ///
    /// Returns `Ok(false)` when the engine buffer holds no complete packet.
    /// The packet is released back to the OS after `visit` returns, so the
    /// visitor must copy out everything it needs.
    fn next_packet(&mut self, visit: &mut dyn FnMut(PacketView<'_>)) -> Result<bool, CaptureError>;

    /// Stop the engine. Further calls are no-ops.
    fn stop(&mut self) -> Result<(), CaptureError>;
}
