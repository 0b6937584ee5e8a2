/// Running counters kept by the capture loop.
///
/// Shared with the controller behind a `parking_lot::Mutex` so a live
/// snapshot is available while the session is capturing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Packets retrieved from the engine buffer.
    pub packets: u64,
    /// Frames forwarded to the sink.
    pub frames_forwarded: u64,
    /// Bytes accepted by the consumer.
    pub bytes_written: u64,
    /// Packets flagged silent by the OS (forwarded as zeros).
    pub silent_packets: u64,
    /// Packets flagged as following a gap the OS introduced.
    pub discontinuities: u64,
    /// Zero frames written to cover stretches where a loopback stream
    /// delivered nothing. Included in `frames_forwarded`.
    pub gap_frames: u64,
    /// Waits that timed out with no data.
    pub empty_waits: u64,
    /// Total time the sink spent blocked on the consumer.
    pub backpressure_ms: u64,
}
