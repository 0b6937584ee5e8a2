use std::fmt;
use std::time::Duration;

/// PCM format of the outbound byte stream.
///
/// The engine supports exactly one format, [`CAPTURE_FORMAT`]: 16-bit signed
/// little-endian, 48 kHz, two interleaved channels. A negotiated engine
/// format that differs from it is a fatal negotiation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

/// The only format the engine emits.
pub const CAPTURE_FORMAT: CaptureFormat = CaptureFormat {
    sample_rate: 48_000,
    channels: 2,
    bits_per_sample: 16,
};

impl CaptureFormat {
    pub const fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample / 8) as usize
    }

    /// Bytes per frame (one sample per channel). Equals the WAVE block align.
    pub const fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.bytes_per_sample()
    }

    /// Bytes per second of stream.
    pub const fn byte_rate(&self) -> u64 {
        self.sample_rate as u64 * self.bytes_per_frame() as u64
    }

    /// Exact byte length of `frames` frames.
    pub const fn frames_to_bytes(&self, frames: u32) -> usize {
        frames as usize * self.bytes_per_frame()
    }

    /// Playback duration of `frames` frames.
    pub fn frames_to_duration(&self, frames: u64) -> Duration {
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }

    pub fn is_supported(&self) -> bool {
        *self == CAPTURE_FORMAT
    }
}

impl Default for CaptureFormat {
    fn default() -> Self {
        CAPTURE_FORMAT
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "s{}le {} Hz {}ch",
            self.bits_per_sample, self.sample_rate, self.channels
        )
    }
}
