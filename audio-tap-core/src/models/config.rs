use std::time::Duration;

/// Runtime tuning for a capture session.
///
/// The output format is fixed (see [`CAPTURE_FORMAT`](super::format::CAPTURE_FORMAT))
/// and is not part of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfiguration {
    /// Requested engine buffer length. The OS may round it up.
    pub buffer_duration: Duration,

    /// The capture thread waits at most `periodicity * wait_period_multiple`
    /// for the stream to signal before re-checking the stop flag.
    pub wait_period_multiple: u32,

    /// Longest time the frame sink blocks on a slow consumer before giving up.
    pub stall_timeout: Duration,
}

/// Lower bound on the capture thread's wait, for devices reporting tiny periods.
pub const MIN_WAIT: Duration = Duration::from_millis(10);

impl EngineConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_duration.is_zero() {
            return Err("buffer duration must be positive".into());
        }
        if self.buffer_duration > Duration::from_secs(2) {
            return Err(format!(
                "buffer duration too long: {} ms",
                self.buffer_duration.as_millis()
            ));
        }
        if self.wait_period_multiple == 0 {
            return Err("wait period multiple must be at least 1".into());
        }
        if self.stall_timeout.is_zero() {
            return Err("stall timeout must be positive".into());
        }
        Ok(())
    }

    /// Bounded wait for a stream with the given periodicity.
    pub fn wait_timeout(&self, periodicity: Duration) -> Duration {
        (periodicity * self.wait_period_multiple).max(MIN_WAIT)
    }
}

impl Default for EngineConfiguration {
    fn default() -> Self {
        Self {
            buffer_duration: Duration::from_millis(100),
            wait_period_multiple: 4,
            stall_timeout: Duration::from_secs(2),
        }
    }
}
