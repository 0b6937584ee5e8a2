use serde::Serialize;

use super::device::{AudioDevice, Direction};
use super::error::CaptureError;
use super::format::CAPTURE_FORMAT;
use super::stats::CaptureStats;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Stopped by the controlling process.
    Stopped,
    /// The reader closed its end of the stream.
    ConsumerClosed,
    Failed,
}

/// End-of-session report.
///
/// This is where discontinuity-driven frame loss is made visible to the
/// embedding process, alongside the per-event warnings in the log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub device_id: String,
    pub device_name: String,
    pub direction: Direction,
    pub loopback: bool,
    pub started_at: String,
    pub duration_secs: f64,
    pub packets: u64,
    pub frames_forwarded: u64,
    pub bytes_written: u64,
    pub silent_packets: u64,
    pub gap_frames: u64,
    pub discontinuities: u64,
    pub backpressure_ms: u64,
    pub outcome: SessionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionSummary {
    pub fn new(
        session_id: &str,
        device: &AudioDevice,
        loopback: bool,
        started_at: &str,
        stats: &CaptureStats,
        exit: Result<(), &CaptureError>,
    ) -> Self {
        let (outcome, error) = match exit {
            Ok(()) => (SessionOutcome::Stopped, None),
            Err(CaptureError::ConsumerClosed) => (SessionOutcome::ConsumerClosed, None),
            Err(e) => (SessionOutcome::Failed, Some(e.to_string())),
        };

        Self {
            session_id: session_id.to_string(),
            device_id: device.id.clone(),
            device_name: device.name.clone(),
            direction: device.direction,
            loopback,
            started_at: started_at.to_string(),
            duration_secs: CAPTURE_FORMAT
                .frames_to_duration(stats.frames_forwarded)
                .as_secs_f64(),
            packets: stats.packets,
            frames_forwarded: stats.frames_forwarded,
            bytes_written: stats.bytes_written,
            silent_packets: stats.silent_packets,
            gap_frames: stats.gap_frames,
            discontinuities: stats.discontinuities,
            backpressure_ms: stats.backpressure_ms,
            outcome,
            error,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.outcome == SessionOutcome::Failed
    }

    pub fn to_json(&self) -> Result<String, CaptureError> {
        serde_json::to_string(self)
            .map_err(|e| CaptureError::OutputFailed(format!("failed to serialize summary: {}", e)))
    }
}
