use thiserror::Error;

/// Errors produced by the capture engine.
///
/// Enumeration and negotiation errors are surfaced to the caller before any
/// audio is written. `ConsumerClosed` is the normal shutdown path when the
/// reading process goes away and is treated as a clean stop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("device in use: {0}")]
    DeviceInUse(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("format negotiation failed: {0}")]
    FormatNegotiation(String),

    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("consumer stalled for {waited_ms} ms")]
    ConsumerStalled { waited_ms: u64 },

    #[error("consumer closed the stream")]
    ConsumerClosed,

    #[error("invalid state transition: cannot {operation} while {state}")]
    InvalidStateTransition { operation: &'static str, state: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("output failed: {0}")]
    OutputFailed(String),

    #[error("audio subsystem error: {0}")]
    Platform(String),
}

impl CaptureError {
    /// Process exit status for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConsumerClosed => 0,
            Self::OutputFailed(_) | Self::Platform(_) => 1,
            Self::InvalidConfiguration(_) => 2,
            Self::Enumeration(_) => 10,
            Self::DeviceNotFound(_) => 11,
            Self::DeviceInUse(_) => 12,
            Self::AccessDenied(_) => 13,
            Self::FormatNegotiation(_) => 14,
            Self::StreamInterrupted(_) => 15,
            Self::ConsumerStalled { .. } => 16,
            Self::InvalidStateTransition { .. } => 17,
        }
    }

    /// Whether this error ends a session without counting as a failure.
    pub fn is_clean_stop(&self) -> bool {
        matches!(self, Self::ConsumerClosed)
    }

    /// Short machine-readable kind, used in the session summary.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Enumeration(_) => "enumeration_error",
            Self::DeviceNotFound(_) => "device_not_found",
            Self::DeviceInUse(_) => "device_in_use",
            Self::AccessDenied(_) => "access_denied",
            Self::FormatNegotiation(_) => "format_negotiation_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::ConsumerStalled { .. } => "consumer_stalled",
            Self::ConsumerClosed => "consumer_closed",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::OutputFailed(_) => "output_failed",
            Self::Platform(_) => "platform_error",
        }
    }
}
