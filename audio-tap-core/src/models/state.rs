use std::fmt;

use super::error::CaptureError;

/// Capture session state machine.
///
/// State transitions:
/// ```text
/// idle → negotiating → capturing → draining → stopped
///             ↓            ↓           ↓
///           failed  ←──────┴───────────┘
/// ```
///
/// `Stopped` and `Failed` are terminal. `reset` on the controller returns a
/// terminal controller to `Idle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Negotiating,
    Capturing,
    Draining,
    Stopped,
    Failed(CaptureError),
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed(_))
    }

    /// Whether a session in this state holds the process's capture slot.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Negotiating | Self::Capturing | Self::Draining)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Negotiating => "negotiating",
            Self::Capturing => "capturing",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
