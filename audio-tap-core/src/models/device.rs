use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::CaptureError;

/// Data-flow direction of an audio endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Input endpoint (microphone, line-in).
    Capture,
    /// Output endpoint (speakers, headphones). Captured through its loopback tap.
    Render,
}

impl Direction {
    /// Label used in `list` records.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Capture => "Capture",
            Self::Render => "Render",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which endpoints an enumeration should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectionFilter {
    Capture,
    Render,
    Both,
}

impl DirectionFilter {
    pub fn includes(&self, direction: Direction) -> bool {
        match self {
            Self::Capture => direction == Direction::Capture,
            Self::Render => direction == Direction::Render,
            Self::Both => true,
        }
    }
}

impl From<Direction> for DirectionFilter {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Capture => Self::Capture,
            Direction::Render => Self::Render,
        }
    }
}

/// An audio endpoint reported by a [`DeviceCatalog`](crate::DeviceCatalog).
///
/// `id` is an opaque token owned by the audio subsystem. It is only
/// meaningful until the device is removed, so callers that hold on to it
/// should re-resolve it from a fresh enumeration before reuse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioDevice {
    pub id: String,
    pub name: String,
    pub direction: Direction,
}

impl AudioDevice {
    pub fn new(id: impl Into<String>, name: impl Into<String>, direction: Direction) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            direction,
        }
    }
}

/// Device selection as given on the command surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceSelector {
    /// The OS default endpoint for the requested direction.
    Default,
    /// An explicit endpoint id from a previous enumeration.
    Id(String),
}

impl FromStr for DeviceSelector {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CaptureError::DeviceNotFound("empty device selector".into()));
        }
        if trimmed.eq_ignore_ascii_case("default") {
            Ok(Self::Default)
        } else {
            Ok(Self::Id(trimmed.to_string()))
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Id(id) => f.write_str(id),
        }
    }
}
