//! # audio-tap-core
//!
//! Platform-agnostic capture engine.
//!
//! Streams live audio from a microphone or an output device's loopback tap
//! as raw 16-bit little-endian, 48 kHz, stereo PCM. Platform backends
//! (Windows WASAPI) implement `DeviceCatalog`, `StreamNegotiator` and
//! `CaptureStream` and plug into the generic `SessionController`.
//!
//! ## Architecture
//!
//! ```text
//! audio-tap-core (this crate)
//! ├── traits/       ← DeviceCatalog, StreamNegotiator, CaptureStream
//! ├── models/       ← CaptureError, SessionState, AudioDevice, CaptureFormat, config, summary
//! ├── processing/   ← CaptureLoop, FrameSink
//! └── session/      ← SessionController (state machine)
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// Re-export key types at crate root for convenience.
pub use models::config::EngineConfiguration;
pub use models::device::{AudioDevice, DeviceSelector, Direction, DirectionFilter};
pub use models::error::CaptureError;
pub use models::format::{CaptureFormat, CAPTURE_FORMAT};
pub use models::state::SessionState;
pub use models::stats::CaptureStats;
pub use models::summary::{SessionOutcome, SessionSummary};
pub use processing::capture_loop::CaptureLoop;
pub use processing::frame_sink::{FrameSink, WriteOutcome};
pub use session::controller::SessionController;
pub use traits::capture_stream::{CaptureStream, PacketView, WaitOutcome};
pub use traits::device_catalog::DeviceCatalog;
pub use traits::stream_negotiator::{NegotiatedStream, StreamNegotiator};
