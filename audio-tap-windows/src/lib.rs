//! # audio-tap-windows
//!
//! Windows WASAPI backend for audio-tap.
//!
//! Provides:
//! - `WasapiDeviceCatalog`: endpoint enumeration via the MMDevice API
//! - `WasapiNegotiator`: shared-mode, event-driven stream setup for
//!   microphones and for the loopback tap of render endpoints
//! - `WasapiStream`: the negotiated stream, read on the capture thread
//! - `StdoutPipe`: raw, non-blocking-when-piped stdout for the PCM stream
//!
//! ## Platform Requirements
//! - Windows 10 1703+ (build 15063) for event-driven loopback
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use audio_tap_core::{CaptureFormat, DeviceSelector, Direction, EngineConfiguration, SessionController};
//! use audio_tap_windows::{StdoutPipe, WasapiDeviceCatalog, WasapiNegotiator};
//!
//! let mut controller = SessionController::new(
//!     WasapiDeviceCatalog::new()?,
//!     WasapiNegotiator::new()?,
//!     EngineConfiguration::default(),
//! )?;
//! controller.start(Direction::Render, &DeviceSelector::Default, CaptureFormat::default(), StdoutPipe::open()?)?;
//! ```

#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod device_catalog;
#[cfg(target_os = "windows")]
mod error_mapping;
#[cfg(target_os = "windows")]
pub mod negotiator;
#[cfg(target_os = "windows")]
pub mod stdout_pipe;
#[cfg(target_os = "windows")]
pub mod wasapi_stream;

#[cfg(target_os = "windows")]
pub use com::ComApartment;
#[cfg(target_os = "windows")]
pub use device_catalog::WasapiDeviceCatalog;
#[cfg(target_os = "windows")]
pub use negotiator::WasapiNegotiator;
#[cfg(target_os = "windows")]
pub use stdout_pipe::StdoutPipe;
#[cfg(target_os = "windows")]
pub use wasapi_stream::WasapiStream;
