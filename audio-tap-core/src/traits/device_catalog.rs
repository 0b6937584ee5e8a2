use crate::models::device::{AudioDevice, Direction, DirectionFilter, DeviceSelector};
use crate::models::error::CaptureError;

/// Enumerates audio endpoints.
///
/// Implemented by:
/// - `WasapiDeviceCatalog` (Windows, MMDevice API)
/// - `ScriptedCatalog` (tests)
///
/// Every call queries the audio subsystem afresh; nothing is cached between
/// calls, so a removed device disappears from the next enumeration.
pub trait DeviceCatalog {
    /// List every active endpoint matching `filter`, in OS enumeration order.
    fn enumerate(&self, filter: DirectionFilter) -> Result<Vec<AudioDevice>, CaptureError>;

    /// The OS default endpoint for `direction`.
    ///
    /// Fails with `DeviceNotFound` when no endpoint of that direction exists.
    fn default_device(&self, direction: Direction) -> Result<AudioDevice, CaptureError>;

    /// Resolve a selector to a concrete device of `direction`.
    fn resolve(&self, direction: Direction, selector: &DeviceSelector) -> Result<AudioDevice, CaptureError> {
        match selector {
            DeviceSelector::Default => self.default_device(direction),
            DeviceSelector::Id(id) => self
                .enumerate(direction.into())?
                .into_iter()
                .find(|device| &device.id == id)
                .ok_or_else(|| CaptureError::DeviceNotFound(format!("no active {} device with id {}", direction, id))),
        }
    }
}
