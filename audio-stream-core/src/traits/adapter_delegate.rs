use crate::models::error::DeviceError;
use crate::models::state::{AdapterRole, AdapterState};

/// Event delegate for adapter notifications.
///
/// Methods are called from whichever task polls the adapter, in the order
/// the events happen. Keep them cheap.
pub trait AdapterDelegate: Send + Sync {
    /// Called after every lifecycle transition.
    fn on_state_changed(&self, role: AdapterRole, state: AdapterState);

    /// Called when a capture read failed and its buffer was dropped.
    fn on_read_dropped(&self, error: &DeviceError);

    /// Called when the device rejected a playback chunk.
    fn on_write_failed(&self, error: &DeviceError);
}
