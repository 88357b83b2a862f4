use thiserror::Error;

use super::config::DeviceId;
use super::state::AdapterState;

/// Errors reported by a device engine for a single operation.
///
/// Cloned into write tickets and delegate notifications, so it carries
/// only owned strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    #[error("failed to open device: {0}")]
    OpenFailed(String),

    #[error("failed to start device: {0}")]
    StartFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("quit failed: {0}")]
    QuitFailed(String),

    #[error("device disconnected")]
    Disconnected,
}

/// Errors surfaced by the capture and playback adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("unsupported sample format: {0} bits")]
    UnsupportedSampleFormat(u16),

    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("device {device} has no {direction} channels")]
    UnsupportedDirection { device: String, direction: &'static str },

    #[error("cannot {action} from {from} state")]
    InvalidTransition { from: AdapterState, action: &'static str },

    #[error("adapter is stopped")]
    Stopped,

    #[error("operation aborted")]
    Aborted,

    #[error(transparent)]
    Device(#[from] DeviceError),
}
