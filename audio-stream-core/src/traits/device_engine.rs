use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::models::config::StreamParams;
use crate::models::device::{DeviceInfo, Direction};
use crate::models::error::DeviceError;

/// Entry point of a native audio device engine.
///
/// Implemented by concrete bindings (PortAudio, CoreAudio, WASAPI, ...)
/// and by `sim::SimulatedEngine` for tests. The adapters only ever see
/// this trait and the handles it opens.
pub trait DeviceEngine: Send + Sync {
    /// List the devices currently known to the engine.
    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError>;

    /// Open one device in one direction with fully resolved parameters.
    ///
    /// The returned handle is owned by exactly one adapter.
    fn open(&self, params: &StreamParams) -> Result<Arc<dyn DeviceHandle>, DeviceError>;
}

/// Capability object for one opened device stream.
///
/// Every asynchronous method completes exactly once. Callers never keep
/// more than one `read` or `write` outstanding on the same handle, and
/// dropping an outstanding future abandons that operation.
#[async_trait]
pub trait DeviceHandle: Send + Sync {
    /// Read up to `size` bytes of captured PCM.
    async fn read(&self, size: usize) -> Result<Bytes, DeviceError>;

    /// Queue `chunk` for playback. Completes once the engine has accepted
    /// the bytes, which may be before they are audible.
    async fn write(&self, chunk: Bytes) -> Result<(), DeviceError>;

    /// Begin hardware buffer cycles.
    fn start(&self) -> Result<(), DeviceError>;

    /// Stop immediately, discarding anything buffered in the engine.
    fn abort(&self);

    /// Drain buffered audio, then stop.
    async fn quit(&self) -> Result<(), DeviceError>;
}

/// List devices through `engine`. The adapter layer adds nothing here.
pub fn enumerate_devices(engine: &dyn DeviceEngine) -> Result<Vec<DeviceInfo>, DeviceError> {
    engine.enumerate_devices()
}

/// The engine's default device for `direction`, if any.
pub fn default_device(
    engine: &dyn DeviceEngine,
    direction: Direction,
) -> Result<Option<DeviceInfo>, DeviceError> {
    Ok(engine
        .enumerate_devices()?
        .into_iter()
        .find(|d| d.is_default_for(direction) && d.supports(direction)))
}
