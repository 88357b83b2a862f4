use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::config::StreamParams;
use crate::models::device::DeviceInfo;
use crate::models::error::DeviceError;
use crate::traits::device_engine::{DeviceEngine, DeviceHandle};

use super::device::{CompletionMode, SimulatedDevice};

/// In-process device engine with a fixed device list.
///
/// Every `open` creates a fresh `SimulatedDevice`; the engine keeps a
/// reference so tests can inspect what the adapter did with it.
pub struct SimulatedEngine {
    devices: Vec<DeviceInfo>,
    mode: CompletionMode,
    fail_enumeration: bool,
    opened: Mutex<Vec<Arc<SimulatedDevice>>>,
}

impl SimulatedEngine {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        Self {
            devices,
            mode: CompletionMode::Immediate,
            fail_enumeration: false,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// A stereo microphone (id 0, default input), stereo speakers (id 1,
    /// default output) and a headset with mono input (id 2).
    pub fn with_default_devices() -> Self {
        Self::new(vec![
            sim_device(0, "Simulated Microphone", 2, 0, true, false),
            sim_device(1, "Simulated Speakers", 0, 2, false, true),
            sim_device(2, "Simulated Headset", 1, 2, false, false),
        ])
    }

    pub fn completion_mode(mut self, mode: CompletionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn failing_enumeration(mut self) -> Self {
        self.fail_enumeration = true;
        self
    }

    /// Devices opened so far, oldest first.
    pub fn opened(&self) -> Vec<Arc<SimulatedDevice>> {
        self.opened.lock().clone()
    }

    /// The most recently opened device.
    ///
    /// # Panics
    ///
    /// Panics if nothing has been opened yet.
    pub fn last_device(&self) -> Arc<SimulatedDevice> {
        self.opened
            .lock()
            .last()
            .cloned()
            .expect("no simulated device has been opened")
    }
}

impl DeviceEngine for SimulatedEngine {
    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        if self.fail_enumeration {
            return Err(DeviceError::Enumeration("simulated enumeration failure".into()));
        }
        Ok(self.devices.clone())
    }

    fn open(&self, params: &StreamParams) -> Result<Arc<dyn DeviceHandle>, DeviceError> {
        let device = Arc::new(SimulatedDevice::new(params.clone(), self.mode));
        self.opened.lock().push(Arc::clone(&device));
        log::debug!("simulated engine opened {} for {}", params.device.name, params.direction);
        let handle: Arc<dyn DeviceHandle> = device;
        Ok(handle)
    }
}

fn sim_device(
    id: u32,
    name: &str,
    inputs: u16,
    outputs: u16,
    default_input: bool,
    default_output: bool,
) -> DeviceInfo {
    DeviceInfo {
        id,
        name: name.into(),
        host_api: "Simulated".into(),
        max_input_channels: inputs,
        max_output_channels: outputs,
        default_sample_rate: 44100,
        supported_sample_rates: vec![44100, 48000],
        is_default_input: default_input,
        is_default_output: default_output,
    }
}
