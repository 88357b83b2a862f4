use std::fmt;

use serde::{Deserialize, Serialize};

use super::device::{DeviceInfo, Direction};
use super::error::AdapterError;

/// Default number of bytes requested per capture pull.
pub const DEFAULT_PULL_SIZE: usize = 1024;

/// Default stream-level buffering bound in bytes.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16384;

/// Device selector. Serialized as an integer where `-1` means the
/// engine's default device for the requested direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum DeviceId {
    #[default]
    Default,
    Index(u32),
}

impl TryFrom<i64> for DeviceId {
    type Error = AdapterError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value < 0 {
            return Ok(Self::Default);
        }
        u32::try_from(value).map(Self::Index).map_err(|_| {
            AdapterError::InvalidConfiguration(format!("device id {} is out of range", value))
        })
    }
}

impl From<DeviceId> for i64 {
    fn from(id: DeviceId) -> Self {
        match id {
            DeviceId::Default => -1,
            DeviceId::Index(index) => i64::from(index),
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Index(index) => write!(f, "#{}", index),
        }
    }
}

/// PCM sample width. Serialized as bits per sample (8, 16, 24 or 32).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum SampleFormat {
    Int8,
    #[default]
    Int16,
    Int24,
    Int32,
}

impl SampleFormat {
    pub fn bits(&self) -> u16 {
        match self {
            Self::Int8 => 8,
            Self::Int16 => 16,
            Self::Int24 => 24,
            Self::Int32 => 32,
        }
    }

    /// Byte width of one interleaved sample slot.
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits() / 8)
    }
}

impl TryFrom<u16> for SampleFormat {
    type Error = AdapterError;

    fn try_from(bits: u16) -> Result<Self, Self::Error> {
        match bits {
            8 => Ok(Self::Int8),
            16 => Ok(Self::Int16),
            24 => Ok(Self::Int24),
            32 => Ok(Self::Int32),
            other => Err(AdapterError::UnsupportedSampleFormat(other)),
        }
    }
}

impl From<SampleFormat> for u16 {
    fn from(format: SampleFormat) -> Self {
        format.bits()
    }
}

/// Configuration for a capture or playback adapter.
///
/// Resolved once when the adapter is opened; `None` fields fall back to
/// the selected device's defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioConfig {
    /// Target device, or `-1` for the system default.
    pub device_id: DeviceId,

    /// Sample rate in Hz (default: device default rate).
    pub sample_rate: Option<u32>,

    /// Interleaved channel count (default: stereo, capped at the device maximum).
    pub channel_count: Option<u16>,

    /// Bits per sample (default: 16).
    pub sample_format: Option<SampleFormat>,

    /// Frames per hardware buffer, passed through to the engine.
    pub frames_per_buffer: Option<u32>,

    /// Number of buffers the engine may queue, passed through to the engine.
    pub max_queue: Option<u32>,

    /// Bytes the stream layer buffers ahead of the consumer (capture) or
    /// behind the producer (playback).
    pub high_water_mark: usize,

    /// Abort the adapter on a device read/write failure instead of dropping
    /// the failed buffer.
    pub close_on_error: bool,
}

impl AudioConfig {
    /// Parse the JSON configuration surface and validate it.
    pub fn from_json(json: &str) -> Result<Self, AdapterError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AdapterError::InvalidConfiguration(e.to_string()))?;
        config.validate().map_err(AdapterError::InvalidConfiguration)?;
        Ok(config)
    }

    pub fn with_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn with_channel_count(mut self, channel_count: u16) -> Self {
        self.channel_count = Some(channel_count);
        self
    }

    pub fn with_sample_format(mut self, sample_format: SampleFormat) -> Self {
        self.sample_format = Some(sample_format);
        self
    }

    pub fn with_high_water_mark(mut self, bytes: usize) -> Self {
        self.high_water_mark = bytes;
        self
    }

    pub fn with_close_on_error(mut self, close_on_error: bool) -> Self {
        self.close_on_error = close_on_error;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == Some(0) {
            return Err("sample rate must be positive".into());
        }
        if self.channel_count == Some(0) {
            return Err("channel count must be positive".into());
        }
        if self.frames_per_buffer == Some(0) {
            return Err("frames per buffer must be positive".into());
        }
        if self.high_water_mark == 0 {
            return Err("high water mark must be positive".into());
        }
        Ok(())
    }

    /// Pick a device from `devices` and fill in device defaults.
    pub fn resolve(
        &self,
        devices: &[DeviceInfo],
        direction: Direction,
    ) -> Result<StreamParams, AdapterError> {
        self.validate().map_err(AdapterError::InvalidConfiguration)?;

        let device = match self.device_id {
            DeviceId::Default => devices
                .iter()
                .find(|d| d.is_default_for(direction) && d.supports(direction))
                .or_else(|| devices.iter().find(|d| d.supports(direction))),
            DeviceId::Index(index) => devices.iter().find(|d| d.id == index),
        }
        .ok_or(AdapterError::DeviceNotFound(self.device_id))?;

        let max_channels = device.max_channels(direction);
        if max_channels == 0 {
            return Err(AdapterError::UnsupportedDirection {
                device: device.name.clone(),
                direction: match direction {
                    Direction::Input => "input",
                    Direction::Output => "output",
                },
            });
        }

        Ok(StreamParams {
            device: device.clone(),
            direction,
            sample_rate: self.sample_rate.unwrap_or(device.default_sample_rate),
            channel_count: self.channel_count.unwrap_or_else(|| max_channels.min(2)),
            sample_format: self.sample_format.unwrap_or_default(),
            frames_per_buffer: self.frames_per_buffer,
            max_queue: self.max_queue,
        })
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_id: DeviceId::Default,
            sample_rate: None,
            channel_count: None,
            sample_format: None,
            frames_per_buffer: None,
            max_queue: None,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            close_on_error: false,
        }
    }
}

/// Fully resolved stream parameters handed to `DeviceEngine::open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamParams {
    pub device: DeviceInfo,
    pub direction: Direction,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub sample_format: SampleFormat,
    pub frames_per_buffer: Option<u32>,
    pub max_queue: Option<u32>,
}

impl StreamParams {
    /// Bytes per interleaved frame (all channels of one sample instant).
    pub fn bytes_per_frame(&self) -> usize {
        self.sample_format.bytes_per_sample() * usize::from(self.channel_count)
    }
}
