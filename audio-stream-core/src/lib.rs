//! # audio-stream-core
//!
//! Stream adapters over an asynchronous audio device engine.
//!
//! A live microphone becomes a sequence of byte chunks to read and a live
//! speaker a sequence of byte chunks to write, while the device engine
//! performs the hardware I/O in its own buffer cycles. Engine bindings
//! implement the `DeviceEngine` / `DeviceHandle` traits; the adapters only
//! ever talk to those traits.
//!
//! ## Architecture
//!
//! ```text
//! audio-stream-core (this crate)
//! ├── traits/    ← DeviceEngine, DeviceHandle, AdapterDelegate
//! ├── models/    ← AudioConfig, StreamParams, DeviceInfo, AdapterState, errors, diagnostics
//! ├── adapter/   ← CaptureAdapter, PlaybackAdapter, shared lifecycle
//! ├── stream/    ← CaptureStream (futures::Stream), PlaybackSink (futures::Sink)
//! └── sim/       ← SimulatedEngine test double
//! ```
//!
//! ## Usage
//! ```ignore
//! use audio_stream_core::{AudioConfig, CaptureStream, PlaybackSink};
//! use futures::StreamExt;
//!
//! let config = AudioConfig::default().with_sample_rate(48000);
//! let mic = CaptureStream::open(&engine, &config)?;
//! let mut speaker = PlaybackSink::open(&engine, &config)?;
//! mic.take(100).map(Ok).forward(&mut speaker).await?;
//! ```

pub mod adapter;
pub mod models;
pub mod sim;
pub mod stream;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use adapter::capture::{CaptureAdapter, ReadErrorPolicy};
pub use adapter::playback::{PlaybackAdapter, WriteTicket};
pub use models::config::{AudioConfig, DeviceId, SampleFormat, StreamParams};
pub use models::device::{DeviceInfo, Direction};
pub use models::diagnostics::AdapterDiagnostics;
pub use models::error::{AdapterError, DeviceError};
pub use models::state::{AdapterRole, AdapterState};
pub use stream::capture_stream::CaptureStream;
pub use stream::playback_sink::PlaybackSink;
pub use traits::adapter_delegate::AdapterDelegate;
pub use traits::device_engine::{default_device, enumerate_devices, DeviceEngine, DeviceHandle};
