use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures::sink::Sink;

use crate::adapter::playback::PlaybackAdapter;
use crate::models::config::AudioConfig;
use crate::models::error::AdapterError;
use crate::models::state::AdapterState;
use crate::traits::device_engine::DeviceEngine;

/// A live output device as a `Sink` of PCM chunks.
///
/// `poll_ready` holds the producer back while `high_water_mark` bytes are
/// waiting for the device. Closing the sink is end-of-supply: queued
/// chunks are written, the device drains, and the adapter stops.
pub struct PlaybackSink {
    adapter: PlaybackAdapter,
    high_water_mark: usize,
    close_on_error: bool,
}

impl PlaybackSink {
    pub fn open(engine: &dyn DeviceEngine, config: &AudioConfig) -> Result<Self, AdapterError> {
        let adapter = PlaybackAdapter::open(engine, config)?;
        Ok(Self::new(adapter, config.high_water_mark, config.close_on_error))
    }

    pub fn new(adapter: PlaybackAdapter, high_water_mark: usize, close_on_error: bool) -> Self {
        Self {
            adapter,
            high_water_mark: high_water_mark.max(1),
            close_on_error,
        }
    }

    pub fn state(&self) -> AdapterState {
        self.adapter.state()
    }

    pub fn adapter(&self) -> &PlaybackAdapter {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut PlaybackAdapter {
        &mut self.adapter
    }

    pub fn into_inner(self) -> PlaybackAdapter {
        self.adapter
    }

    pub fn abort(&mut self) {
        self.adapter.abort();
    }

    fn ensure_started(&mut self) -> Result<(), AdapterError> {
        match self.adapter.state() {
            AdapterState::Idle => self.adapter.start(),
            AdapterState::Running => Ok(()),
            AdapterState::Stopping | AdapterState::Stopped => Err(AdapterError::Stopped),
        }
    }

    /// Write failures already reached the delegate and the log; they only
    /// fail the sink when `close_on_error` is set.
    fn check_write_error(&mut self) -> Result<(), AdapterError> {
        let Some(error) = self.adapter.take_write_error() else {
            return Ok(());
        };
        if !self.close_on_error {
            return Ok(());
        }
        log::error!("playback {}: closing sink after write failure", self.adapter.id());
        self.adapter.abort();
        Err(error.into())
    }
}

impl Sink<Bytes> for PlaybackSink {
    type Error = AdapterError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        this.ensure_started()?;

        let _ = this.adapter.poll_drive(cx);
        this.check_write_error()?;

        if this.adapter.queued_bytes() >= this.high_water_mark {
            return Poll::Pending;
        }
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Bytes) -> Result<(), Self::Error> {
        self.get_mut().adapter.push(item).map(drop)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        ready!(this.adapter.poll_drive(cx));
        this.check_write_error()?;
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        ready!(this.adapter.poll_quit(cx))?;
        this.check_write_error()?;
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::error::DeviceError;
    use crate::sim::{CompletionMode, DeviceOp, SimulatedEngine};
    use futures::executor::block_on;
    use futures::task::noop_waker_ref;
    use futures::{stream, SinkExt, StreamExt};

    fn chunk(tag: u8) -> Bytes {
        Bytes::from(vec![tag; 8])
    }

    #[test]
    fn send_all_then_close_plays_everything_and_quits() {
        let engine = SimulatedEngine::with_default_devices();
        let mut sink = PlaybackSink::open(&engine, &AudioConfig::default()).unwrap();

        let mut supply = stream::iter((0..4).map(chunk)).map(Ok);
        block_on(sink.send_all(&mut supply)).unwrap();
        block_on(sink.close()).unwrap();

        let device = engine.last_device();
        assert_eq!(device.written(), (0..4).map(chunk).collect::<Vec<_>>());
        assert_eq!(device.ops().first(), Some(&DeviceOp::Start));
        assert_eq!(device.ops().last(), Some(&DeviceOp::Quit));
        assert_eq!(sink.state(), AdapterState::Stopped);
    }

    #[test]
    fn high_water_mark_applies_backpressure() {
        let engine = SimulatedEngine::with_default_devices().completion_mode(CompletionMode::Manual);
        let config = AudioConfig::default().with_high_water_mark(16);
        let mut sink = PlaybackSink::open(&engine, &config).unwrap();
        let mut cx = Context::from_waker(noop_waker_ref());

        assert!(Pin::new(&mut sink).poll_ready(&mut cx).is_ready());
        Pin::new(&mut sink).start_send(chunk(0)).unwrap();
        assert!(Pin::new(&mut sink).poll_ready(&mut cx).is_ready());
        Pin::new(&mut sink).start_send(chunk(1)).unwrap();

        // 16 bytes waiting on the device.
        assert!(Pin::new(&mut sink).poll_ready(&mut cx).is_pending());

        assert!(engine.last_device().release_next());
        assert!(Pin::new(&mut sink).poll_ready(&mut cx).is_ready());
    }

    #[test]
    fn sink_refuses_items_after_close() {
        let engine = SimulatedEngine::with_default_devices();
        let mut sink = PlaybackSink::open(&engine, &AudioConfig::default()).unwrap();

        block_on(sink.send(chunk(0))).unwrap();
        block_on(sink.close()).unwrap();

        assert_eq!(block_on(sink.send(chunk(1))), Err(AdapterError::Stopped));
        assert_eq!(engine.last_device().accepted_count(), 1);
    }

    #[test]
    fn write_failure_is_tolerated_by_default() {
        let engine = SimulatedEngine::with_default_devices();
        let mut sink = PlaybackSink::open(&engine, &AudioConfig::default()).unwrap();
        engine.last_device().fail_write(0);

        block_on(sink.send(chunk(0))).unwrap();
        block_on(sink.send(chunk(1))).unwrap();

        assert_eq!(engine.last_device().written(), vec![chunk(1)]);
        assert!(sink.state().is_running());
    }

    #[test]
    fn close_on_error_aborts_on_write_failure() {
        let engine = SimulatedEngine::with_default_devices();
        let config = AudioConfig::default().with_close_on_error(true);
        let mut sink = PlaybackSink::open(&engine, &config).unwrap();
        engine.last_device().fail_write(0);

        let err = block_on(sink.send(chunk(0))).unwrap_err();

        assert!(matches!(err, AdapterError::Device(DeviceError::WriteFailed(_))));
        assert_eq!(sink.state(), AdapterState::Stopped);
        assert_eq!(engine.last_device().ops().last(), Some(&DeviceOp::Abort));
    }
}
