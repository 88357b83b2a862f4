//! Supply-push playback adapter.
//!
//! `push` accepts a chunk synchronously and hands back a `WriteTicket`.
//! Queued chunks are submitted to the device one at a time, in push order;
//! the next write starts only after the previous one has completed.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures::channel::oneshot;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use uuid::Uuid;

use crate::adapter::lifecycle::{self, DeviceQuit, Lifecycle};
use crate::models::config::{AudioConfig, StreamParams};
use crate::models::device::Direction;
use crate::models::diagnostics::AdapterDiagnostics;
use crate::models::error::{AdapterError, DeviceError};
use crate::models::state::{AdapterRole, AdapterState};
use crate::traits::adapter_delegate::AdapterDelegate;
use crate::traits::device_engine::{DeviceEngine, DeviceHandle};

type WriteOutcome = Result<(), DeviceError>;

/// Resolves when the device has accepted (not necessarily played) a chunk.
///
/// Yields the device's write error if the chunk was rejected, or
/// `AdapterError::Aborted` if the adapter was aborted first. Dropping the
/// ticket does not cancel the write.
#[derive(Debug)]
pub struct WriteTicket {
    receiver: oneshot::Receiver<WriteOutcome>,
}

impl Future for WriteTicket {
    type Output = Result<(), AdapterError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(self.receiver.poll_unpin(cx)) {
            Ok(Ok(())) => Poll::Ready(Ok(())),
            Ok(Err(e)) => Poll::Ready(Err(e.into())),
            Err(oneshot::Canceled) => Poll::Ready(Err(AdapterError::Aborted)),
        }
    }
}

struct QueuedWrite {
    chunk: Bytes,
    done: oneshot::Sender<WriteOutcome>,
}

struct PendingWrite {
    len: usize,
    future: BoxFuture<'static, WriteOutcome>,
    done: oneshot::Sender<WriteOutcome>,
}

/// Presents a live output device as a sink for byte chunks.
pub struct PlaybackAdapter {
    handle: Arc<dyn DeviceHandle>,
    params: StreamParams,
    lifecycle: Lifecycle,
    queue: VecDeque<QueuedWrite>,
    in_flight: Option<PendingWrite>,
    device_quit: DeviceQuit,
    last_write_error: Option<DeviceError>,
    diagnostics: AdapterDiagnostics,
}

impl PlaybackAdapter {
    /// Resolve `config` against the engine's devices and open an output
    /// stream.
    pub fn open(engine: &dyn DeviceEngine, config: &AudioConfig) -> Result<Self, AdapterError> {
        let devices = engine.enumerate_devices()?;
        let params = config.resolve(&devices, Direction::Output)?;
        let handle = engine.open(&params)?;

        log::debug!(
            "opened playback on {} ({} Hz, {} ch, {} bit)",
            params.device.name,
            params.sample_rate,
            params.channel_count,
            params.sample_format.bits()
        );
        Ok(Self::from_handle(handle, params))
    }

    /// Wrap an already opened output handle.
    pub fn from_handle(handle: Arc<dyn DeviceHandle>, params: StreamParams) -> Self {
        Self {
            handle,
            params,
            lifecycle: Lifecycle::new(AdapterRole::Playback),
            queue: VecDeque::new(),
            in_flight: None,
            device_quit: DeviceQuit::default(),
            last_write_error: None,
            diagnostics: AdapterDiagnostics::default(),
        }
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn AdapterDelegate>) {
        self.lifecycle.set_delegate(delegate);
    }

    pub fn id(&self) -> Uuid {
        self.lifecycle.id()
    }

    pub fn state(&self) -> AdapterState {
        self.lifecycle.state()
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    pub fn diagnostics(&self) -> AdapterDiagnostics {
        self.diagnostics
    }

    /// Bytes pushed but not yet accepted by the device, including the
    /// write in flight.
    pub fn queued_bytes(&self) -> usize {
        self.queue.iter().map(|w| w.chunk.len()).sum::<usize>()
            + self.in_flight.as_ref().map_or(0, |w| w.len)
    }

    pub fn pending_writes(&self) -> usize {
        self.queue.len() + usize::from(self.in_flight.is_some())
    }

    /// The most recent write failure not yet collected.
    pub fn take_write_error(&mut self) -> Option<DeviceError> {
        self.last_write_error.take()
    }

    /// Transition `Idle → Running` and start the device.
    pub fn start(&mut self) -> Result<(), AdapterError> {
        let handle = &self.handle;
        self.lifecycle.start(|| handle.start())
    }

    /// Accept `chunk` for playback.
    ///
    /// Returning `Ok` is the flow-control "accepted" signal; it does not
    /// wait for the device. Fails with `Stopped` once `quit` or `abort`
    /// has been called.
    pub fn push(&mut self, chunk: Bytes) -> Result<WriteTicket, AdapterError> {
        self.lifecycle.ensure_accepting()?;
        let (done, receiver) = oneshot::channel();
        self.queue.push_back(QueuedWrite { chunk, done });
        if self.in_flight.is_none() {
            self.submit_next();
        }
        Ok(WriteTicket { receiver })
    }

    /// Submit queued chunks to the device one at a time.
    ///
    /// Ready once every pushed chunk has been settled by the device.
    pub fn poll_drive(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        loop {
            if self.in_flight.is_none() {
                if self.lifecycle.state().is_terminal() || self.queue.is_empty() {
                    return Poll::Ready(());
                }
                self.submit_next();
            }
            let Some(write) = self.in_flight.as_mut() else {
                return Poll::Ready(());
            };
            let outcome = ready!(write.future.as_mut().poll(cx));
            if let Some(write) = self.in_flight.take() {
                self.settle(write, outcome);
            }
        }
    }

    pub async fn flush(&mut self) {
        future::poll_fn(|cx| self.poll_drive(cx)).await
    }

    /// Push `chunk` and drive the device until it has been accepted.
    pub async fn write(&mut self, chunk: Bytes) -> Result<(), AdapterError> {
        let ticket = self.push(chunk)?;
        self.flush().await;
        ticket.await
    }

    /// Stop immediately. Queued chunks are dropped (their tickets resolve
    /// `Aborted`) and the chunk mid-write may not finish playing. A no-op
    /// once stopped.
    pub fn abort(&mut self) {
        if self.lifecycle.state().is_terminal() {
            return;
        }
        let discarded = self.pending_writes();
        self.queue.clear();
        self.in_flight = None;
        self.device_quit.cancel();
        self.handle.abort();
        log::debug!("playback {}: aborted, {} writes discarded", self.id(), discarded);
        self.lifecycle.finish();
    }

    /// Graceful stop: every queued chunk is written, the device drains, then
    /// the adapter stops. Resolves once per call; on an adapter that has
    /// already stopped it resolves `Ok` immediately.
    pub fn poll_quit(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), AdapterError>> {
        if !self.lifecycle.begin_quit() {
            return Poll::Ready(Ok(()));
        }
        let drained = self.poll_drive(cx);
        lifecycle::poll_graceful_stop(
            &mut self.lifecycle,
            &mut self.device_quit,
            &self.handle,
            drained,
            cx,
        )
    }

    pub async fn quit(&mut self) -> Result<(), AdapterError> {
        future::poll_fn(|cx| self.poll_quit(cx)).await
    }

    fn submit_next(&mut self) {
        let Some(QueuedWrite { chunk, done }) = self.queue.pop_front() else {
            return;
        };
        let len = chunk.len();
        let handle = Arc::clone(&self.handle);
        self.in_flight = Some(PendingWrite {
            len,
            future: async move { handle.write(chunk).await }.boxed(),
            done,
        });
        self.diagnostics.writes_issued += 1;
        log::trace!("playback {}: write of {} bytes submitted", self.lifecycle.id(), len);
    }

    fn settle(&mut self, write: PendingWrite, outcome: WriteOutcome) {
        match &outcome {
            Ok(()) => {
                self.diagnostics.writes_completed += 1;
                self.diagnostics.bytes_written += write.len as u64;
            }
            Err(error) => {
                self.diagnostics.writes_failed += 1;
                log::warn!("playback {}: {}-byte write failed: {}", self.id(), write.len, error);
                if let Some(delegate) = self.lifecycle.delegate() {
                    delegate.on_write_failed(error);
                }
                self.last_write_error = Some(error.clone());
            }
        }
        // The producer may have dropped its ticket.
        let _ = write.done.send(outcome);
    }
}

impl Drop for PlaybackAdapter {
    fn drop(&mut self) {
        if !self.lifecycle.state().is_terminal() {
            self.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{CompletionMode, DeviceOp, SimulatedEngine};
    use futures::executor::block_on;
    use futures::task::noop_waker_ref;

    fn open(engine: &SimulatedEngine) -> PlaybackAdapter {
        PlaybackAdapter::open(engine, &AudioConfig::default()).unwrap()
    }

    #[test]
    fn write_resolves_once_device_accepts() {
        let engine = SimulatedEngine::with_default_devices();
        let mut playback = open(&engine);
        playback.start().unwrap();

        block_on(playback.write(Bytes::from_static(b"abcd"))).unwrap();

        assert_eq!(engine.last_device().written(), vec![Bytes::from_static(b"abcd")]);
        assert_eq!(playback.diagnostics().bytes_written, 4);
        assert_eq!(playback.queued_bytes(), 0);
    }

    #[test]
    fn push_is_accepted_before_the_device_settles() {
        let engine = SimulatedEngine::with_default_devices().completion_mode(CompletionMode::Manual);
        let mut playback = open(&engine);
        playback.start().unwrap();

        let mut ticket = playback.push(Bytes::from_static(b"xy")).unwrap();
        let mut cx = Context::from_waker(noop_waker_ref());
        assert!(playback.poll_drive(&mut cx).is_pending());
        assert!(Pin::new(&mut ticket).poll(&mut cx).is_pending());
        assert_eq!(playback.queued_bytes(), 2);

        assert!(engine.last_device().release_next());
        assert!(playback.poll_drive(&mut cx).is_ready());
        assert_eq!(block_on(ticket), Ok(()));
    }

    #[test]
    fn write_failure_reaches_ticket_and_error_slot() {
        let engine = SimulatedEngine::with_default_devices();
        let mut playback = open(&engine);
        engine.last_device().fail_write(0);
        playback.start().unwrap();

        let err = block_on(playback.write(Bytes::from_static(b"zz"))).unwrap_err();

        assert!(matches!(err, AdapterError::Device(DeviceError::WriteFailed(_))));
        assert!(matches!(playback.take_write_error(), Some(DeviceError::WriteFailed(_))));
        assert_eq!(playback.take_write_error(), None);
        assert_eq!(playback.diagnostics().writes_failed, 1);
        assert!(playback.state().is_running());
    }

    #[test]
    fn abort_cancels_queued_tickets() {
        let engine = SimulatedEngine::with_default_devices().completion_mode(CompletionMode::Manual);
        let mut playback = open(&engine);
        playback.start().unwrap();

        let first = playback.push(Bytes::from_static(b"a")).unwrap();
        let second = playback.push(Bytes::from_static(b"b")).unwrap();
        let mut cx = Context::from_waker(noop_waker_ref());
        assert!(playback.poll_drive(&mut cx).is_pending());

        playback.abort();

        assert_eq!(block_on(first), Err(AdapterError::Aborted));
        assert_eq!(block_on(second), Err(AdapterError::Aborted));
        assert!(!engine.last_device().release_next());
        assert_eq!(engine.last_device().accepted_count(), 0);
        assert_eq!(playback.push(Bytes::from_static(b"c")).unwrap_err(), AdapterError::Stopped);
    }

    #[test]
    fn quit_from_idle_still_releases_the_device() {
        let engine = SimulatedEngine::with_default_devices();
        let mut playback = open(&engine);

        block_on(playback.quit()).unwrap();

        assert_eq!(playback.state(), AdapterState::Stopped);
        assert_eq!(engine.last_device().ops(), vec![DeviceOp::Quit]);
    }

    #[test]
    fn failed_device_quit_still_stops() {
        let engine = SimulatedEngine::with_default_devices();
        let mut playback = open(&engine);
        engine.last_device().fail_quit();
        playback.start().unwrap();

        let err = block_on(playback.quit()).unwrap_err();

        assert!(matches!(err, AdapterError::Device(DeviceError::QuitFailed(_))));
        assert_eq!(playback.state(), AdapterState::Stopped);
    }
}
