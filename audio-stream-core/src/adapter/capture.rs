//! Demand-pull capture adapter.
//!
//! Each `pull` records one read request. Requests are issued to the device
//! strictly one at a time, in request order, and every successful read is
//! appended to the delivery queue in completion order (which is request
//! order, since reads never overlap).

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use uuid::Uuid;

use crate::adapter::lifecycle::{self, DeviceQuit, Lifecycle};
use crate::models::config::{AudioConfig, StreamParams, DEFAULT_PULL_SIZE};
use crate::models::device::Direction;
use crate::models::diagnostics::AdapterDiagnostics;
use crate::models::error::{AdapterError, DeviceError};
use crate::models::state::{AdapterRole, AdapterState};
use crate::traits::adapter_delegate::AdapterDelegate;
use crate::traits::device_engine::{DeviceEngine, DeviceHandle};

/// What the capture adapter does when a device read fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadErrorPolicy {
    /// Discard the failed read. Nothing is delivered for that pull, no
    /// error reaches the consumer and the read is not retried.
    #[default]
    DropOnTransientReadError,
    /// Abort the adapter, ending the capture.
    AbortOnReadError,
}

struct PendingRead {
    size: usize,
    future: BoxFuture<'static, Result<Bytes, DeviceError>>,
}

/// Presents a live input device as a sequence of byte chunks.
pub struct CaptureAdapter {
    handle: Arc<dyn DeviceHandle>,
    params: StreamParams,
    policy: ReadErrorPolicy,
    lifecycle: Lifecycle,
    requests: VecDeque<usize>,
    in_flight: Option<PendingRead>,
    delivered: VecDeque<Bytes>,
    device_quit: DeviceQuit,
    diagnostics: AdapterDiagnostics,
}

impl CaptureAdapter {
    /// Resolve `config` against the engine's devices and open an input
    /// stream. Either returns a usable adapter or fails without leaving a
    /// handle behind.
    pub fn open(engine: &dyn DeviceEngine, config: &AudioConfig) -> Result<Self, AdapterError> {
        let devices = engine.enumerate_devices()?;
        let params = config.resolve(&devices, Direction::Input)?;
        let handle = engine.open(&params)?;
        let policy = if config.close_on_error {
            ReadErrorPolicy::AbortOnReadError
        } else {
            ReadErrorPolicy::DropOnTransientReadError
        };

        log::debug!(
            "opened capture on {} ({} Hz, {} ch, {} bit)",
            params.device.name,
            params.sample_rate,
            params.channel_count,
            params.sample_format.bits()
        );
        Ok(Self::from_handle(handle, params, policy))
    }

    /// Wrap an already opened input handle.
    pub fn from_handle(
        handle: Arc<dyn DeviceHandle>,
        params: StreamParams,
        policy: ReadErrorPolicy,
    ) -> Self {
        Self {
            handle,
            params,
            policy,
            lifecycle: Lifecycle::new(AdapterRole::Capture),
            requests: VecDeque::new(),
            in_flight: None,
            delivered: VecDeque::new(),
            device_quit: DeviceQuit::default(),
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

    pub fn policy(&self) -> ReadErrorPolicy {
        self.policy
    }

    pub fn diagnostics(&self) -> AdapterDiagnostics {
        self.diagnostics
    }

    /// Bytes delivered by the device but not yet taken by the consumer.
    pub fn buffered_bytes(&self) -> usize {
        self.delivered.iter().map(Bytes::len).sum()
    }

    /// Bytes requested from the device and not yet completed.
    pub fn outstanding_bytes(&self) -> usize {
        self.requests.iter().sum::<usize>() + self.in_flight.as_ref().map_or(0, |r| r.size)
    }

    /// True while a delivered buffer, possibly empty, is waiting.
    pub fn has_buffered(&self) -> bool {
        !self.delivered.is_empty()
    }

    pub fn has_outstanding_reads(&self) -> bool {
        self.in_flight.is_some() || !self.requests.is_empty()
    }

    /// Transition `Idle → Running` and start the device.
    pub fn start(&mut self) -> Result<(), AdapterError> {
        let handle = &self.handle;
        self.lifecycle.start(|| handle.start())
    }

    /// Request one read of `size_hint` bytes (default 1024).
    ///
    /// Pulling before `start` is passed through to the device unchanged.
    pub fn pull(&mut self, size_hint: Option<usize>) -> Result<(), AdapterError> {
        self.lifecycle.ensure_accepting()?;
        self.requests.push_back(size_hint.unwrap_or(DEFAULT_PULL_SIZE));
        if self.in_flight.is_none() {
            self.issue_next();
        }
        Ok(())
    }

    /// Drive the outstanding read and hand out the next delivered buffer.
    ///
    /// Returns `Ready(None)` once the adapter has stopped and every
    /// delivered buffer has been taken. With no read outstanding this
    /// stays `Pending` until the next `pull`.
    pub fn poll_next_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        let _ = self.drive(cx);

        if let Some(chunk) = self.delivered.pop_front() {
            return Poll::Ready(Some(chunk));
        }
        if self.lifecycle.state().is_terminal() {
            return Poll::Ready(None);
        }
        Poll::Pending
    }

    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        future::poll_fn(|cx| self.poll_next_chunk(cx)).await
    }

    /// Stop immediately. The outstanding read is abandoned and anything not
    /// yet handed to the consumer is discarded. A no-op once stopped.
    pub fn abort(&mut self) {
        if self.lifecycle.state().is_terminal() {
            return;
        }
        let discarded = self.delivered.len() + self.requests.len() + usize::from(self.in_flight.is_some());
        self.requests.clear();
        self.in_flight = None;
        self.delivered.clear();
        self.device_quit.cancel();
        self.handle.abort();
        log::debug!("capture {}: aborted, {} buffers discarded", self.id(), discarded);
        self.lifecycle.finish();
    }

    /// Graceful stop: outstanding reads complete and stay deliverable, then
    /// the device drains and stops. Resolves once per call; on an adapter
    /// that has already stopped it resolves `Ok` immediately.
    ///
    /// Resolves `Aborted` when a failed read aborts the adapter mid-drain
    /// under `AbortOnReadError`. Dropping the future leaves the adapter
    /// `Stopping`; polling again resumes the stop.
    pub fn poll_quit(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), AdapterError>> {
        if !self.lifecycle.begin_quit() {
            return Poll::Ready(Ok(()));
        }
        let drained = self.drive(cx);
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

    fn issue_next(&mut self) {
        let Some(size) = self.requests.pop_front() else {
            return;
        };
        let handle = Arc::clone(&self.handle);
        self.in_flight = Some(PendingRead {
            size,
            future: async move { handle.read(size).await }.boxed(),
        });
        self.diagnostics.reads_issued += 1;
        log::trace!("capture {}: read of {} bytes issued", self.lifecycle.id(), size);
    }

    /// Ready once no read is outstanding or queued.
    fn drive(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        loop {
            if self.in_flight.is_none() {
                if self.lifecycle.state().is_terminal() || self.requests.is_empty() {
                    return Poll::Ready(());
                }
                self.issue_next();
            }
            let Some(read) = self.in_flight.as_mut() else {
                return Poll::Ready(());
            };
            let result = ready!(read.future.as_mut().poll(cx));
            let size = read.size;
            self.in_flight = None;

            match result {
                Ok(buffer) => {
                    self.diagnostics.reads_completed += 1;
                    self.diagnostics.bytes_delivered += buffer.len() as u64;
                    self.delivered.push_back(buffer);
                }
                Err(error) => self.read_failed(size, error),
            }
        }
    }

    fn read_failed(&mut self, size: usize, error: DeviceError) {
        self.diagnostics.reads_dropped += 1;
        if let Some(delegate) = self.lifecycle.delegate() {
            delegate.on_read_dropped(&error);
        }
        match self.policy {
            ReadErrorPolicy::DropOnTransientReadError => {
                log::warn!("capture {}: dropped {}-byte read: {}", self.id(), size, error);
            }
            ReadErrorPolicy::AbortOnReadError => {
                log::error!("capture {}: read failed, aborting: {}", self.id(), error);
                self.abort();
            }
        }
    }
}

impl Drop for CaptureAdapter {
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

    fn open(engine: &SimulatedEngine) -> CaptureAdapter {
        CaptureAdapter::open(engine, &AudioConfig::default()).unwrap()
    }

    #[test]
    fn pull_delivers_one_buffer_per_request() {
        let engine = SimulatedEngine::with_default_devices();
        let mut capture = open(&engine);
        capture.start().unwrap();

        capture.pull(Some(256)).unwrap();
        let chunk = block_on(capture.next_chunk()).unwrap();

        assert_eq!(chunk.len(), 256);
        assert_eq!(capture.diagnostics().reads_completed, 1);
        assert_eq!(capture.diagnostics().bytes_delivered, 256);
    }

    #[test]
    fn default_pull_size_is_1024() {
        let engine = SimulatedEngine::with_default_devices();
        let mut capture = open(&engine);
        capture.start().unwrap();

        capture.pull(None).unwrap();
        assert_eq!(block_on(capture.next_chunk()).unwrap().len(), 1024);
        assert_eq!(engine.last_device().reads(), vec![1024]);
    }

    #[test]
    fn failed_read_is_dropped_silently_and_not_retried() {
        let engine = SimulatedEngine::with_default_devices();
        let mut capture = open(&engine);
        let device = engine.last_device();
        device.fail_read(0);
        capture.start().unwrap();

        capture.pull(Some(64)).unwrap();
        let mut cx = Context::from_waker(noop_waker_ref());
        assert!(capture.poll_next_chunk(&mut cx).is_pending());
        assert!(!capture.has_outstanding_reads());
        assert_eq!(device.reads().len(), 1);
        assert_eq!(capture.diagnostics().reads_dropped, 1);
        assert!(capture.state().is_running());

        capture.pull(Some(64)).unwrap();
        assert_eq!(block_on(capture.next_chunk()).unwrap().len(), 64);
    }

    #[test]
    fn abort_policy_ends_capture_on_read_failure() {
        let engine = SimulatedEngine::with_default_devices();
        let config = AudioConfig::default().with_close_on_error(true);
        let mut capture = CaptureAdapter::open(&engine, &config).unwrap();
        assert_eq!(capture.policy(), ReadErrorPolicy::AbortOnReadError);
        engine.last_device().fail_read(0);
        capture.start().unwrap();

        capture.pull(Some(64)).unwrap();
        capture.pull(Some(64)).unwrap();

        assert_eq!(block_on(capture.next_chunk()), None);
        assert_eq!(capture.state(), AdapterState::Stopped);
        assert_eq!(engine.last_device().reads().len(), 1);
    }

    #[test]
    fn read_failure_during_quit_aborts_without_device_quit() {
        let engine = SimulatedEngine::with_default_devices();
        let config = AudioConfig::default().with_close_on_error(true);
        let mut capture = CaptureAdapter::open(&engine, &config).unwrap();
        let device = engine.last_device();
        device.fail_read(0);
        capture.start().unwrap();

        capture.pull(Some(64)).unwrap();

        assert_eq!(block_on(capture.quit()), Err(AdapterError::Aborted));
        assert_eq!(capture.state(), AdapterState::Stopped);
        assert_eq!(
            device.ops(),
            vec![DeviceOp::Start, DeviceOp::Read(64), DeviceOp::Abort]
        );
        assert_eq!(block_on(capture.quit()), Ok(()));
    }

    #[test]
    fn pull_before_start_reads_without_starting() {
        let engine = SimulatedEngine::with_default_devices();
        let mut capture = open(&engine);

        capture.pull(Some(48)).unwrap();
        let chunk = block_on(capture.next_chunk()).unwrap();

        assert_eq!(chunk.len(), 48);
        assert!(capture.state().is_idle());
        assert_eq!(engine.last_device().ops(), vec![DeviceOp::Read(48)]);
    }

    #[test]
    fn empty_read_still_counts_as_buffered() {
        let engine = SimulatedEngine::with_default_devices();
        let mut capture = open(&engine);
        capture.start().unwrap();

        capture.pull(Some(0)).unwrap();
        block_on(capture.quit()).unwrap();
        assert!(capture.has_buffered());
        assert_eq!(capture.buffered_bytes(), 0);
        assert_eq!(block_on(capture.next_chunk()), Some(Bytes::new()));
        assert!(!capture.has_buffered());
    }

    #[test]
    fn pull_after_stop_fails_fast() {
        let engine = SimulatedEngine::with_default_devices();
        let mut capture = open(&engine);
        capture.start().unwrap();
        capture.abort();

        assert_eq!(capture.pull(None), Err(AdapterError::Stopped));
    }

    #[test]
    fn quit_delivers_in_flight_read_before_stopping() {
        let engine = SimulatedEngine::with_default_devices().completion_mode(CompletionMode::Manual);
        let mut capture = open(&engine);
        let device = engine.last_device();
        capture.start().unwrap();

        capture.pull(Some(32)).unwrap();
        let mut cx = Context::from_waker(noop_waker_ref());
        assert!(capture.poll_next_chunk(&mut cx).is_pending());

        {
            let mut quit = Box::pin(capture.quit());
            assert!(quit.as_mut().poll(&mut cx).is_pending());
            assert!(device.release_next());
            // Read settled; the device quit is now outstanding.
            assert!(quit.as_mut().poll(&mut cx).is_pending());
            assert!(device.release_next());
            assert_eq!(quit.as_mut().poll(&mut cx), Poll::Ready(Ok(())));
        }

        assert_eq!(capture.state(), AdapterState::Stopped);
        assert_eq!(block_on(capture.next_chunk()).map(|c| c.len()), Some(32));
        assert_eq!(block_on(capture.next_chunk()), None);
        assert_eq!(
            device.ops(),
            vec![DeviceOp::Start, DeviceOp::Read(32), DeviceOp::Quit]
        );
    }

    #[test]
    fn dropping_a_running_adapter_aborts_the_device() {
        let engine = SimulatedEngine::with_default_devices();
        let mut capture = open(&engine);
        capture.start().unwrap();
        drop(capture);

        assert_eq!(engine.last_device().ops(), vec![DeviceOp::Start, DeviceOp::Abort]);
    }
}
