use std::future::Future;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use uuid::Uuid;

use crate::models::error::{AdapterError, DeviceError};
use crate::models::state::{AdapterRole, AdapterState};
use crate::traits::adapter_delegate::AdapterDelegate;
use crate::traits::device_engine::DeviceHandle;

/// State machine shared by the capture and playback adapters.
///
/// Owns the transition rules and fans every transition out to the log and
/// the optional delegate.
pub(crate) struct Lifecycle {
    id: Uuid,
    role: AdapterRole,
    state: AdapterState,
    delegate: Option<Arc<dyn AdapterDelegate>>,
}

impl Lifecycle {
    pub(crate) fn new(role: AdapterRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            state: AdapterState::Idle,
            delegate: None,
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn state(&self) -> AdapterState {
        self.state
    }

    pub(crate) fn delegate(&self) -> Option<&Arc<dyn AdapterDelegate>> {
        self.delegate.as_ref()
    }

    pub(crate) fn set_delegate(&mut self, delegate: Arc<dyn AdapterDelegate>) {
        self.delegate = Some(delegate);
    }

    /// Runs `start_device` and enters `Running` if it succeeds.
    /// Only valid from `Idle`.
    pub(crate) fn start<F>(&mut self, start_device: F) -> Result<(), AdapterError>
    where
        F: FnOnce() -> Result<(), DeviceError>,
    {
        if !self.state.is_idle() {
            return Err(AdapterError::InvalidTransition {
                from: self.state,
                action: "start",
            });
        }
        if let Err(e) = start_device() {
            log::error!("{} {}: device start failed: {}", self.role, self.id, e);
            return Err(e.into());
        }
        self.transition(AdapterState::Running);
        Ok(())
    }

    /// Fails with `Stopped` once a stop has begun.
    pub(crate) fn ensure_accepting(&self) -> Result<(), AdapterError> {
        if self.state.accepts_work() {
            Ok(())
        } else {
            Err(AdapterError::Stopped)
        }
    }

    /// Enters `Stopping` unless already there. Returns `false` when the
    /// adapter has already stopped and there is nothing left to quit.
    pub(crate) fn begin_quit(&mut self) -> bool {
        match self.state {
            AdapterState::Stopped => false,
            AdapterState::Stopping => true,
            AdapterState::Idle | AdapterState::Running => {
                self.transition(AdapterState::Stopping);
                true
            }
        }
    }

    pub(crate) fn finish(&mut self) {
        if !self.state.is_terminal() {
            self.transition(AdapterState::Stopped);
        }
    }

    fn transition(&mut self, next: AdapterState) {
        log::debug!("{} {}: {} -> {}", self.role, self.id, self.state, next);
        self.state = next;
        if let Some(ref delegate) = self.delegate {
            delegate.on_state_changed(self.role, next);
        }
    }
}

/// The device-side half of a graceful quit: one `DeviceHandle::quit`
/// call kept alive across polls.
#[derive(Default)]
pub(crate) struct DeviceQuit {
    pending: Option<BoxFuture<'static, Result<(), DeviceError>>>,
}

impl DeviceQuit {
    pub(crate) fn poll(
        &mut self,
        handle: &Arc<dyn DeviceHandle>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), DeviceError>> {
        let quit = self.pending.get_or_insert_with(|| {
            let handle = Arc::clone(handle);
            async move { handle.quit().await }.boxed()
        });
        let result = ready!(quit.as_mut().poll(cx));
        self.pending = None;
        Poll::Ready(result)
    }

    pub(crate) fn cancel(&mut self) {
        self.pending = None;
    }
}

/// Completes a graceful stop once `drained` reports the adapter's own
/// queue is empty: drives the device quit, then enters `Stopped`.
///
/// If the adapter was aborted while draining, the handle is left alone
/// and the stop resolves `Aborted`.
pub(crate) fn poll_graceful_stop(
    lifecycle: &mut Lifecycle,
    device_quit: &mut DeviceQuit,
    handle: &Arc<dyn DeviceHandle>,
    drained: Poll<()>,
    cx: &mut Context<'_>,
) -> Poll<Result<(), AdapterError>> {
    ready!(drained);
    if lifecycle.state().is_terminal() {
        device_quit.cancel();
        return Poll::Ready(Err(AdapterError::Aborted));
    }
    let result = ready!(device_quit.poll(handle, cx));
    lifecycle.finish();
    match result {
        Ok(()) => Poll::Ready(Ok(())),
        Err(e) => {
            log::error!("{} {}: device quit failed: {}", lifecycle.role, lifecycle.id, e);
            Poll::Ready(Err(e.into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingDelegate {
        states: Mutex<Vec<AdapterState>>,
    }

    impl AdapterDelegate for RecordingDelegate {
        fn on_state_changed(&self, _role: AdapterRole, state: AdapterState) {
            self.states.lock().push(state);
        }

        fn on_read_dropped(&self, _error: &DeviceError) {}

        fn on_write_failed(&self, _error: &DeviceError) {}
    }

    #[test]
    fn start_only_from_idle() {
        let mut lifecycle = Lifecycle::new(AdapterRole::Capture);
        lifecycle.start(|| Ok(())).unwrap();
        assert_eq!(lifecycle.state(), AdapterState::Running);

        let err = lifecycle.start(|| Ok(())).unwrap_err();
        assert_eq!(
            err,
            AdapterError::InvalidTransition {
                from: AdapterState::Running,
                action: "start",
            }
        );
    }

    #[test]
    fn failed_device_start_stays_idle() {
        let mut lifecycle = Lifecycle::new(AdapterRole::Playback);
        let err = lifecycle
            .start(|| Err(DeviceError::StartFailed("busy".into())))
            .unwrap_err();

        assert_eq!(err, AdapterError::Device(DeviceError::StartFailed("busy".into())));
        assert!(lifecycle.state().is_idle());
    }

    #[test]
    fn quit_then_finish_reports_every_transition() {
        let delegate = Arc::new(RecordingDelegate {
            states: Mutex::new(Vec::new()),
        });
        let mut lifecycle = Lifecycle::new(AdapterRole::Playback);
        lifecycle.set_delegate(delegate.clone());

        lifecycle.start(|| Ok(())).unwrap();
        assert!(lifecycle.begin_quit());
        assert!(lifecycle.begin_quit());
        assert_eq!(lifecycle.ensure_accepting(), Err(AdapterError::Stopped));
        lifecycle.finish();
        lifecycle.finish();
        assert!(!lifecycle.begin_quit());

        assert_eq!(
            *delegate.states.lock(),
            vec![AdapterState::Running, AdapterState::Stopping, AdapterState::Stopped]
        );
    }

    #[test]
    fn stopped_cannot_restart() {
        let mut lifecycle = Lifecycle::new(AdapterRole::Capture);
        lifecycle.finish();
        assert!(lifecycle.start(|| Ok(())).is_err());
    }
}
