use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::oneshot;
use parking_lot::Mutex;

use crate::models::config::StreamParams;
use crate::models::error::DeviceError;
use crate::traits::device_engine::DeviceHandle;

/// When simulated asynchronous operations complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionMode {
    /// Reads, writes and quits complete on first poll.
    #[default]
    Immediate,
    /// Each operation waits until `SimulatedDevice::release_next` is called.
    Manual,
}

/// One call observed by a simulated device, in call order.
///
/// Asynchronous operations are recorded when they begin executing (first
/// poll), not when their future is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOp {
    Start,
    Read(usize),
    Write(usize),
    Abort,
    Quit,
}

#[derive(Default)]
struct DeviceLog {
    ops: Vec<DeviceOp>,
    in_flight: usize,
    max_in_flight: usize,
    reads_started: usize,
    writes_started: usize,
    read_failures: HashSet<usize>,
    write_failures: HashSet<usize>,
    fail_start: bool,
    fail_quit: bool,
    gates: VecDeque<oneshot::Sender<()>>,
    written: Vec<Bytes>,
}

/// Decrements the in-flight count when an operation settles or is dropped.
struct InFlight<'a>(&'a SimulatedDevice);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.log.lock().in_flight -= 1;
    }
}

/// A device handle with scripted timing and failures.
///
/// Read `n` (0-based) yields `size` bytes all equal to `n as u8`, so the
/// order of delivered chunks is visible in their contents.
pub struct SimulatedDevice {
    params: StreamParams,
    mode: CompletionMode,
    log: Mutex<DeviceLog>,
}

impl SimulatedDevice {
    pub fn new(params: StreamParams, mode: CompletionMode) -> Self {
        Self {
            params,
            mode,
            log: Mutex::new(DeviceLog::default()),
        }
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    /// Make the `index`-th read (0-based) fail.
    pub fn fail_read(&self, index: usize) {
        self.log.lock().read_failures.insert(index);
    }

    /// Make the `index`-th write (0-based) fail.
    pub fn fail_write(&self, index: usize) {
        self.log.lock().write_failures.insert(index);
    }

    pub fn fail_start(&self) {
        self.log.lock().fail_start = true;
    }

    pub fn fail_quit(&self) {
        self.log.lock().fail_quit = true;
    }

    /// Complete the oldest waiting operation in `Manual` mode.
    ///
    /// Returns `false` if nothing was waiting or the waiting operation has
    /// since been abandoned.
    pub fn release_next(&self) -> bool {
        let gate = self.log.lock().gates.pop_front();
        match gate {
            Some(gate) => gate.send(()).is_ok(),
            None => false,
        }
    }

    /// Operations still waiting for `release_next`.
    pub fn waiting(&self) -> usize {
        self.log.lock().gates.iter().filter(|g| !g.is_canceled()).count()
    }

    pub fn ops(&self) -> Vec<DeviceOp> {
        self.log.lock().ops.clone()
    }

    /// Sizes of the reads that began, in order.
    pub fn reads(&self) -> Vec<usize> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                DeviceOp::Read(size) => Some(size),
                _ => None,
            })
            .collect()
    }

    /// Lengths of the writes that began, in order.
    pub fn writes(&self) -> Vec<usize> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                DeviceOp::Write(len) => Some(len),
                _ => None,
            })
            .collect()
    }

    /// Chunks the device accepted, in acceptance order.
    pub fn written(&self) -> Vec<Bytes> {
        self.log.lock().written.clone()
    }

    pub fn accepted_count(&self) -> usize {
        self.log.lock().written.len()
    }

    pub fn in_flight(&self) -> usize {
        self.log.lock().in_flight
    }

    /// Highest number of simultaneously outstanding operations seen.
    pub fn max_in_flight(&self) -> usize {
        self.log.lock().max_in_flight
    }

    fn begin(&self, op: DeviceOp) -> (usize, Option<oneshot::Receiver<()>>) {
        let mut log = self.log.lock();
        let index = match op {
            DeviceOp::Read(_) => {
                log.reads_started += 1;
                log.reads_started - 1
            }
            DeviceOp::Write(_) => {
                log.writes_started += 1;
                log.writes_started - 1
            }
            _ => 0,
        };
        log.ops.push(op);
        log.in_flight += 1;
        log.max_in_flight = log.max_in_flight.max(log.in_flight);

        let gate = match self.mode {
            CompletionMode::Immediate => None,
            CompletionMode::Manual => {
                let (tx, rx) = oneshot::channel();
                log.gates.push_back(tx);
                Some(rx)
            }
        };
        (index, gate)
    }
}

async fn wait(gate: Option<oneshot::Receiver<()>>) {
    if let Some(gate) = gate {
        // A dropped sender (device aborted) releases the operation too.
        let _ = gate.await;
    }
}

#[async_trait]
impl DeviceHandle for SimulatedDevice {
    async fn read(&self, size: usize) -> Result<Bytes, DeviceError> {
        let (index, gate) = self.begin(DeviceOp::Read(size));
        let _in_flight = InFlight(self);
        wait(gate).await;

        if self.log.lock().read_failures.contains(&index) {
            return Err(DeviceError::ReadFailed(format!("simulated failure on read {}", index)));
        }
        Ok(Bytes::from(vec![index as u8; size]))
    }

    async fn write(&self, chunk: Bytes) -> Result<(), DeviceError> {
        let (index, gate) = self.begin(DeviceOp::Write(chunk.len()));
        let _in_flight = InFlight(self);
        wait(gate).await;

        let mut log = self.log.lock();
        if log.write_failures.contains(&index) {
            return Err(DeviceError::WriteFailed(format!("simulated failure on write {}", index)));
        }
        log.written.push(chunk);
        Ok(())
    }

    fn start(&self) -> Result<(), DeviceError> {
        let mut log = self.log.lock();
        log.ops.push(DeviceOp::Start);
        if log.fail_start {
            return Err(DeviceError::StartFailed("simulated start failure".into()));
        }
        Ok(())
    }

    fn abort(&self) {
        let mut log = self.log.lock();
        log.ops.push(DeviceOp::Abort);
        log.gates.clear();
    }

    async fn quit(&self) -> Result<(), DeviceError> {
        let (_, gate) = self.begin(DeviceOp::Quit);
        let _in_flight = InFlight(self);
        wait(gate).await;

        if self.log.lock().fail_quit {
            return Err(DeviceError::QuitFailed("simulated quit failure".into()));
        }
        Ok(())
    }
}
