use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{FusedStream, Stream};

use crate::adapter::capture::CaptureAdapter;
use crate::models::config::{AudioConfig, DEFAULT_PULL_SIZE};
use crate::models::error::AdapterError;
use crate::models::state::AdapterState;
use crate::traits::device_engine::DeviceEngine;

/// A live input device as a `Stream` of PCM chunks.
///
/// Keeps up to `high_water_mark` bytes requested ahead of the consumer
/// (outstanding reads plus delivered-but-unread buffers). The adapter is
/// started on the first poll if the caller has not started it.
///
/// A dropped read yields nothing; the consumer's continued polling is the
/// demand that issues the next read.
pub struct CaptureStream {
    adapter: CaptureAdapter,
    chunk_size: usize,
    high_water_mark: usize,
}

impl CaptureStream {
    pub fn open(engine: &dyn DeviceEngine, config: &AudioConfig) -> Result<Self, AdapterError> {
        let adapter = CaptureAdapter::open(engine, config)?;
        Ok(Self::new(adapter, config.high_water_mark))
    }

    pub fn new(adapter: CaptureAdapter, high_water_mark: usize) -> Self {
        let mut stream = Self {
            adapter,
            chunk_size: DEFAULT_PULL_SIZE,
            high_water_mark: high_water_mark.max(1),
        };
        stream.chunk_size = stream.frame_aligned(DEFAULT_PULL_SIZE);
        stream
    }

    /// Bytes requested per read, rounded down to whole frames.
    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = self.frame_aligned(bytes);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn state(&self) -> AdapterState {
        self.adapter.state()
    }

    pub fn adapter(&self) -> &CaptureAdapter {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut CaptureAdapter {
        &mut self.adapter
    }

    pub fn into_inner(self) -> CaptureAdapter {
        self.adapter
    }

    /// Stop now; nothing further reaches the consumer.
    pub fn abort(&mut self) {
        self.adapter.abort();
    }

    /// Stop after outstanding reads complete. Their data stays readable
    /// from the stream until it ends. If this future is dropped early,
    /// polling the stream completes the stop.
    pub async fn quit(&mut self) -> Result<(), AdapterError> {
        self.adapter.quit().await
    }

    fn frame_aligned(&self, bytes: usize) -> usize {
        let frame = self.adapter.params().bytes_per_frame().max(1);
        (bytes - bytes % frame).max(frame)
    }

    fn request_ahead(&mut self) {
        while self.adapter.outstanding_bytes() + self.adapter.buffered_bytes() < self.high_water_mark {
            if self.adapter.pull(Some(self.chunk_size)).is_err() {
                break;
            }
        }
    }
}

impl Stream for CaptureStream {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        let this = self.get_mut();

        if this.adapter.state().is_idle() {
            if let Err(e) = this.adapter.start() {
                log::error!("capture {}: ending stream, start failed: {}", this.adapter.id(), e);
                this.adapter.abort();
                return Poll::Ready(None);
            }
        }

        if this.adapter.state().is_stopping() {
            // A quit whose future was dropped; finish it from here.
            if let Poll::Ready(Err(e)) = this.adapter.poll_quit(cx) {
                log::warn!("capture {}: stop finished with error: {}", this.adapter.id(), e);
            }
            return this.adapter.poll_next_chunk(cx);
        }

        this.request_ahead();
        match this.adapter.poll_next_chunk(cx) {
            Poll::Ready(chunk) => Poll::Ready(chunk),
            Poll::Pending => {
                if !this.adapter.has_outstanding_reads() && this.adapter.state().accepts_work() {
                    cx.waker().wake_by_ref();
                }
                Poll::Pending
            }
        }
    }
}

impl FusedStream for CaptureStream {
    fn is_terminated(&self) -> bool {
        self.adapter.state().is_terminal() && !self.adapter.has_buffered()
    }
}
