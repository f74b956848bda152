//! Buffer cycle shared between the producing device and consuming streams.

use super::frame::{FrameInfo, FrameStatus};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Counters kept per stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatistics {
    /// Frames delivered with [`FrameStatus::Success`].
    pub completed: u64,
    /// Frames lost or delivered incomplete.
    pub failures: u64,
    /// Frames the device produced while no empty buffer was available.
    pub underruns: u64,
    /// `pop` calls that timed out.
    pub timeouts: u64,
}

/// Fixed-size memory region cycled through a stream.
#[derive(Debug)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

pub(crate) struct Filled {
    pub(crate) buffer: Buffer,
    pub(crate) info: FrameInfo,
}

struct Queues {
    empty: VecDeque<Buffer>,
    filled: VecDeque<Filled>,
    halted: bool,
    closed: bool,
    stats: StreamStatistics,
}

pub(crate) struct ChannelShared {
    channel: u32,
    buffer_size: usize,
    buffer_count: usize,
    queues: Mutex<Queues>,
    filled_ready: Condvar,
}

pub(crate) enum Popped {
    Frame(Filled),
    Closed,
    TimedOut,
}

impl ChannelShared {
    pub(crate) fn new(channel: u32, buffer_count: usize, buffer_size: usize) -> Arc<Self> {
        let empty = (0..buffer_count).map(|_| Buffer::new(buffer_size)).collect();
        Arc::new(Self {
            channel,
            buffer_size,
            buffer_count,
            queues: Mutex::new(Queues {
                empty,
                filled: VecDeque::with_capacity(buffer_count),
                halted: false,
                closed: false,
                stats: StreamStatistics::default(),
            }),
            filled_ready: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn channel(&self) -> u32 {
        self.channel
    }

    pub(crate) fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub(crate) fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    pub(crate) fn statistics(&self) -> StreamStatistics {
        self.lock().stats
    }

    pub(crate) fn filled_len(&self) -> usize {
        self.lock().filled.len()
    }

    /// Takes the oldest filled buffer, waiting up to `timeout`.
    ///
    /// Remaining filled buffers are still handed out after a halt; only a
    /// closed channel refuses them.
    pub(crate) fn pop(&self, timeout: std::time::Duration) -> Popped {
        let deadline = std::time::Instant::now().checked_add(timeout);
        let mut queues = self.lock();

        loop {
            if queues.closed {
                return Popped::Closed;
            }
            if let Some(filled) = queues.filled.pop_front() {
                return Popped::Frame(filled);
            }
            if queues.halted {
                return Popped::Closed;
            }

            let now = std::time::Instant::now();
            let remaining = match deadline {
                Some(deadline) if deadline > now => deadline - now,
                Some(_) => {
                    queues.stats.timeouts += 1;
                    return Popped::TimedOut;
                }
                // Overflowing deadline: wait without limit.
                None => std::time::Duration::from_secs(3600),
            };
            queues = self
                .filled_ready
                .wait_timeout(queues, remaining)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
    }

    /// Returns a drained buffer to the empty pool.
    pub(crate) fn recycle(&self, buffer: Buffer) {
        let mut queues = self.lock();
        if !queues.closed {
            queues.empty.push_back(buffer);
        }
    }

    pub(crate) fn set_halted(&self, halted: bool) {
        let mut queues = self.lock();
        queues.halted = halted;
        drop(queues);
        if halted {
            self.filled_ready.notify_all();
        }
    }

    /// Closes the channel, frees its buffers and wakes every waiter.
    pub(crate) fn close(&self) {
        let mut queues = self.lock();
        if queues.closed {
            return;
        }
        queues.closed = true;
        queues.empty.clear();
        queues.filled.clear();
        drop(queues);
        self.filled_ready.notify_all();
        tracing::debug!(channel = self.channel, "Stream channel closed");
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Producer side of a stream, handed to the [`Transport`](crate::transport::Transport).
#[derive(Clone)]
pub struct StreamSink {
    shared: Arc<ChannelShared>,
}

impl StreamSink {
    pub(crate) fn new(shared: Arc<ChannelShared>) -> Self {
        Self { shared }
    }

    /// Stream channel index on the device.
    pub fn channel(&self) -> u32 {
        self.shared.channel
    }

    /// Size of every buffer in this stream.
    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Takes an empty buffer to fill.
    ///
    /// Returns `None` and counts an underrun when every buffer is queued or
    /// held by a consumer.
    pub fn acquire(&self) -> Option<Buffer> {
        let mut queues = self.shared.lock();
        if queues.closed {
            return None;
        }
        let buffer = queues.empty.pop_front();
        if buffer.is_none() {
            queues.stats.underruns += 1;
            tracing::trace!(channel = self.shared.channel, "No empty buffer, frame dropped");
        }
        buffer
    }

    /// Queues a filled buffer for consumers, in capture order.
    ///
    /// A frame claiming more bytes than the buffer holds, or more image
    /// bytes than it received, is queued as [`FrameStatus::SizeMismatch`].
    pub fn submit(&self, buffer: Buffer, info: FrameInfo) {
        let info = if info.received_size > buffer.len() || info.image_size > info.received_size {
            tracing::warn!(
                frame_id = info.frame_id,
                received = info.received_size,
                image = info.image_size,
                buffer = buffer.len(),
                "Frame sizes do not fit its buffer"
            );
            info.size_mismatch()
        } else {
            info
        };
        let mut queues = self.shared.lock();
        if queues.closed {
            return;
        }
        match info.status {
            FrameStatus::Success => queues.stats.completed += 1,
            FrameStatus::SizeMismatch => queues.stats.failures += 1,
        }
        queues.filled.push_back(Filled { buffer, info });
        drop(queues);
        self.shared.filled_ready.notify_one();
    }

    /// Returns a buffer that was taken but not filled.
    pub fn discard(&self, buffer: Buffer) {
        self.shared.recycle(buffer);
    }

    /// Counts a frame the device lost in transit.
    pub fn record_failure(&self) {
        self.shared.lock().stats.failures += 1;
    }
}

impl std::fmt::Debug for StreamSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSink")
            .field("channel", &self.shared.channel)
            .field("buffer_size", &self.shared.buffer_size)
            .field("buffer_count", &self.shared.buffer_count)
            .finish()
    }
}
