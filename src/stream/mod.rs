//! Stream channels delivering captured frames.
//!
//! A stream owns a fixed set of buffers sized to the payload size at
//! creation. Buffers cycle between the empty pool, the device, the filled
//! queue and the consumer:
//!
//! ```text
//! empty pool ──acquire──► device ──submit──► filled queue ──pop──► Frame
//!     ▲                                                             │
//!     └─────────────────────────── drop / push ─────────────────────┘
//! ```

mod channel;
mod chunk;
mod frame;

pub use channel::{Buffer, StreamSink, StreamStatistics};
pub use chunk::{parse_chunks, ChunkKind, ChunkValue, CHUNK_TRAILER_LEN};
pub use frame::{Frame, FrameInfo, FrameStatus};

pub(crate) use channel::ChannelShared;
pub(crate) use chunk::encode_trailer;

use crate::error::{Error, Result};
use channel::Popped;
use std::sync::Arc;
use std::time::Duration;

/// Creates a detached stream channel: the sink fills buffers, the stream
/// hands them out.
///
/// [`Camera::create_stream`](crate::Camera::create_stream) builds the same
/// pair and gives the sink to the device. Custom [`Transport`]s and tests can
/// drive a pair directly.
///
/// [`Transport`]: crate::transport::Transport
pub fn channel(channel: u32, buffer_count: usize, buffer_size: usize) -> (StreamSink, Stream) {
    let shared = ChannelShared::new(channel, buffer_count, buffer_size);
    (StreamSink::new(Arc::clone(&shared)), Stream::new(shared))
}

/// Consumer side of a stream channel.
///
/// `pop` takes `&self`, so several threads may drain one stream; each
/// filled buffer goes to exactly one of them.
pub struct Stream {
    shared: Arc<ChannelShared>,
}

impl Stream {
    pub(crate) fn new(shared: Arc<ChannelShared>) -> Self {
        Self { shared }
    }

    /// Returns the oldest filled frame, waiting up to `timeout`.
    ///
    /// A zero timeout never blocks. Fails with [`Error::Closed`] once the
    /// stream is closed, or once acquisition stopped and the queue is empty.
    pub fn pop(&self, timeout: Duration) -> Result<Frame> {
        match self.shared.pop(timeout) {
            Popped::Frame(filled) => Ok(Frame::new(
                Arc::clone(&self.shared),
                filled.buffer,
                filled.info,
            )),
            Popped::Closed => Err(Error::Closed),
            Popped::TimedOut => Err(Error::Timeout(timeout)),
        }
    }

    /// Returns a frame's buffer to the empty pool.
    ///
    /// Equivalent to dropping the frame.
    ///
    /// # Panics
    ///
    /// Panics if the frame was popped from a different stream.
    pub fn push(&self, frame: Frame) {
        assert!(
            frame.belongs_to(&self.shared),
            "frame {} returned to a stream that does not own it",
            frame.frame_id()
        );
        drop(frame);
    }

    /// Device stream channel this stream receives from.
    pub fn channel(&self) -> u32 {
        self.shared.channel()
    }

    pub fn buffer_count(&self) -> usize {
        self.shared.buffer_count()
    }

    /// Size in bytes of each buffer.
    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size()
    }

    /// Frames filled and waiting for a consumer.
    pub fn queued_frames(&self) -> usize {
        self.shared.filled_len()
    }

    pub fn statistics(&self) -> StreamStatistics {
        self.shared.statistics()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Closes the stream, waking blocked consumers with [`Error::Closed`].
    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("channel", &self.shared.channel())
            .field("buffer_count", &self.shared.buffer_count())
            .field("buffer_size", &self.shared.buffer_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{PixelFormat, Region};
    use std::collections::HashSet;
    use std::thread;

    fn stream_with_sink(buffers: usize, size: usize) -> (Stream, StreamSink) {
        let (sink, stream) = channel(0, buffers, size);
        (stream, sink)
    }

    fn produce(sink: &StreamSink, frame_id: u64) -> bool {
        match sink.acquire() {
            Some(mut buffer) => {
                buffer.data_mut().fill(frame_id as u8);
                let size = buffer.len();
                let info = FrameInfo::new(
                    frame_id,
                    frame_id * 1000,
                    Region::full(size as u32, 1),
                    PixelFormat::Mono8,
                    size,
                    size,
                );
                sink.submit(buffer, info);
                true
            }
            None => false,
        }
    }

    #[test]
    fn test_pop_in_capture_order() {
        let (stream, sink) = stream_with_sink(4, 8);
        for id in 1..=4 {
            assert!(produce(&sink, id));
        }

        for id in 1..=4 {
            let frame = stream.pop(Duration::ZERO).unwrap();
            assert_eq!(frame.frame_id(), id);
            assert_eq!(frame.data(), &[id as u8; 8]);
        }
    }

    #[test]
    fn test_zero_timeout_does_not_block() {
        let (stream, _sink) = stream_with_sink(2, 8);
        let started = std::time::Instant::now();

        assert!(matches!(stream.pop(Duration::ZERO), Err(Error::Timeout(_))));
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(stream.statistics().timeouts, 1);
    }

    #[test]
    fn test_dropped_frame_returns_buffer() {
        let (stream, sink) = stream_with_sink(1, 8);
        assert!(produce(&sink, 1));
        assert!(!produce(&sink, 2));

        {
            let _frame = stream.pop(Duration::ZERO).unwrap();
        }
        assert!(produce(&sink, 3));
        assert_eq!(stream.pop(Duration::ZERO).unwrap().frame_id(), 3);
    }

    #[test]
    fn test_push_returns_buffer() {
        let (stream, sink) = stream_with_sink(1, 8);
        assert!(produce(&sink, 1));
        let frame = stream.pop(Duration::ZERO).unwrap();
        stream.push(frame);
        assert!(produce(&sink, 2));
    }

    #[test]
    #[should_panic(expected = "does not own it")]
    fn test_push_to_foreign_stream_panics() {
        let (first, sink) = stream_with_sink(1, 8);
        let (second, _other) = stream_with_sink(1, 8);
        assert!(produce(&sink, 1));

        let frame = first.pop(Duration::ZERO).unwrap();
        second.push(frame);
    }

    #[test]
    fn test_close_wakes_blocked_consumer() {
        let (stream, _sink) = stream_with_sink(2, 8);
        let stream = Arc::new(stream);

        let consumer = {
            let stream = Arc::clone(&stream);
            thread::spawn(move || stream.pop(Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(50));
        stream.close();

        let result = consumer.join().unwrap();
        assert!(matches!(result, Err(Error::Closed)));
    }

    #[test]
    fn test_concurrent_consumers_never_share_a_buffer() {
        let (stream, sink) = stream_with_sink(8, 4);
        let stream = Arc::new(stream);
        let total = 200u64;

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let stream = Arc::clone(&stream);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    loop {
                        match stream.pop(Duration::from_millis(200)) {
                            Ok(frame) => seen.push(frame.frame_id()),
                            Err(_) => return seen,
                        }
                    }
                })
            })
            .collect();

        let mut id = 1;
        while id <= total {
            if produce(&sink, id) {
                id += 1;
            } else {
                thread::yield_now();
            }
        }

        let mut all = HashSet::new();
        for consumer in consumers {
            let seen = consumer.join().unwrap();
            assert!(seen.windows(2).all(|w| w[0] < w[1]));
            for id in seen {
                assert!(all.insert(id), "frame {id} delivered twice");
            }
        }
        assert_eq!(all.len() as u64, total);
    }
}
