//! Frame type handed to stream consumers.

use super::channel::{Buffer, ChannelShared};
use super::chunk::{parse_chunks, ChunkKind, ChunkValue};
use crate::error::Result;
use crate::features::{PixelFormat, Region};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Completion status of a delivered buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Success,
    /// The payload did not fit the buffer; the stream was created before the
    /// region or pixel format last changed.
    SizeMismatch,
}

/// Metadata attached to a filled buffer.
#[derive(Debug, Clone)]
pub struct FrameInfo {
    /// Device frame counter, increasing in capture order.
    pub frame_id: u64,
    /// Device timestamp in nanoseconds since acquisition start.
    pub timestamp_ns: u64,
    /// Host wall-clock time at delivery.
    pub system_timestamp: DateTime<Utc>,
    pub region: Region,
    pub pixel_format: PixelFormat,
    pub status: FrameStatus,
    /// Bytes of valid payload, image plus any chunk trailer.
    pub received_size: usize,
    /// Bytes of image data at the start of the payload.
    pub image_size: usize,
}

impl FrameInfo {
    pub fn new(
        frame_id: u64,
        timestamp_ns: u64,
        region: Region,
        pixel_format: PixelFormat,
        image_size: usize,
        received_size: usize,
    ) -> Self {
        Self {
            frame_id,
            timestamp_ns,
            system_timestamp: Utc::now(),
            region,
            pixel_format,
            status: FrameStatus::Success,
            received_size,
            image_size,
        }
    }

    /// Marks the frame as not fitting its buffer.
    pub fn size_mismatch(mut self) -> Self {
        self.status = FrameStatus::SizeMismatch;
        self.received_size = 0;
        self.image_size = 0;
        self
    }
}

/// A filled buffer on loan from a [`Stream`](super::Stream).
///
/// Dropping the frame returns its buffer to the stream's empty pool, so a
/// buffer can never leak out of the cycle, whichever path the caller takes.
pub struct Frame {
    shared: Arc<ChannelShared>,
    buffer: Option<Buffer>,
    info: FrameInfo,
}

impl Frame {
    pub(crate) fn new(shared: Arc<ChannelShared>, buffer: Buffer, info: FrameInfo) -> Self {
        Self {
            shared,
            buffer: Some(buffer),
            info,
        }
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<ChannelShared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    #[inline]
    pub fn info(&self) -> &FrameInfo {
        &self.info
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.info.frame_id
    }

    #[inline]
    pub fn timestamp_ns(&self) -> u64 {
        self.info.timestamp_ns
    }

    #[inline]
    pub fn system_timestamp(&self) -> DateTime<Utc> {
        self.info.system_timestamp
    }

    #[inline]
    pub fn region(&self) -> Region {
        self.info.region
    }

    #[inline]
    pub fn pixel_format(&self) -> PixelFormat {
        self.info.pixel_format
    }

    #[inline]
    pub fn status(&self) -> FrameStatus {
        self.info.status
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.info.status == FrameStatus::Success
    }

    /// Number of valid payload bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.info.received_size
    }

    /// Valid payload bytes, image followed by any chunk trailer.
    pub fn data(&self) -> &[u8] {
        match &self.buffer {
            Some(buffer) => &buffer.data()[..self.info.received_size],
            None => &[],
        }
    }

    /// Image bytes without chunk data.
    pub fn image_data(&self) -> &[u8] {
        &self.data()[..self.info.image_size]
    }

    /// Decodes the chunk trailer; empty when chunk mode was off.
    pub fn chunks(&self) -> Result<Vec<(ChunkKind, ChunkValue)>> {
        parse_chunks(&self.data()[self.info.image_size..])
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.shared.recycle(buffer);
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("frame_id", &self.info.frame_id)
            .field("region", &self.info.region)
            .field("pixel_format", &self.info.pixel_format)
            .field("status", &self.info.status)
            .field("bytes", &self.info.received_size)
            .finish()
    }
}
