//! Chunk data appended to a payload when chunk mode is active.
//!
//! Each chunk is laid out as `id: u16 BE`, `reserved: u16`, `length: u32 BE`
//! followed by `length` bytes of big-endian value.

use crate::error::{Error, Result};

const HEADER_LEN: usize = 8;

/// Chunk identifiers emitted by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Device timestamp in nanoseconds.
    Timestamp,
    /// Exposure time in microseconds.
    ExposureTime,
    Other(u16),
}

impl ChunkKind {
    pub fn id(&self) -> u16 {
        match self {
            ChunkKind::Timestamp => 0x0001,
            ChunkKind::ExposureTime => 0x0002,
            ChunkKind::Other(id) => *id,
        }
    }

    fn from_id(id: u16) -> Self {
        match id {
            0x0001 => ChunkKind::Timestamp,
            0x0002 => ChunkKind::ExposureTime,
            other => ChunkKind::Other(other),
        }
    }
}

/// Decoded chunk value.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkValue {
    Timestamp(u64),
    ExposureTime(f64),
    Raw(Vec<u8>),
}

/// Encoded size of the trailer written in chunk mode (timestamp + exposure).
pub const CHUNK_TRAILER_LEN: usize = 2 * (HEADER_LEN + 8);

/// Writes the timestamp and exposure chunks into `dst`.
///
/// `dst` must be exactly [`CHUNK_TRAILER_LEN`] bytes.
pub(crate) fn encode_trailer(dst: &mut [u8], timestamp_ns: u64, exposure_us: f64) {
    debug_assert_eq!(dst.len(), CHUNK_TRAILER_LEN);
    let (first, second) = dst.split_at_mut(HEADER_LEN + 8);
    write_chunk(first, ChunkKind::Timestamp, &timestamp_ns.to_be_bytes());
    write_chunk(second, ChunkKind::ExposureTime, &exposure_us.to_be_bytes());
}

fn write_chunk(dst: &mut [u8], kind: ChunkKind, value: &[u8]) {
    dst[0..2].copy_from_slice(&kind.id().to_be_bytes());
    dst[2..4].copy_from_slice(&0u16.to_be_bytes());
    dst[4..8].copy_from_slice(&(value.len() as u32).to_be_bytes());
    dst[HEADER_LEN..HEADER_LEN + value.len()].copy_from_slice(value);
}

/// Parses a sequence of chunks.
pub fn parse_chunks(bytes: &[u8]) -> Result<Vec<(ChunkKind, ChunkValue)>> {
    let mut chunks = Vec::new();
    let mut rest = bytes;

    while !rest.is_empty() {
        if rest.len() < HEADER_LEN {
            return Err(malformed(format!("{} trailing bytes", rest.len())));
        }
        let kind = ChunkKind::from_id(u16::from_be_bytes([rest[0], rest[1]]));
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let body = rest
            .get(HEADER_LEN..HEADER_LEN + len)
            .ok_or_else(|| malformed(format!("chunk {:#06x} truncated", kind.id())))?;

        let value = match (kind, <[u8; 8]>::try_from(body)) {
            (ChunkKind::Timestamp, Ok(raw)) => ChunkValue::Timestamp(u64::from_be_bytes(raw)),
            (ChunkKind::ExposureTime, Ok(raw)) => ChunkValue::ExposureTime(f64::from_be_bytes(raw)),
            _ => ChunkValue::Raw(body.to_vec()),
        };
        chunks.push((kind, value));
        rest = &rest[HEADER_LEN + len..];
    }

    Ok(chunks)
}

fn malformed(reason: String) -> Error {
    Error::rejected("ChunkData", reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailer_decodes() {
        let mut trailer = [0u8; CHUNK_TRAILER_LEN];
        encode_trailer(&mut trailer, 0x0102_0304_0506_0708, 1234.5);

        let chunks = parse_chunks(&trailer).unwrap();
        assert_eq!(
            chunks,
            vec![
                (ChunkKind::Timestamp, ChunkValue::Timestamp(0x0102_0304_0506_0708)),
                (ChunkKind::ExposureTime, ChunkValue::ExposureTime(1234.5)),
            ]
        );
    }

    #[test]
    fn test_unknown_chunk_kept_raw() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&0x00ffu16.to_be_bytes());
        raw.extend_from_slice(&0u16.to_be_bytes());
        raw.extend_from_slice(&3u32.to_be_bytes());
        raw.extend_from_slice(&[1, 2, 3]);

        let chunks = parse_chunks(&raw).unwrap();
        assert_eq!(chunks[0], (ChunkKind::Other(0xff), ChunkValue::Raw(vec![1, 2, 3])));
    }

    #[test]
    fn test_truncated_chunk_rejected() {
        let mut trailer = [0u8; CHUNK_TRAILER_LEN];
        encode_trailer(&mut trailer, 1, 2.0);
        assert!(parse_chunks(&trailer[..CHUNK_TRAILER_LEN - 1]).is_err());
    }
}
