//! Frame encoding.
//!
//! Format: `[kind:1][length:4 LE][payload:length][crc32:4 LE]`, with the CRC
//! taken over kind, length and payload.

use crate::error::{ProtocolError, ProtocolResult};
use crc32fast::Hasher;
use std::io::{Read, Write};

/// Largest payload a frame may carry.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Bytes a frame adds around its payload.
pub const FRAME_OVERHEAD: usize = 1 + 4 + 4;

/// Writes one frame and flushes the writer.
///
/// # Errors
///
/// Returns an error if the payload is too large or the write fails.
pub fn write_frame<W: Write>(writer: &mut W, kind: u8, payload: &[u8]) -> ProtocolResult<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let mut buf = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    buf.push(kind);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);

    let mut hasher = Hasher::new();
    hasher.update(&buf);
    buf.extend_from_slice(&hasher.finalize().to_le_bytes());

    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame and returns its kind and payload.
///
/// # Errors
///
/// Returns an error on I/O failure, an oversized length or a CRC mismatch.
pub fn read_frame<R: Read>(reader: &mut R) -> ProtocolResult<(u8, Vec<u8>)> {
    let mut header = [0u8; 5];
    reader.read_exact(&mut header)?;

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&header[1..5]);
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let expected = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&header);
    hasher.update(&payload);
    let actual = hasher.finalize();
    if expected != actual {
        return Err(ProtocolError::ChecksumMismatch { expected, actual });
    }

    Ok((header[0], payload))
}
