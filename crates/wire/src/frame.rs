//! Message framing: a u32 big-endian length prefix followed by that many
//! bytes of UTF-8 JSON.

use std::io::{Read, Write};
use thiserror::Error;

/// Upper bound on one frame; a listing of thousands of backups stays far
/// below this.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Length prefix exceeds the bound
    #[error("Frame of {0} bytes exceeds limit")]
    TooLarge(u32),

    /// Payload is not valid JSON
    #[error("Bad frame payload: {0}")]
    BadPayload(#[from] serde_json::Error),
}

/// Write one JSON value as a frame.
pub fn write_frame<W: Write, T: serde::Serialize>(
    writer: &mut W,
    value: &T,
) -> Result<(), FrameError> {
    let payload = serde_json::to_vec(value)?;
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame and parse it.
pub fn read_frame<R: Read, T: serde::de::DeserializeOwned>(
    reader: &mut R,
) -> Result<T, FrameError> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix)?;
    let len = u32::from_be_bytes(prefix);
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(serde_json::from_slice(&payload)?)
}
