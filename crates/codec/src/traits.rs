//! The push/pull codec contract.

use thiserror::Error;

/// Outcome of one [`Codec::step`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepResult {
    /// Bytes written into the caller's buffer.
    pub written: usize,
    /// True only when the final chunk has been fully flushed. Until then the
    /// caller must keep stepping, or prepare the next window.
    pub finished: bool,
}

/// A streaming transform: compressor, decompressor, encryptor or decryptor.
///
/// Usage: `prepare` installs an input window; repeated `step` calls drain
/// that window into the caller's output buffer. `finished` becomes true only
/// when the current window is fully flushed *and* `last_chunk` was set on the
/// final `prepare`; otherwise the caller prepares the next window. The codec
/// never silently truncates: the caller receives all bytes or an error.
pub trait Codec: Send {
    /// Install the next input window.
    fn prepare(&mut self, input: &[u8], last_chunk: bool) -> Result<(), CodecError>;

    /// Drain transformed bytes into `out`.
    fn step(&mut self, out: &mut [u8]) -> Result<StepResult, CodecError>;

    /// Release internal state. Idempotent.
    fn close(&mut self) -> Result<(), CodecError>;
}

/// Codec failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The codec could not be constructed or configured
    #[error("Codec init error: {0}")]
    Init(String),

    /// The input window was rejected
    #[error("Codec input error: {0}")]
    Input(String),

    /// Writing transformed output failed
    #[error("Codec output error: {0}")]
    Output(String),

    /// The input is not a valid stream for this codec
    #[error("Corrupt stream: {0}")]
    Corrupt(String),

    /// Encryption was requested but no master key is configured
    #[error("Encryption key missing")]
    KeyMissing,
}

/// Internal drain buffer shared by the write-adapter codecs: transformed
/// bytes accumulate here and `step` hands them out in caller-sized pieces.
#[derive(Debug, Default)]
pub(crate) struct DrainBuf {
    buf: Vec<u8>,
    pos: usize,
}

impl DrainBuf {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        // compact before growing, the front has already been handed out
        if self.pos > 0 && self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let available = self.buf.len() - self.pos;
        let n = available.min(out.len());
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }
}
