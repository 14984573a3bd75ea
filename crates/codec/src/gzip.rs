//! gzip codec over `flate2` write adapters.

use crate::traits::{Codec, CodecError, DrainBuf, StepResult};
use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression;
use std::io::Write;

const DEFAULT_LEVEL: u32 = 6;

pub struct GzipCompressor {
    encoder: Option<GzEncoder<Vec<u8>>>,
    drain: DrainBuf,
    last_seen: bool,
}

impl GzipCompressor {
    pub fn new(level: i32) -> Self {
        let level = if (1..=9).contains(&level) {
            level as u32
        } else {
            DEFAULT_LEVEL
        };
        GzipCompressor {
            encoder: Some(GzEncoder::new(Vec::new(), Compression::new(level))),
            drain: DrainBuf::default(),
            last_seen: false,
        }
    }
}

impl Codec for GzipCompressor {
    fn prepare(&mut self, input: &[u8], last_chunk: bool) -> Result<(), CodecError> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| CodecError::Input("stream already finished".to_string()))?;
        encoder
            .write_all(input)
            .map_err(|e| CodecError::Input(e.to_string()))?;
        if last_chunk {
            let encoder = self.encoder.take().expect("checked above");
            let bytes = encoder
                .finish()
                .map_err(|e| CodecError::Output(e.to_string()))?;
            self.drain.push(&bytes);
            self.last_seen = true;
        } else {
            self.drain.push(&std::mem::take(encoder.get_mut()));
        }
        Ok(())
    }

    fn step(&mut self, out: &mut [u8]) -> Result<StepResult, CodecError> {
        let written = self.drain.drain_into(out);
        Ok(StepResult {
            written,
            finished: self.last_seen && self.drain.is_empty(),
        })
    }

    fn close(&mut self) -> Result<(), CodecError> {
        self.encoder = None;
        Ok(())
    }
}

pub struct GzipDecompressor {
    decoder: Option<GzDecoder<Vec<u8>>>,
    drain: DrainBuf,
    last_seen: bool,
}

impl GzipDecompressor {
    pub fn new() -> Self {
        GzipDecompressor {
            decoder: Some(GzDecoder::new(Vec::new())),
            drain: DrainBuf::default(),
            last_seen: false,
        }
    }
}

impl Codec for GzipDecompressor {
    fn prepare(&mut self, input: &[u8], last_chunk: bool) -> Result<(), CodecError> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| CodecError::Input("stream already finished".to_string()))?;
        decoder
            .write_all(input)
            .map_err(|e| CodecError::Corrupt(e.to_string()))?;
        if last_chunk {
            let decoder = self.decoder.take().expect("checked above");
            let bytes = decoder
                .finish()
                .map_err(|e| CodecError::Corrupt(e.to_string()))?;
            self.drain.push(&bytes);
            self.last_seen = true;
        } else {
            self.drain.push(&std::mem::take(decoder.get_mut()));
        }
        Ok(())
    }

    fn step(&mut self, out: &mut [u8]) -> Result<StepResult, CodecError> {
        let written = self.drain.drain_into(out);
        Ok(StepResult {
            written,
            finished: self.last_seen && self.drain.is_empty(),
        })
    }

    fn close(&mut self) -> Result<(), CodecError> {
        self.decoder = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_to_vec;

    #[test]
    fn test_gzip_frame_is_recognisable() {
        let mut c = GzipCompressor::new(-1);
        let out = run_to_vec(&mut c, b"hello").unwrap();
        // gzip magic
        assert_eq!(&out[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_corrupt_stream_reported() {
        let mut d = GzipDecompressor::new();
        let err = run_to_vec(&mut d, b"definitely not gzip").unwrap_err();
        assert!(matches!(err, CodecError::Corrupt(_)));
    }

    #[test]
    fn test_prepare_after_finish_rejected() {
        let mut c = GzipCompressor::new(-1);
        c.prepare(b"x", true).unwrap();
        assert!(matches!(c.prepare(b"y", true), Err(CodecError::Input(_))));
    }
}
