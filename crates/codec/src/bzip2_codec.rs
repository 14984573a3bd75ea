//! bzip2 codec over `bzip2` write adapters.

use crate::traits::{Codec, CodecError, DrainBuf, StepResult};
use bzip2::write::{BzDecoder, BzEncoder};
use bzip2::Compression;
use std::io::Write;

const DEFAULT_LEVEL: u32 = 6;

pub struct Bzip2Compressor {
    encoder: Option<BzEncoder<Vec<u8>>>,
    drain: DrainBuf,
    last_seen: bool,
}

impl Bzip2Compressor {
    pub fn new(level: i32) -> Self {
        let level = if (1..=9).contains(&level) {
            level as u32
        } else {
            DEFAULT_LEVEL
        };
        Bzip2Compressor {
            encoder: Some(BzEncoder::new(Vec::new(), Compression::new(level))),
            drain: DrainBuf::default(),
            last_seen: false,
        }
    }
}

impl Codec for Bzip2Compressor {
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

pub struct Bzip2Decompressor {
    decoder: Option<BzDecoder<Vec<u8>>>,
    drain: DrainBuf,
    last_seen: bool,
}

impl Bzip2Decompressor {
    pub fn new() -> Self {
        Bzip2Decompressor {
            decoder: Some(BzDecoder::new(Vec::new())),
            drain: DrainBuf::default(),
            last_seen: false,
        }
    }
}

impl Codec for Bzip2Decompressor {
    fn prepare(&mut self, input: &[u8], last_chunk: bool) -> Result<(), CodecError> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| CodecError::Input("stream already finished".to_string()))?;
        decoder
            .write_all(input)
            .map_err(|e| CodecError::Corrupt(e.to_string()))?;
        if last_chunk {
            let mut decoder = self.decoder.take().expect("checked above");
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
    fn test_bzip2_magic() {
        let mut c = Bzip2Compressor::new(-1);
        let out = run_to_vec(&mut c, b"payload").unwrap();
        assert_eq!(&out[..3], b"BZh");
    }

    #[test]
    fn test_corrupt_input() {
        let mut d = Bzip2Decompressor::new();
        assert!(run_to_vec(&mut d, b"garbage input here").is_err());
    }
}
