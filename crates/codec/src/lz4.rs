//! LZ4 frame codec over `lz4_flex`.
//!
//! The frame reader in `lz4_flex` is pull-based, so both directions stage
//! the input window and run the frame transform when the last chunk lands.

use crate::traits::{Codec, CodecError, DrainBuf, StepResult};
use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use std::io::{Cursor, Read, Write};

pub struct Lz4Compressor {
    staged: Vec<u8>,
    drain: DrainBuf,
    last_seen: bool,
}

impl Lz4Compressor {
    pub fn new() -> Self {
        Lz4Compressor {
            staged: Vec::new(),
            drain: DrainBuf::default(),
            last_seen: false,
        }
    }
}

impl Codec for Lz4Compressor {
    fn prepare(&mut self, input: &[u8], last_chunk: bool) -> Result<(), CodecError> {
        if self.last_seen {
            return Err(CodecError::Input("stream already finished".to_string()));
        }
        self.staged.extend_from_slice(input);
        if last_chunk {
            let mut encoder = FrameEncoder::new(Vec::new());
            encoder
                .write_all(&self.staged)
                .map_err(|e| CodecError::Input(e.to_string()))?;
            let bytes = encoder
                .finish()
                .map_err(|e| CodecError::Output(e.to_string()))?;
            self.staged = Vec::new();
            self.drain.push(&bytes);
            self.last_seen = true;
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
        self.staged = Vec::new();
        Ok(())
    }
}

pub struct Lz4Decompressor {
    staged: Vec<u8>,
    drain: DrainBuf,
    last_seen: bool,
}

impl Lz4Decompressor {
    pub fn new() -> Self {
        Lz4Decompressor {
            staged: Vec::new(),
            drain: DrainBuf::default(),
            last_seen: false,
        }
    }
}

impl Codec for Lz4Decompressor {
    fn prepare(&mut self, input: &[u8], last_chunk: bool) -> Result<(), CodecError> {
        if self.last_seen {
            return Err(CodecError::Input("stream already finished".to_string()));
        }
        self.staged.extend_from_slice(input);
        if last_chunk {
            let mut decoder = FrameDecoder::new(Cursor::new(std::mem::take(&mut self.staged)));
            let mut bytes = Vec::new();
            decoder
                .read_to_end(&mut bytes)
                .map_err(|e| CodecError::Corrupt(e.to_string()))?;
            self.drain.push(&bytes);
            self.last_seen = true;
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
        self.staged = Vec::new();
        Ok(())
    }
}
