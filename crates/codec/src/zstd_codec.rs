//! Zstandard codec over `zstd` write adapters.

use crate::traits::{Codec, CodecError, DrainBuf, StepResult};
use std::io::Write;
use zstd::stream::write::{Decoder, Encoder};

pub struct ZstdCompressor {
    encoder: Option<Encoder<'static, Vec<u8>>>,
    level: i32,
    drain: DrainBuf,
    last_seen: bool,
}

impl ZstdCompressor {
    pub fn new(level: i32) -> Self {
        let level = if (1..=22).contains(&level) {
            level
        } else {
            zstd::DEFAULT_COMPRESSION_LEVEL
        };
        ZstdCompressor {
            encoder: None,
            level,
            drain: DrainBuf::default(),
            last_seen: false,
        }
    }

    fn encoder(&mut self) -> Result<&mut Encoder<'static, Vec<u8>>, CodecError> {
        if self.last_seen {
            return Err(CodecError::Input("stream already finished".to_string()));
        }
        if self.encoder.is_none() {
            let encoder = Encoder::new(Vec::new(), self.level)
                .map_err(|e| CodecError::Init(e.to_string()))?;
            self.encoder = Some(encoder);
        }
        Ok(self.encoder.as_mut().expect("just installed"))
    }
}

impl Codec for ZstdCompressor {
    fn prepare(&mut self, input: &[u8], last_chunk: bool) -> Result<(), CodecError> {
        let encoder = self.encoder()?;
        encoder
            .write_all(input)
            .map_err(|e| CodecError::Input(e.to_string()))?;
        if last_chunk {
            let encoder = self.encoder.take().expect("installed by encoder()");
            let bytes = encoder
                .finish()
                .map_err(|e| CodecError::Output(e.to_string()))?;
            self.drain.push(&bytes);
            self.last_seen = true;
        } else {
            let encoder = self.encoder.as_mut().expect("installed by encoder()");
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

pub struct ZstdDecompressor {
    decoder: Option<Decoder<'static, Vec<u8>>>,
    drain: DrainBuf,
    last_seen: bool,
}

impl ZstdDecompressor {
    pub fn new() -> Self {
        ZstdDecompressor {
            decoder: None,
            drain: DrainBuf::default(),
            last_seen: false,
        }
    }
}

impl Codec for ZstdDecompressor {
    fn prepare(&mut self, input: &[u8], last_chunk: bool) -> Result<(), CodecError> {
        if self.last_seen {
            return Err(CodecError::Input("stream already finished".to_string()));
        }
        if self.decoder.is_none() {
            let decoder =
                Decoder::new(Vec::new()).map_err(|e| CodecError::Init(e.to_string()))?;
            self.decoder = Some(decoder);
        }
        let decoder = self.decoder.as_mut().expect("just installed");
        decoder
            .write_all(input)
            .map_err(|e| CodecError::Corrupt(e.to_string()))?;
        if last_chunk {
            decoder
                .flush()
                .map_err(|e| CodecError::Corrupt(e.to_string()))?;
            let decoder = self.decoder.take().expect("checked above");
            self.drain.push(&decoder.into_inner());
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
