//! Compression and encryption codecs.
//!
//! Every codec, in both directions, presents the same push/pull contract:
//! [`Codec::prepare`] installs an input window, repeated [`Codec::step`]
//! calls drain it into the caller's buffer, and [`Codec::close`] releases
//! state. Frame headers and trailers are each codec's own business, so the
//! streamer can chain any of them without caring which is which.

mod aes256;
mod bzip2_codec;
mod extension;
mod gzip;
mod lz4;
mod traits;
mod zstd_codec;

pub use aes256::{MasterKey, IV_LEN, KEY_LEN};
pub use extension::{detect_layers, encoded_file_name, plain_file_name, FileLayer};
pub use traits::{Codec, CodecError, StepResult};

use vault_core::{CompressionKind, EncryptionKind};

/// Build a compressor for the given kind.
///
/// `level` below zero selects each codec's own default.
pub fn compressor(kind: CompressionKind, level: i32) -> Option<Box<dyn Codec>> {
    match kind {
        CompressionKind::None => None,
        CompressionKind::Gzip => Some(Box::new(gzip::GzipCompressor::new(level))),
        CompressionKind::Zstd => Some(Box::new(zstd_codec::ZstdCompressor::new(level))),
        CompressionKind::Lz4 => Some(Box::new(lz4::Lz4Compressor::new())),
        CompressionKind::Bzip2 => Some(Box::new(bzip2_codec::Bzip2Compressor::new(level))),
    }
}

/// Build a decompressor for the given kind.
pub fn decompressor(kind: CompressionKind) -> Option<Box<dyn Codec>> {
    match kind {
        CompressionKind::None => None,
        CompressionKind::Gzip => Some(Box::new(gzip::GzipDecompressor::new())),
        CompressionKind::Zstd => Some(Box::new(zstd_codec::ZstdDecompressor::new())),
        CompressionKind::Lz4 => Some(Box::new(lz4::Lz4Decompressor::new())),
        CompressionKind::Bzip2 => Some(Box::new(bzip2_codec::Bzip2Decompressor::new())),
    }
}

/// Build an encryptor for the given kind.
///
/// File encryption is single-pass AES-256-CTR; the CBC selector only exists
/// as a wire bit and is rejected here.
pub fn encryptor(
    kind: EncryptionKind,
    key: Option<&MasterKey>,
) -> Result<Option<Box<dyn Codec>>, CodecError> {
    match kind {
        EncryptionKind::None => Ok(None),
        EncryptionKind::Aes256Ctr => {
            let key = key.ok_or(CodecError::KeyMissing)?;
            Ok(Some(Box::new(aes256::Aes256CtrEncryptor::new(key))))
        }
        EncryptionKind::Aes256Cbc => Err(CodecError::Init(
            "aes-256-cbc is a wire selector; files use aes-256-ctr".to_string(),
        )),
    }
}

/// Build a decryptor for the given kind.
pub fn decryptor(
    kind: EncryptionKind,
    key: Option<&MasterKey>,
) -> Result<Option<Box<dyn Codec>>, CodecError> {
    match kind {
        EncryptionKind::None => Ok(None),
        EncryptionKind::Aes256Ctr => {
            let key = key.ok_or(CodecError::KeyMissing)?;
            Ok(Some(Box::new(aes256::Aes256CtrDecryptor::new(key))))
        }
        EncryptionKind::Aes256Cbc => Err(CodecError::Init(
            "aes-256-cbc is a wire selector; files use aes-256-ctr".to_string(),
        )),
    }
}

/// Run a whole buffer through a codec in one shot. Test and extraction
/// convenience; the streamer drives the chunked path.
pub fn run_to_vec(codec: &mut dyn Codec, input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    let mut scratch = vec![0u8; 64 * 1024];
    codec.prepare(input, true)?;
    loop {
        let step = codec.step(&mut scratch)?;
        out.extend_from_slice(&scratch[..step.written]);
        if step.finished {
            break;
        }
    }
    codec.close()?;
    Ok(out)
}
