//! Chained transform fan-out.
//!
//! A [`Streamer`] owns an optional compressor, an optional encryptor, and an
//! ordered list of destination virtual files. In backup mode a write is
//! compressed, then encrypted, then fanned out; in restore mode it is
//! decrypted, then decompressed. Fan-out order is deterministic. A failing
//! destination aborts the whole call and already-written destinations are
//! not rolled back; the caller deletes partial outputs on error.

use crate::error::StorageError;
use crate::vfile::VirtualFile;
use vault_codec::{
    compressor, decompressor, decryptor, encoded_file_name, encryptor, plain_file_name, Codec,
    MasterKey,
};
use vault_core::{CompressionKind, EncryptionKind};

/// Size of the internal transform buffer.
pub const BUFFER_SIZE: usize = 1024 * 1024;

/// Direction of the transform chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamerMode {
    /// Compress then encrypt
    Backup,
    /// Decrypt then decompress
    Restore,
}

/// Chained transform fan-out writer.
pub struct Streamer {
    mode: StreamerMode,
    compression: CompressionKind,
    encryption: EncryptionKind,
    first: Option<Box<dyn Codec>>,
    second: Option<Box<dyn Codec>>,
    destinations: Vec<Box<dyn VirtualFile>>,
    buffer: Vec<u8>,
    written: u64,
}

impl Streamer {
    /// Build the transform chain for the given mode.
    pub fn new(
        mode: StreamerMode,
        compression: CompressionKind,
        encryption: EncryptionKind,
        level: i32,
        key: Option<&MasterKey>,
    ) -> Result<Self, StorageError> {
        let (first, second) = match mode {
            StreamerMode::Backup => (
                compressor(compression, level),
                encryptor(encryption, key)?,
            ),
            StreamerMode::Restore => (
                decryptor(encryption, key)?,
                decompressor(compression),
            ),
        };
        Ok(Streamer {
            mode,
            compression,
            encryption,
            first,
            second,
            destinations: Vec::new(),
            buffer: vec![0u8; BUFFER_SIZE],
            written: 0,
        })
    }

    /// Append a destination; writes fan out in insertion order.
    pub fn add_destination(&mut self, file: Box<dyn VirtualFile>) {
        self.destinations.push(file);
    }

    /// Drop all destinations without closing them.
    pub fn reset(&mut self) {
        self.destinations.clear();
        self.written = 0;
    }

    /// Total bytes handed to destinations so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Destination file name for a source name: backup mode appends codec
    /// suffixes, restore mode strips them.
    pub fn dest_file_name(&self, file_name: &str) -> String {
        match self.mode {
            StreamerMode::Backup => {
                encoded_file_name(file_name, self.compression, self.encryption)
            }
            StreamerMode::Restore => plain_file_name(file_name),
        }
    }

    /// Push one input window through the chain into every destination.
    pub fn write(&mut self, buf: &[u8], last_chunk: bool) -> Result<(), StorageError> {
        let after_first = match self.first.as_deref_mut() {
            Some(codec) => apply(codec, buf, last_chunk, &mut self.buffer)?,
            None => buf.to_vec(),
        };
        let after_second = match self.second.as_deref_mut() {
            Some(codec) => apply(codec, &after_first, last_chunk, &mut self.buffer)?,
            None => after_first,
        };

        for destination in self.destinations.iter_mut() {
            destination
                .write(&after_second, last_chunk)
                .map_err(|e| StorageError::Destination {
                    destination: destination.name(),
                    reason: e.to_string(),
                })?;
        }
        self.written += (after_second.len() * self.destinations.len()) as u64;
        Ok(())
    }

    /// Close every destination.
    pub fn finish(&mut self) -> Result<(), StorageError> {
        for destination in self.destinations.iter_mut() {
            destination.close()?;
        }
        Ok(())
    }

    /// Take back the destinations, e.g. to delete partial outputs on error.
    pub fn take_destinations(&mut self) -> Vec<Box<dyn VirtualFile>> {
        std::mem::take(&mut self.destinations)
    }
}

/// Run one window through a codec, collecting everything it emits.
fn apply(
    codec: &mut dyn Codec,
    input: &[u8],
    last_chunk: bool,
    scratch: &mut [u8],
) -> Result<Vec<u8>, StorageError> {
    let mut out = Vec::new();
    codec.prepare(input, last_chunk)?;
    loop {
        let step = codec.step(scratch)?;
        out.extend_from_slice(&scratch[..step.written]);
        if step.finished || step.written == 0 {
            break;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfile::MemoryFile;
    use vault_codec::run_to_vec;

    #[test]
    fn test_identity_fan_out_order_preserved() {
        let mut streamer = Streamer::new(
            StreamerMode::Backup,
            CompressionKind::None,
            EncryptionKind::None,
            -1,
            None,
        )
        .unwrap();
        let a = MemoryFile::new("a");
        let b = MemoryFile::new("b");
        let a_buf = a.share();
        let b_buf = b.share();
        streamer.add_destination(Box::new(a));
        streamer.add_destination(Box::new(b));

        streamer.write(b"chunk one ", false).unwrap();
        streamer.write(b"chunk two", true).unwrap();

        assert_eq!(&*a_buf.lock().unwrap(), b"chunk one chunk two");
        assert_eq!(&*b_buf.lock().unwrap(), b"chunk one chunk two");
        assert_eq!(streamer.written(), 2 * b"chunk one chunk two".len() as u64);
    }

    #[test]
    fn test_backup_restore_identity_gzip_aes() {
        let key = MasterKey::derive(b"stream-test");
        let payload: Vec<u8> = (0..150_000u32).map(|i| (i % 13) as u8).collect();

        let mut backup = Streamer::new(
            StreamerMode::Backup,
            CompressionKind::Gzip,
            EncryptionKind::Aes256Ctr,
            -1,
            Some(&key),
        )
        .unwrap();
        let sink = MemoryFile::new("out");
        let encoded = sink.share();
        backup.add_destination(Box::new(sink));
        let chunks: Vec<&[u8]> = payload.chunks(65_536).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            backup.write(chunk, i == chunks.len() - 1).unwrap();
        }
        let encoded = encoded.lock().unwrap().clone();
        assert_ne!(encoded, payload);

        // aes-decrypt then gzip-decompress must give back the input
        let mut restore = Streamer::new(
            StreamerMode::Restore,
            CompressionKind::Gzip,
            EncryptionKind::Aes256Ctr,
            -1,
            Some(&key),
        )
        .unwrap();
        let sink = MemoryFile::new("restored");
        let restored = sink.share();
        restore.add_destination(Box::new(sink));
        let chunks: Vec<&[u8]> = encoded.chunks(4096).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            restore.write(chunk, i == chunks.len() - 1).unwrap();
        }
        assert_eq!(&*restored.lock().unwrap(), &payload);
    }

    #[test]
    fn test_failing_destination_aborts_without_rollback() {
        let mut streamer = Streamer::new(
            StreamerMode::Backup,
            CompressionKind::None,
            EncryptionKind::None,
            -1,
            None,
        )
        .unwrap();
        let ok = MemoryFile::new("ok");
        let ok_buf = ok.share();
        streamer.add_destination(Box::new(ok));
        let mut failing = MemoryFile::new("bad");
        failing.fail_writes = true;
        streamer.add_destination(Box::new(failing));

        let err = streamer.write(b"payload", true).unwrap_err();
        assert!(matches!(err, StorageError::Destination { .. }));
        // the earlier destination kept its bytes
        assert_eq!(&*ok_buf.lock().unwrap(), b"payload");
    }

    #[test]
    fn test_dest_file_name() {
        let streamer = Streamer::new(
            StreamerMode::Backup,
            CompressionKind::Zstd,
            EncryptionKind::None,
            -1,
            None,
        )
        .unwrap();
        assert_eq!(streamer.dest_file_name("1234"), "1234.zst");

        let streamer = Streamer::new(
            StreamerMode::Restore,
            CompressionKind::Zstd,
            EncryptionKind::None,
            -1,
            None,
        )
        .unwrap();
        assert_eq!(streamer.dest_file_name("1234.zst"), "1234");
    }

    #[test]
    fn test_backup_stream_decodable_by_plain_codec() {
        let payload = b"streamed and compressed payload".repeat(100);
        let mut streamer = Streamer::new(
            StreamerMode::Backup,
            CompressionKind::Gzip,
            EncryptionKind::None,
            -1,
            None,
        )
        .unwrap();
        let sink = MemoryFile::new("gz");
        let shared = sink.share();
        streamer.add_destination(Box::new(sink));
        streamer.write(&payload, true).unwrap();

        let compressed = shared.lock().unwrap().clone();
        assert!(compressed.len() < payload.len());
        let mut decoder = decompressor(CompressionKind::Gzip).unwrap();
        assert_eq!(run_to_vec(decoder.as_mut(), &compressed).unwrap(), payload);
    }
}
