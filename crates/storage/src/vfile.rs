//! Virtual file sinks.
//!
//! A [`VirtualFile`] is the write end of the streaming pipeline and the read
//! end of restore. The contract every implementation preserves:
//!
//! - writes are append-only and applied in call order
//! - `delete` succeeds even after `close`
//! - `close` is idempotent
//! - `read` reports `last_chunk = true` iff the medium signalled EOF on
//!   that call

use crate::error::StorageError;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Result of one [`VirtualFile::read`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadChunk {
    /// Bytes placed into the caller's buffer
    pub read: usize,
    /// True iff the medium signalled EOF on this call
    pub last_chunk: bool,
}

/// Abstract read/write/delete sink.
pub trait VirtualFile: Send {
    /// Read the next chunk.
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadChunk, StorageError>;

    /// Append a chunk. `last_chunk` lets buffered implementations flush.
    fn write(&mut self, buf: &[u8], last_chunk: bool) -> Result<(), StorageError>;

    /// Close the handle, then remove the underlying object.
    fn delete(&mut self) -> Result<(), StorageError>;

    /// Release the handle. Idempotent.
    fn close(&mut self) -> Result<(), StorageError>;

    /// Identifier for diagnostics and fan-out error reports.
    fn name(&self) -> String;
}

enum LocalHandle {
    Reader(File),
    Writer(BufWriter<File>),
    Closed,
}

/// Local-filesystem implementation over a buffered handle.
pub struct LocalFile {
    path: PathBuf,
    handle: LocalHandle,
}

impl LocalFile {
    /// Open for reading.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let file = File::open(path)?;
        Ok(LocalFile {
            path: path.to_path_buf(),
            handle: LocalHandle::Reader(file),
        })
    }

    /// Create (truncate) for writing.
    pub fn create(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(LocalFile {
            path: path.to_path_buf(),
            handle: LocalHandle::Writer(BufWriter::new(file)),
        })
    }

    /// The path this file reads or writes.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VirtualFile for LocalFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadChunk, StorageError> {
        match &mut self.handle {
            LocalHandle::Reader(file) => {
                let read = file.read(buf)?;
                Ok(ReadChunk {
                    read,
                    last_chunk: read == 0,
                })
            }
            _ => Err(StorageError::Closed(self.name())),
        }
    }

    fn write(&mut self, buf: &[u8], last_chunk: bool) -> Result<(), StorageError> {
        match &mut self.handle {
            LocalHandle::Writer(writer) => {
                writer.write_all(buf)?;
                if last_chunk {
                    writer.flush()?;
                }
                Ok(())
            }
            _ => Err(StorageError::Closed(self.name())),
        }
    }

    fn delete(&mut self) -> Result<(), StorageError> {
        self.close()?;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) -> Result<(), StorageError> {
        match std::mem::replace(&mut self.handle, LocalHandle::Closed) {
            LocalHandle::Writer(mut writer) => {
                writer.flush()?;
                Ok(())
            }
            LocalHandle::Reader(_) | LocalHandle::Closed => Ok(()),
        }
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }
}

impl Drop for LocalFile {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// In-memory implementation backing the tests. The buffer is shared so a
/// test can keep reading after the box moves into a streamer.
pub struct MemoryFile {
    label: String,
    data: Arc<Mutex<Vec<u8>>>,
    read_pos: usize,
    closed: bool,
    deleted: Arc<Mutex<bool>>,
    /// When set, the next write fails; exercises fan-out abort paths.
    pub fail_writes: bool,
}

impl MemoryFile {
    /// Empty writable file.
    pub fn new(label: &str) -> Self {
        MemoryFile {
            label: label.to_string(),
            data: Arc::new(Mutex::new(Vec::new())),
            read_pos: 0,
            closed: false,
            deleted: Arc::new(Mutex::new(false)),
            fail_writes: false,
        }
    }

    /// Readable file preloaded with `data`.
    pub fn with_data(label: &str, data: Vec<u8>) -> Self {
        let file = Self::new(label);
        *file.data.lock().expect("fresh lock") = data;
        file
    }

    /// Shared handle to the underlying buffer.
    pub fn share(&self) -> Arc<Mutex<Vec<u8>>> {
        self.data.clone()
    }

    /// Snapshot of the bytes written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().expect("memory file lock").clone()
    }

    /// Whether delete was called.
    pub fn is_deleted(&self) -> bool {
        *self.deleted.lock().expect("memory file lock")
    }
}

impl VirtualFile for MemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadChunk, StorageError> {
        if self.closed {
            return Err(StorageError::Closed(self.name()));
        }
        let data = self.data.lock().expect("memory file lock");
        let available = data.len() - self.read_pos;
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&data[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        Ok(ReadChunk {
            read: n,
            last_chunk: n == 0,
        })
    }

    fn write(&mut self, buf: &[u8], _last_chunk: bool) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Closed(self.name()));
        }
        if self.fail_writes {
            return Err(StorageError::Destination {
                destination: self.name(),
                reason: "injected failure".to_string(),
            });
        }
        self.data
            .lock()
            .expect("memory file lock")
            .extend_from_slice(buf);
        Ok(())
    }

    fn delete(&mut self) -> Result<(), StorageError> {
        self.closed = true;
        *self.deleted.lock().expect("memory file lock") = true;
        self.data.lock().expect("memory file lock").clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.closed = true;
        Ok(())
    }

    fn name(&self) -> String {
        format!("memory:{}", self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("file.bin");

        let mut file = LocalFile::create(&path).unwrap();
        file.write(b"hello ", false).unwrap();
        file.write(b"world", true).unwrap();
        file.close().unwrap();
        // close is idempotent
        file.close().unwrap();

        let mut file = LocalFile::open(&path).unwrap();
        let mut buf = [0u8; 64];
        let chunk = file.read(&mut buf).unwrap();
        assert_eq!(&buf[..chunk.read], b"hello world");
        assert!(!chunk.last_chunk);
        let chunk = file.read(&mut buf).unwrap();
        assert_eq!(chunk.read, 0);
        assert!(chunk.last_chunk);
    }

    #[test]
    fn test_delete_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("victim");
        let mut file = LocalFile::create(&path).unwrap();
        file.write(b"x", true).unwrap();
        file.close().unwrap();
        file.delete().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_write_after_close_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = LocalFile::create(&dir.path().join("f")).unwrap();
        file.close().unwrap();
        assert!(matches!(
            file.write(b"late", true),
            Err(StorageError::Closed(_))
        ));
    }

    #[test]
    fn test_memory_file_roundtrip() {
        let mut file = MemoryFile::new("t");
        file.write(b"abc", true).unwrap();
        assert_eq!(file.contents(), b"abc");
        file.delete().unwrap();
        assert!(file.is_deleted());
    }
}
