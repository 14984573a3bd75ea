//! Byte movement: virtual-file sinks, the transform streamer, tar
//! archives, layered extraction, and the object-store HTTP client.

pub mod error;
pub mod extraction;
pub mod http;
pub mod streamer;
pub mod tarball;
pub mod vfile;

pub use error::StorageError;
pub use extraction::{extract_file, TYPE_COMPRESSED, TYPE_ENCRYPTED, TYPE_TAR};
pub use streamer::{Streamer, StreamerMode};
pub use vfile::{LocalFile, MemoryFile, ReadChunk, VirtualFile};
