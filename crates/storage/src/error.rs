//! Storage-layer errors.

use thiserror::Error;
use vault_codec::CodecError;

/// Errors from virtual files, the streamer, archives and extraction.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A transform in the streamer chain failed
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Operation on a file that was already closed
    #[error("File already closed: {0}")]
    Closed(String),

    /// Extraction reached a payload that is not a tar archive
    #[error("Not an archive: {0}")]
    NotArchive(String),

    /// Extraction needs a key for an encrypted layer
    #[error("File {0} is encrypted and no master key is configured")]
    EncryptedNoKey(String),

    /// A destination write failed mid fan-out; earlier destinations keep
    /// their bytes and the caller is responsible for cleanup
    #[error("Destination {destination} failed: {reason}")]
    Destination {
        /// Path of the failing destination
        destination: String,
        /// Underlying failure
        reason: String,
    },
}
