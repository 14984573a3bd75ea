//! WAL decoding errors.

use thiserror::Error;
use vault_core::Lsn;

/// Errors raised while consuming the WAL stream.
#[derive(Debug, Error)]
pub enum WalError {
    /// The stream ended inside a header or payload
    #[error("Short read: needed {expected} bytes, got {got}")]
    ShortRead {
        /// Bytes the structure requires
        expected: usize,
        /// Bytes available
        got: usize,
    },

    /// A page carried an unknown magic value
    #[error("Bad page magic 0x{got:04X} at {lsn}")]
    BadMagic {
        /// Magic actually read
        got: u16,
        /// Page address
        lsn: Lsn,
    },

    /// Record checksum mismatch; reported with the exact LSN
    #[error("CRC mismatch for record at {lsn}")]
    BadCrc {
        /// Start LSN of the failing record
        lsn: Lsn,
    },

    /// Record named a resource manager outside the table
    #[error("Unknown resource manager id {0}")]
    UnknownRmgr(u8),

    /// Structural problem that is not a checksum failure
    #[error("Malformed WAL at {lsn}: {detail}")]
    Malformed {
        /// Position of the problem
        lsn: Lsn,
        /// What was wrong
        detail: String,
    },

    /// Underlying file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
