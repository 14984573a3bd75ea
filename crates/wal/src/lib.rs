//! WAL decoding and block-modification tracking.
//!
//! This crate consumes the upstream binary WAL format: it frames records
//! across page and segment boundaries, verifies per-record CRCs, dispatches
//! to per-resource-manager describe functions, and extracts the block
//! references that feed the block reference table during incremental
//! backups. It is strictly a consumer, never an emitter.

pub mod brt;
pub mod crc32c;
pub mod error;
pub mod reader;
pub mod record;
pub mod rmgr;
pub mod summary;

mod rm_database;
mod rm_heap;
mod rm_util;
mod rm_index;
mod rm_misc;
mod rm_mxact;
mod rm_standby;
mod rm_storage;
mod rm_xact;
mod rm_xlog;

pub use brt::{BlockRefTable, BrtError, ForkId, ForkKey};
pub use error::WalError;
pub use reader::{WalReader, WalReaderOptions};
pub use record::{BlockRef, DecodedRecord};
pub use rmgr::{describe_record, rmgr_name, RmgrDescriptor};
pub use summary::summarize_wal;
