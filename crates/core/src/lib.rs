//! Shared foundation for the pgvault backup engine.
//!
//! This crate holds the pieces every other layer leans on:
//! - [`error`]: the error model used across the workspace
//! - [`config`]: configuration loading and per-server runtime state
//! - [`types`]: backup labels, LSNs, codec selectors
//! - [`hash`]: streaming content hashes (SHA-224/256/384/512, HMAC)
//! - [`catalog_csv`]: the colon-delimited checksum catalogue format
//! - [`pathfmt`]: relative-path normalisation rules

pub mod catalog_csv;
pub mod config;
pub mod error;
pub mod hash;
pub mod pathfmt;
pub mod types;

pub use config::{Configuration, ConfigurationHandle, Server, ServerState};
pub use error::{ConfigError, Error, NetworkError, Result};
pub use hash::HashAlgorithm;
pub use types::{BackupKind, CompressionKind, EncryptionKind, Lsn};
