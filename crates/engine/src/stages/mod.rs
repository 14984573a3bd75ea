//! Stage implementations, grouped by the verb that composes them.

pub mod archive;
pub mod backup;
pub mod maintenance;
pub mod restore;
pub mod verify;

use std::path::PathBuf;
use vault_codec::MasterKey;
use vault_core::{CompressionKind, EncryptionKind};

/// Immutable per-invocation context shared by stages: the slice of the
/// configuration one orchestrator run needs.
#[derive(Clone)]
pub struct StageContext {
    /// Server name
    pub server: String,
    /// Repository base directory
    pub base_dir: PathBuf,
    /// Compression for new backups
    pub compression: CompressionKind,
    /// Compression level
    pub compression_level: i32,
    /// Encryption for new backups
    pub encryption: EncryptionKind,
    /// Stretched master key, when encryption is configured
    pub master_key: Option<MasterKey>,
    /// Worker threads for file fan-out (0 = inline)
    pub workers: usize,
    /// Upstream major version
    pub server_version: u32,
}

impl StageContext {
    /// Catalogue for this context's server.
    pub fn catalogue(&self) -> vault_catalogue::Catalogue {
        vault_catalogue::Catalogue::open(&self.base_dir, &self.server)
    }
}
