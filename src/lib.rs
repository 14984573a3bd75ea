//! # pgvault
//!
//! A backup-and-restore engine for a PostgreSQL primary: physical base
//! backups and WAL segments stream into versioned snapshots on
//! content-addressed storage, with compression, encryption and
//! block-level deduplication, and any supported moment can be
//! reconstructed back into a runnable data directory.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use pgvault::{Configuration, Orchestrator};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Configuration::load(Path::new("/etc/pgvault/pgvault.conf"))?);
//!     let orchestrator = Orchestrator::new(config);
//!
//!     let outcome = orchestrator.backup("primary", None);
//!     assert!(outcome.is_ok());
//!
//!     let outcome = orchestrator.restore("primary", "newest", Path::new("/tmp/out"));
//!     assert!(outcome.is_ok());
//!     Ok(())
//! }
//! ```
//!
//! # Verbs
//!
//! | Verb | Composition |
//! |------|-------------|
//! | **Backup** | base backup → manifest → sha256 → compress? → encrypt? → link? → recovery info |
//! | **Restore** | locate → extract layers → combine incrementals? → copy WAL → permissions → cleanup |
//! | **Verify** | locate → manifest verify → sha256 verify |
//! | **Archive** | locate → tar → deliver |
//! | **Retention** | repository lock → expire window → delete, children first |
//! | **Delete** | locate → check no children → unlink |
//!
//! # Architecture
//!
//! The [`Orchestrator`] is the main entry point; the management binaries
//! in `vault-cli` drive it over the control socket (`vault-wire`). The
//! layers underneath — codecs, streamer, virtual files, worker pool, WAL
//! decoding, block reference table, catalogue — are re-exported here for
//! library consumers and the test harness.

pub use vault_catalogue::{BackupInfo, Catalogue, CatalogueError, Manifest, ManifestError};
pub use vault_codec::{Codec, CodecError, MasterKey};
pub use vault_concurrency::WorkerPool;
pub use vault_core::{
    BackupKind, CompressionKind, Configuration, ConfigurationHandle, EncryptionKind, Lsn,
};
pub use vault_engine::{Bag, BagValue, EngineError, Orchestrator, Stage, Workflow, WorkflowError};
pub use vault_primitives::Art;
pub use vault_storage::{extract_file, LocalFile, Streamer, StreamerMode, VirtualFile};
pub use vault_wal::{BlockRefTable, ForkId, ForkKey, WalError, WalReader};
pub use vault_wire::{Command, ManagementClient, ManagementServer, Request, Response};
