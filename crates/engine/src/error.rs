//! Engine error model: lower-layer errors funnel into [`EngineError`];
//! the workflow engine wraps whichever one surfaced with the name of the
//! stage that raised it.

use thiserror::Error;
use vault_catalogue::{CatalogueError, ManifestError};
use vault_codec::CodecError;
use vault_storage::StorageError;
use vault_wal::{BrtError, WalError};

/// Any failure a stage can raise.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Core-level error (config, network, serialization)
    #[error(transparent)]
    Core(#[from] vault_core::Error),

    /// Codec failure; fatal for the current file only
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Storage-layer failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// WAL decoding failure
    #[error(transparent)]
    Wal(#[from] WalError),

    /// Block reference table failure
    #[error(transparent)]
    Brt(#[from] BrtError),

    /// Catalogue inconsistency; surfaced, never auto-repaired
    #[error(transparent)]
    Catalogue(#[from] CatalogueError),

    /// Manifest failure
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Some worker-pool tasks reported failure
    #[error("{failed} worker tasks failed during {phase}")]
    Workers {
        /// Which batch failed
        phase: String,
        /// How many tasks reported failure (at least one)
        failed: usize,
    },

    /// A bag entry the stage depends on is absent or of the wrong type
    #[error("Missing bag entry: {0}")]
    MissingBagEntry(&'static str),

    /// Cooperative cancellation observed between stages
    #[error("Cancelled")]
    Cancelled,

    /// Stage-specific failure with its own message
    #[error("{0}")]
    Stage(String),
}

/// A stage failure, annotated with the stage that raised it.
#[derive(Debug, Error)]
#[error("Stage {stage} failed: {source}")]
pub struct WorkflowError {
    /// Name of the failing stage
    pub stage: String,
    /// The underlying error
    #[source]
    pub source: EngineError,
}

impl WorkflowError {
    pub(crate) fn new(stage: &str, source: EngineError) -> Self {
        WorkflowError {
            stage: stage.to_string(),
            source,
        }
    }
}
