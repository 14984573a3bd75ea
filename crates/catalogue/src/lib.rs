//! The backup catalogue: manifests, per-backup metadata, the on-disk
//! snapshot layout, and retention.

pub mod backup_info;
pub mod catalogue;
pub mod manifest;
pub mod retention;

pub use backup_info::BackupInfo;
pub use catalogue::{Catalogue, CatalogueError};
pub use manifest::{Manifest, ManifestDiff, ManifestEntry, ManifestError, VerifyFailure};
pub use retention::compute_retention_set;
