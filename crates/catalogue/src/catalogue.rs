//! On-disk catalogue of labelled snapshots.
//!
//! Layout per server:
//!
//! ```text
//! <base>/<server>/backup/<label>/   one directory per snapshot
//! <base>/<server>/wal/             archived WAL segments
//! <base>/<server>/server.info      server-level metadata
//! ```

use crate::backup_info::BackupInfo;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use vault_core::BackupKind;

/// Catalogue errors. Inconsistent on-disk state is surfaced, never
/// auto-repaired.
#[derive(Debug, Error)]
pub enum CatalogueError {
    /// No backup with that label
    #[error("Backup not found: {0}")]
    NotFound(String),

    /// The server has no backups at all
    #[error("No backups for server")]
    Empty,

    /// Deleting this backup would orphan a live incremental
    #[error("Backup {0} has incremental children")]
    HasChildren(String),

    /// On-disk state does not parse
    #[error("Corrupt catalogue state: {0}")]
    Corrupt(String),

    /// A parent chain does not terminate at a full backup
    #[error("Broken parent chain at {0}")]
    BrokenChain(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Well-known label selector: newest backup.
pub const LABEL_NEWEST: &str = "newest";
/// Well-known label selector: oldest backup.
pub const LABEL_OLDEST: &str = "oldest";

/// Catalogue rooted at one server's directory.
pub struct Catalogue {
    server_dir: PathBuf,
}

impl Catalogue {
    /// Catalogue for `<base>/<server>`.
    pub fn open(base: &Path, server: &str) -> Catalogue {
        Catalogue {
            server_dir: base.join(server),
        }
    }

    /// `<base>/<server>/backup`
    pub fn backup_root(&self) -> PathBuf {
        self.server_dir.join("backup")
    }

    /// `<base>/<server>/wal`
    pub fn wal_root(&self) -> PathBuf {
        self.server_dir.join("wal")
    }

    /// Directory of one snapshot.
    pub fn backup_dir(&self, label: &str) -> PathBuf {
        self.backup_root().join(label)
    }

    /// Create the server skeleton if absent.
    pub fn ensure_layout(&self) -> Result<(), CatalogueError> {
        std::fs::create_dir_all(self.backup_root())?;
        std::fs::create_dir_all(self.wal_root())?;
        Ok(())
    }

    /// All backups sorted by label ascending (oldest first).
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>, CatalogueError> {
        let root = self.backup_root();
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut labels: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                labels.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        labels.sort();

        let mut backups = Vec::with_capacity(labels.len());
        for label in labels {
            match BackupInfo::load(&root.join(&label)) {
                Ok(backup) => backups.push(backup),
                Err(e) => {
                    // surfaced, not repaired: a directory without readable
                    // metadata is skipped from listings but never touched
                    warn!(label = %label, error = %e, "unreadable backup.info");
                }
            }
        }
        Ok(backups)
    }

    /// Locate a backup by label, or by the `newest`/`oldest` selectors.
    pub fn locate(&self, label: &str) -> Result<BackupInfo, CatalogueError> {
        match label {
            LABEL_NEWEST => self
                .list_backups()?
                .pop()
                .ok_or(CatalogueError::Empty),
            LABEL_OLDEST => self
                .list_backups()?
                .into_iter()
                .next()
                .ok_or(CatalogueError::Empty),
            _ => {
                let dir = self.backup_dir(label);
                if !dir.is_dir() {
                    return Err(CatalogueError::NotFound(label.to_string()));
                }
                BackupInfo::load(&dir)
            }
        }
    }

    /// Parent chain of `label`, child first, terminating at a full backup.
    ///
    /// Fails with [`CatalogueError::BrokenChain`] on a missing parent or a
    /// cycle; the chain of an incremental must be acyclic and end at a full.
    pub fn parent_chain(&self, label: &str) -> Result<Vec<BackupInfo>, CatalogueError> {
        let mut chain = Vec::new();
        let mut current = self.locate(label)?;
        let mut seen: Vec<String> = Vec::new();
        loop {
            seen.push(current.label.clone());
            let parent = current.parent.clone();
            let kind = current.kind;
            chain.push(current);
            match kind {
                BackupKind::Full => return Ok(chain),
                BackupKind::Incremental => {
                    let parent =
                        parent.ok_or_else(|| CatalogueError::BrokenChain(label.to_string()))?;
                    if seen.contains(&parent) {
                        return Err(CatalogueError::BrokenChain(parent));
                    }
                    current = match self.locate(&parent) {
                        Ok(backup) => backup,
                        Err(CatalogueError::NotFound(_)) => {
                            return Err(CatalogueError::BrokenChain(parent))
                        }
                        Err(e) => return Err(e),
                    };
                }
            }
        }
    }

    /// Labels of backups whose parent is `label`.
    pub fn children(&self, label: &str) -> Result<Vec<String>, CatalogueError> {
        Ok(self
            .list_backups()?
            .into_iter()
            .filter(|b| b.parent.as_deref() == Some(label))
            .map(|b| b.label)
            .collect())
    }

    /// Delete one backup. Refused when a live incremental depends on it.
    pub fn delete_backup(&self, label: &str) -> Result<(), CatalogueError> {
        let backup = self.locate(label)?;
        let children = self.children(&backup.label)?;
        if !children.is_empty() {
            return Err(CatalogueError::HasChildren(backup.label));
        }
        std::fs::remove_dir_all(self.backup_dir(&backup.label))?;
        info!(label = %backup.label, "backup deleted");
        Ok(())
    }
}
