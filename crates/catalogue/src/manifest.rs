//! Backup manifest: the per-file checksum catalogue.
//!
//! Written in the upstream-compatible JSON shape:
//!
//! ```text
//! { "PostgreSQL-Backup-Manifest-Version": 2,
//!   "System-Identifier": 7123...,
//!   "Files": [ { "Path": ..., "Size": ..., "Checksum-Algorithm": "SHA256",
//!                "Checksum": ..., "Last-Modification": ... }, ... ],
//!   "Manifest-Checksum": ... }
//! ```
//!
//! UTF-8, LF line endings, no BOM. The trailing `Manifest-Checksum` is the
//! SHA-256 of every byte preceding its own key line, byte-exact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, warn};
use vault_core::hash::{hash_file, Hasher};
use vault_core::{pathfmt, HashAlgorithm};
use vault_primitives::Art;

/// Manifest format version written by this engine.
pub const MANIFEST_VERSION: u32 = 2;

/// Manifest errors.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// A listed file does not exist on disk
    #[error("Missing file: {0}")]
    Missing(String),

    /// Checksum of one file disagrees with its entry
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Relative path
        path: String,
        /// Checksum recorded in the manifest
        expected: String,
        /// Checksum recomputed from disk
        actual: String,
    },

    /// The manifest's own trailing checksum is wrong
    #[error("Manifest checksum mismatch")]
    SelfChecksum,

    /// The manifest JSON did not parse or misses required keys
    #[error("Malformed manifest: {0}")]
    Malformed(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One file entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Relative forward-slash path, never beginning with `/`
    #[serde(rename = "Path")]
    pub path: String,
    /// File size in bytes
    #[serde(rename = "Size")]
    pub size: u64,
    /// Checksum algorithm name
    #[serde(rename = "Checksum-Algorithm")]
    pub algorithm: String,
    /// Lowercase hex digest
    #[serde(rename = "Checksum")]
    pub checksum: String,
    /// `YYYY-MM-DD HH:MM:SS GMT`
    #[serde(rename = "Last-Modification")]
    pub last_modification: String,
}

/// A whole manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Format version
    pub version: u32,
    /// Upstream system identifier
    pub system_identifier: u64,
    /// Entries in path-sorted order
    pub files: Vec<ManifestEntry>,
}

impl Manifest {
    /// Walk `root` and build a manifest, streaming every file through
    /// SHA-256. Entries come out path-sorted.
    pub fn generate(root: &Path, system_identifier: u64) -> Result<Manifest, ManifestError> {
        let mut paths: Vec<PathBuf> = Vec::new();
        collect_files(root, &mut paths)?;
        paths.sort();

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let rel = pathfmt::relative_to(root, &path)
                .ok_or_else(|| ManifestError::Malformed("file escapes root".to_string()))?;
            let metadata = std::fs::metadata(&path)?;
            let modified: DateTime<Utc> = metadata.modified()?.into();
            files.push(ManifestEntry {
                path: rel,
                size: metadata.len(),
                algorithm: HashAlgorithm::Sha256.manifest_name().to_string(),
                checksum: hash_file(HashAlgorithm::Sha256, &path)?,
                last_modification: modified.format("%Y-%m-%d %H:%M:%S GMT").to_string(),
            });
        }
        Ok(Manifest {
            version: MANIFEST_VERSION,
            system_identifier,
            files,
        })
    }

    /// Serialise to the upstream JSON shape, including the trailing
    /// self-checksum.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        let mut head = Vec::new();
        write!(
            head,
            "{{ \"PostgreSQL-Backup-Manifest-Version\": {},\n\"System-Identifier\": {},\n\"Files\": [",
            self.version, self.system_identifier
        )?;
        for (i, entry) in self.files.iter().enumerate() {
            if i > 0 {
                head.push(b',');
            }
            head.push(b'\n');
            let json = serde_json::to_string(entry)
                .map_err(|e| ManifestError::Malformed(e.to_string()))?;
            head.extend_from_slice(json.as_bytes());
        }
        head.extend_from_slice(b"],\n");

        let mut hasher = Hasher::new(HashAlgorithm::Sha256);
        hasher.update(&head);
        let checksum = hasher.finalize_hex();

        let mut out = head;
        write!(out, "\"Manifest-Checksum\": \"{checksum}\"}}\n")?;
        Ok(out)
    }

    /// Write to `path` atomically (temp file then rename).
    pub fn write_to(&self, path: &Path) -> Result<(), ManifestError> {
        let bytes = self.to_bytes()?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Parse and verify the trailing self-checksum.
    pub fn from_bytes(bytes: &[u8]) -> Result<Manifest, ManifestError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ManifestError::Malformed("manifest is not UTF-8".to_string()))?;
        let marker = "\"Manifest-Checksum\": ";
        let marker_at = text
            .rfind(marker)
            .ok_or_else(|| ManifestError::Malformed("no Manifest-Checksum".to_string()))?;

        let mut hasher = Hasher::new(HashAlgorithm::Sha256);
        hasher.update(&bytes[..marker_at]);
        let expected = hasher.finalize_hex();

        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ManifestError::Malformed(e.to_string()))?;
        let recorded = value
            .get("Manifest-Checksum")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ManifestError::Malformed("bad Manifest-Checksum".to_string()))?;
        if recorded != expected {
            return Err(ManifestError::SelfChecksum);
        }

        let version = value
            .get("PostgreSQL-Backup-Manifest-Version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ManifestError::Malformed("no version".to_string()))? as u32;
        let system_identifier = value
            .get("System-Identifier")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let files: Vec<ManifestEntry> = value
            .get("Files")
            .map(|f| serde_json::from_value(f.clone()))
            .transpose()
            .map_err(|e| ManifestError::Malformed(e.to_string()))?
            .unwrap_or_default();

        Ok(Manifest {
            version,
            system_identifier,
            files,
        })
    }

    /// Load from disk.
    pub fn load(path: &Path) -> Result<Manifest, ManifestError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Entry lookup by relative path.
    pub fn entry(&self, path: &str) -> Option<&ManifestEntry> {
        self.files.iter().find(|e| e.path == path)
    }
}

/// Result of diffing two manifests. Membership is decided by path; changed
/// is decided by checksum alone, size and timestamp are ignored.
pub struct ManifestDiff {
    /// In old, not in new
    pub deleted: Art<ManifestEntry>,
    /// In new, not in old
    pub added: Art<ManifestEntry>,
    /// In both, different checksum; value is the new entry
    pub changed: Art<ManifestEntry>,
}

/// Diff `old` against `new`.
pub fn diff(old: &Manifest, new: &Manifest) -> ManifestDiff {
    let mut old_paths: Art<&ManifestEntry> = Art::new();
    for entry in &old.files {
        old_paths.insert(entry.path.as_bytes(), entry);
    }

    let mut deleted = Art::new();
    let mut added = Art::new();
    let mut changed = Art::new();

    let mut seen: Art<()> = Art::new();
    for entry in &new.files {
        seen.insert(entry.path.as_bytes(), ());
        match old_paths.get(entry.path.as_bytes()) {
            None => {
                added.insert(entry.path.as_bytes(), entry.clone());
            }
            Some(old_entry) if old_entry.checksum != entry.checksum => {
                changed.insert(entry.path.as_bytes(), entry.clone());
            }
            Some(_) => {}
        }
    }
    for entry in &old.files {
        if !seen.contains_key(entry.path.as_bytes()) {
            deleted.insert(entry.path.as_bytes(), entry.clone());
        }
    }

    ManifestDiff {
        deleted,
        added,
        changed,
    }
}

/// One verification failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyFailure {
    /// Relative path of the failing file
    pub path: String,
    /// What went wrong
    pub reason: String,
}

/// Walk the on-disk backup and recompute every listed checksum.
///
/// Reports every failure and keeps going; an empty list means the backup
/// verified clean.
pub fn verify(root: &Path, manifest: &Manifest) -> Vec<VerifyFailure> {
    let mut failures = Vec::new();
    for entry in &manifest.files {
        let path = pathfmt::from_catalogue_path(root, &entry.path);
        if !path.is_file() {
            warn!(path = %entry.path, "manifest file missing on disk");
            failures.push(VerifyFailure {
                path: entry.path.clone(),
                reason: "missing".to_string(),
            });
            continue;
        }
        let algorithm = HashAlgorithm::from_manifest_name(&entry.algorithm)
            .unwrap_or(HashAlgorithm::Sha256);
        match hash_file(algorithm, &path) {
            Ok(actual) if actual == entry.checksum => {}
            Ok(actual) => {
                error!(
                    path = %entry.path,
                    expected = %entry.checksum,
                    actual = %actual,
                    "checksum mismatch"
                );
                failures.push(VerifyFailure {
                    path: entry.path.clone(),
                    reason: format!("checksum mismatch: expected {}, got {actual}", entry.checksum),
                });
            }
            Err(e) => {
                failures.push(VerifyFailure {
                    path: entry.path.clone(),
                    reason: format!("unreadable: {e}"),
                });
            }
        }
    }
    failures
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let kind = entry.file_type()?;
        if kind.is_dir() {
            collect_files(&path, out)?;
        } else if kind.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn seed_tree(root: &Path) {
        fs::create_dir_all(root.join("base/16384")).unwrap();
        fs::write(root.join("PG_VERSION"), "17\n").unwrap();
        fs::write(root.join("base/16384/1234"), vec![7u8; 4096]).unwrap();
        fs::write(root.join("base/16384/5678"), b"relation").unwrap();
    }

    #[test]
    fn test_generate_sorted_entries() {
        let dir = tempfile::tempdir().unwrap();
        seed_tree(dir.path());
        let manifest = Manifest::generate(dir.path(), 42).unwrap();
        assert_eq!(manifest.files.len(), 3);
        let paths: Vec<&str> = manifest.files.iter().map(|e| e.path.as_str()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
        assert!(manifest.entry("PG_VERSION").is_some());
        assert!(manifest.files.iter().all(|e| !e.path.starts_with('/')));
        assert!(manifest
            .files
            .iter()
            .all(|e| e.last_modification.ends_with(" GMT")));
    }

    #[test]
    fn test_write_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        seed_tree(dir.path());
        let manifest = Manifest::generate(dir.path(), 42).unwrap();
        let path = dir.path().join("backup_manifest");
        manifest.write_to(&path).unwrap();

        let loaded = Manifest::load(&path).unwrap();
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn test_tampered_manifest_rejected() {
        let dir = tempfile::tempdir().unwrap();
        seed_tree(dir.path());
        let manifest = Manifest::generate(dir.path(), 42).unwrap();
        let bytes = manifest.to_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let tampered = text.replace("PG_VERSION", "PG_VERSIOM");
        let err = Manifest::from_bytes(tampered.as_bytes()).unwrap_err();
        assert!(matches!(err, ManifestError::SelfChecksum));
    }

    #[test]
    fn test_verify_reports_every_failure() {
        let dir = tempfile::tempdir().unwrap();
        seed_tree(dir.path());
        let manifest = Manifest::generate(dir.path(), 42).unwrap();

        // corrupt one byte of one file, remove another
        let victim = dir.path().join("base/16384/1234");
        let mut bytes = fs::read(&victim).unwrap();
        bytes[100] ^= 0xFF;
        fs::write(&victim, bytes).unwrap();
        fs::remove_file(dir.path().join("base/16384/5678")).unwrap();

        let failures = verify(dir.path(), &manifest);
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().any(|f| f.path == "base/16384/1234"
            && f.reason.contains("checksum mismatch")));
        assert!(failures
            .iter()
            .any(|f| f.path == "base/16384/5678" && f.reason == "missing"));
    }

    #[test]
    fn test_diff_membership_and_checksum() {
        let entry = |path: &str, checksum: &str| ManifestEntry {
            path: path.to_string(),
            size: 1,
            algorithm: "SHA256".to_string(),
            checksum: checksum.to_string(),
            last_modification: "2026-08-01 00:00:00 GMT".to_string(),
        };
        let old = Manifest {
            version: 2,
            system_identifier: 1,
            files: vec![entry("a", "x"), entry("b", "y"), entry("c", "z")],
        };
        let new = Manifest {
            version: 2,
            system_identifier: 1,
            files: vec![
                entry("b", "y2"), // changed
                entry("c", "z"),  // unchanged, size/mtime ignored
                entry("d", "w"),  // added
            ],
        };

        let diff = diff(&old, &new);
        assert_eq!(diff.deleted.keys(), vec![b"a".to_vec()]);
        assert_eq!(diff.added.keys(), vec![b"d".to_vec()]);
        assert_eq!(diff.changed.keys(), vec![b"b".to_vec()]);

        // added ∪ unchanged = paths(new)
        let unchanged: Vec<&str> = new
            .files
            .iter()
            .map(|e| e.path.as_str())
            .filter(|p| {
                !diff.added.contains_key(p.as_bytes()) && !diff.changed.contains_key(p.as_bytes())
            })
            .collect();
        assert_eq!(unchanged, vec!["c"]);
    }

    #[test]
    fn test_last_modification_format() {
        let entry = ManifestEntry {
            path: "x".to_string(),
            size: 0,
            algorithm: "SHA256".to_string(),
            checksum: String::new(),
            last_modification: "2026-08-01 12:30:00 GMT".to_string(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"Last-Modification\":\"2026-08-01 12:30:00 GMT\""));
    }
}
