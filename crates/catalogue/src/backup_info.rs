//! `backup.info`: key/value metadata stored next to every snapshot.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::str::FromStr;
use vault_core::{BackupKind, CompressionKind, EncryptionKind, Lsn};

use crate::catalogue::CatalogueError;

/// Metadata for one backup snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    /// Server-scoped unique label; lexicographic order equals creation order
    pub label: String,
    /// full or incremental
    pub kind: BackupKind,
    /// Parent label, required iff incremental
    pub parent: Option<String>,
    /// WAL position where the base copy began
    pub wal_start: Lsn,
    /// WAL position where the base copy ended
    pub wal_stop: Lsn,
    /// Wall-clock seconds the backup took
    pub elapsed_secs: u64,
    /// Compression applied to the snapshot's files
    pub compression: CompressionKind,
    /// Encryption applied to the snapshot's files
    pub encryption: EncryptionKind,
    /// Free-form operator comment
    pub comments: String,
}

impl BackupInfo {
    /// New-backup metadata with the given label and kind.
    pub fn new(label: &str, kind: BackupKind) -> Self {
        BackupInfo {
            label: label.to_string(),
            kind,
            parent: None,
            wal_start: Lsn::INVALID,
            wal_stop: Lsn::INVALID,
            elapsed_secs: 0,
            compression: CompressionKind::None,
            encryption: EncryptionKind::None,
            comments: String::new(),
        }
    }

    /// Generate a label from a timestamp; `YYYYMMDDHHMMSS` so the
    /// lexicographic-equals-chronological invariant holds.
    pub fn generate_label(now: DateTime<Utc>) -> String {
        now.format("%Y%m%d%H%M%S").to_string()
    }

    /// Serialise to `KEY=VALUE` lines.
    pub fn to_string_form(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("LABEL={}\n", self.label));
        out.push_str(&format!("KIND={}\n", self.kind));
        if let Some(parent) = &self.parent {
            out.push_str(&format!("PARENT={parent}\n"));
        }
        out.push_str(&format!("WAL_START={}\n", self.wal_start));
        out.push_str(&format!("WAL_STOP={}\n", self.wal_stop));
        out.push_str(&format!("ELAPSED={}\n", self.elapsed_secs));
        out.push_str(&format!("COMPRESSION={}\n", compression_name(self.compression)));
        out.push_str(&format!("ENCRYPTION={}\n", encryption_name(self.encryption)));
        if !self.comments.is_empty() {
            out.push_str(&format!("COMMENTS={}\n", self.comments));
        }
        out
    }

    /// Parse `KEY=VALUE` lines.
    pub fn parse(text: &str) -> Result<BackupInfo, CatalogueError> {
        let mut label = None;
        let mut kind = None;
        let mut parent = None;
        let mut wal_start = Lsn::INVALID;
        let mut wal_stop = Lsn::INVALID;
        let mut elapsed_secs = 0;
        let mut compression = CompressionKind::None;
        let mut encryption = EncryptionKind::None;
        let mut comments = String::new();

        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                "LABEL" => label = Some(value.to_string()),
                "KIND" => {
                    kind = Some(match value {
                        "full" => BackupKind::Full,
                        "incremental" => BackupKind::Incremental,
                        other => {
                            return Err(CatalogueError::Corrupt(format!(
                                "bad backup kind: {other}"
                            )))
                        }
                    })
                }
                "PARENT" => parent = Some(value.to_string()),
                "WAL_START" => {
                    wal_start = Lsn::from_str(value)
                        .map_err(|e| CatalogueError::Corrupt(format!("bad WAL_START: {e}")))?
                }
                "WAL_STOP" => {
                    wal_stop = Lsn::from_str(value)
                        .map_err(|e| CatalogueError::Corrupt(format!("bad WAL_STOP: {e}")))?
                }
                "ELAPSED" => {
                    elapsed_secs = value
                        .parse()
                        .map_err(|_| CatalogueError::Corrupt("bad ELAPSED".to_string()))?
                }
                "COMPRESSION" => {
                    compression = value
                        .parse()
                        .map_err(|e| CatalogueError::Corrupt(format!("bad COMPRESSION: {e}")))?
                }
                "ENCRYPTION" => {
                    encryption = value
                        .parse()
                        .map_err(|e| CatalogueError::Corrupt(format!("bad ENCRYPTION: {e}")))?
                }
                "COMMENTS" => comments = value.to_string(),
                _ => {}
            }
        }

        let label = label.ok_or_else(|| CatalogueError::Corrupt("no LABEL".to_string()))?;
        let kind = kind.ok_or_else(|| CatalogueError::Corrupt("no KIND".to_string()))?;
        if kind == BackupKind::Incremental && parent.is_none() {
            return Err(CatalogueError::Corrupt(
                "incremental backup without PARENT".to_string(),
            ));
        }
        Ok(BackupInfo {
            label,
            kind,
            parent,
            wal_start,
            wal_stop,
            elapsed_secs,
            compression,
            encryption,
            comments,
        })
    }

    /// Write to `<backup_dir>/backup.info`.
    pub fn store(&self, backup_dir: &Path) -> Result<(), CatalogueError> {
        std::fs::write(backup_dir.join("backup.info"), self.to_string_form())?;
        Ok(())
    }

    /// Load from `<backup_dir>/backup.info`.
    pub fn load(backup_dir: &Path) -> Result<BackupInfo, CatalogueError> {
        let text = std::fs::read_to_string(backup_dir.join("backup.info"))?;
        Self::parse(&text)
    }

    /// Creation time parsed back out of the label.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        chrono::NaiveDateTime::parse_from_str(&self.label, "%Y%m%d%H%M%S")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

fn compression_name(kind: CompressionKind) -> &'static str {
    match kind {
        CompressionKind::None => "none",
        CompressionKind::Gzip => "gzip",
        CompressionKind::Zstd => "zstd",
        CompressionKind::Lz4 => "lz4",
        CompressionKind::Bzip2 => "bzip2",
    }
}

fn encryption_name(kind: EncryptionKind) -> &'static str {
    match kind {
        EncryptionKind::None => "none",
        EncryptionKind::Aes256Cbc => "aes-256-cbc",
        EncryptionKind::Aes256Ctr => "aes-256-ctr",
    }
}
