//! Stages composing the verify verb. Verification reports every failure
//! and keeps walking; the stage fails only after the full sweep.
//!
//! Manifest and catalogue checksums always describe the plain content, so
//! a compressed or encrypted snapshot is decoded in memory before hashing.

use crate::bag::{Bag, BagValue, NODE_BACKUPS, NODE_DIRECTORY, NODE_FAILURES};
use crate::error::EngineError;
use crate::stages::StageContext;
use crate::workflow::Stage;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use vault_catalogue::{BackupInfo, Manifest};
use vault_codec::{decompressor, decryptor, encoded_file_name, run_to_vec};
use vault_core::catalog_csv;
use vault_core::hash::{hash_bytes, hash_file};
use vault_core::{pathfmt, CompressionKind, EncryptionKind, HashAlgorithm};

/// Load the manifest and check its own trailing checksum.
pub struct ManifestVerifyStage {
    ctx: Arc<StageContext>,
}

impl ManifestVerifyStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        ManifestVerifyStage { ctx }
    }
}

impl Stage for ManifestVerifyStage {
    fn name(&self) -> &str {
        "manifest_verify"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        let dir = bag.require_path(NODE_DIRECTORY)?;
        let manifest = Manifest::load(&dir.join("backup_manifest"))?;
        info!(
            server = %self.ctx.server,
            files = manifest.files.len(),
            "manifest loaded and self-verified"
        );
        Ok(())
    }
}

/// Recompute the checksum of every listed file, plus the `backup.sha256`
/// catalogue, collecting all mismatches into the bag.
pub struct Sha256VerifyStage {
    ctx: Arc<StageContext>,
}

impl Sha256VerifyStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        Sha256VerifyStage { ctx }
    }

    /// Hash the plain content of a stored file: the plain path when
    /// present, otherwise the codec-suffixed sibling decoded in memory.
    fn hash_stored(
        &self,
        root: &Path,
        rel: &str,
        info: &BackupInfo,
    ) -> Result<String, String> {
        let plain = pathfmt::from_catalogue_path(root, rel);
        if plain.is_file() {
            return hash_file(HashAlgorithm::Sha256, &plain).map_err(|e| format!("unreadable: {e}"));
        }

        let encoded_rel = encoded_file_name(rel, info.compression, info.encryption);
        let encoded = pathfmt::from_catalogue_path(root, &encoded_rel);
        if !encoded.is_file() {
            return Err("missing".to_string());
        }
        let mut bytes = std::fs::read(&encoded).map_err(|e| format!("unreadable: {e}"))?;
        if info.encryption != EncryptionKind::None {
            let key = self
                .ctx
                .master_key
                .as_ref()
                .ok_or_else(|| "encrypted and no master key configured".to_string())?;
            let mut codec = decryptor(info.encryption, Some(key))
                .map_err(|e| e.to_string())?
                .ok_or_else(|| "no decryptor".to_string())?;
            bytes = run_to_vec(codec.as_mut(), &bytes).map_err(|e| format!("decrypt: {e}"))?;
        }
        if info.compression != CompressionKind::None {
            let mut codec = decompressor(info.compression)
                .ok_or_else(|| "no decompressor".to_string())?;
            bytes = run_to_vec(codec.as_mut(), &bytes).map_err(|e| format!("decompress: {e}"))?;
        }
        Ok(hash_bytes(HashAlgorithm::Sha256, &bytes))
    }
}

impl Stage for Sha256VerifyStage {
    fn name(&self) -> &str {
        "sha256_verify"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        let dir = bag.require_path(NODE_DIRECTORY)?.clone();
        let info = bag
            .get_backups(NODE_BACKUPS)
            .and_then(|backups| backups.first().cloned())
            .ok_or(EngineError::MissingBagEntry(NODE_BACKUPS))?;
        let mut failures: Vec<String> = Vec::new();

        // manifest entries are relative to the data directory
        let manifest = Manifest::load(&dir.join("backup_manifest"))?;
        for entry in &manifest.files {
            match self.hash_stored(&dir.join("data"), &entry.path, &info) {
                Ok(actual) if actual == entry.checksum => {}
                Ok(actual) => failures.push(format!(
                    "{}: checksum mismatch: expected {}, got {actual}",
                    entry.path, entry.checksum
                )),
                Err(reason) => failures.push(format!("{}: {reason}", entry.path)),
            }
        }

        // catalogue rows are relative to the backup directory
        let catalogue_path = dir.join("backup.sha256");
        if catalogue_path.is_file() {
            let file = std::fs::File::open(&catalogue_path)?;
            let rows = catalog_csv::read_rows(file)
                .map_err(|e| EngineError::Stage(format!("reading backup.sha256: {e}")))?;
            for row in rows {
                match self.hash_stored(&dir, &row.path, &info) {
                    Ok(actual) if actual == row.checksum => {}
                    Ok(actual) => failures.push(format!(
                        "{}: checksum mismatch: expected {}, got {actual}",
                        row.path, row.checksum
                    )),
                    Err(reason) => failures.push(format!("{}: {reason}", row.path)),
                }
            }
        }

        failures.sort();
        failures.dedup();
        for failure in &failures {
            error!(server = %self.ctx.server, failure = %failure, "verification failure");
        }
        let count = failures.len();
        bag.set(NODE_FAILURES, BagValue::StrList(failures));
        if count > 0 {
            return Err(EngineError::Stage(format!(
                "verification found {count} failed files"
            )));
        }
        info!(server = %self.ctx.server, "backup verified clean");
        Ok(())
    }
}
