//! Stages composing the restore verb.

use crate::bag::{
    Bag, BagValue, NODE_BACKUPS, NODE_DIRECTORY, NODE_LABEL, NODE_TARGET_DIRECTORY,
};
use crate::error::EngineError;
use crate::incremental::{apply_incremental_file, INCREMENTAL_PREFIX};
use crate::stages::StageContext;
use crate::workflow::Stage;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use vault_concurrency::WorkerPool;
use vault_core::pathfmt;
use vault_core::{CompressionKind, EncryptionKind};
use vault_storage::{LocalFile, Streamer, StreamerMode, VirtualFile};

fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let kind = entry.file_type()?;
        if kind.is_dir() {
            walk_files(&path, out)?;
        } else if kind.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// Resolve the requested label (including `newest`/`oldest`), load the
/// parent chain, and publish paths for the downstream stages.
pub struct LocateStage {
    ctx: Arc<StageContext>,
    /// Whether the verb needs the full parent chain (restore) or just the
    /// one backup (verify, archive, delete)
    pub with_chain: bool,
}

impl LocateStage {
    pub fn new(ctx: Arc<StageContext>, with_chain: bool) -> Self {
        LocateStage { ctx, with_chain }
    }
}

impl Stage for LocateStage {
    fn name(&self) -> &str {
        "locate"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        let requested = bag.require_str(NODE_LABEL)?.to_string();
        let catalogue = self.ctx.catalogue();
        let backup = catalogue.locate(&requested)?;
        info!(server = %self.ctx.server, requested = %requested, label = %backup.label, "backup located");

        bag.set(NODE_LABEL, BagValue::Str(backup.label.clone()));
        bag.set(
            NODE_DIRECTORY,
            BagValue::Path(catalogue.backup_dir(&backup.label)),
        );
        let backups = if self.with_chain {
            catalogue.parent_chain(&backup.label)?
        } else {
            vec![backup]
        };
        bag.set(NODE_BACKUPS, BagValue::Backups(backups));
        Ok(())
    }
}

/// Materialise the full ancestor into the restore target, stripping codec
/// layers file by file.
pub struct ExtractLayersStage {
    ctx: Arc<StageContext>,
}

impl ExtractLayersStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        ExtractLayersStage { ctx }
    }
}

impl Stage for ExtractLayersStage {
    fn name(&self) -> &str {
        "extract_layers"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        // target directory: <output>/<server>-<label>; the label was
        // resolved by locate, so `newest` has become a concrete label
        let output = bag.require_path(crate::bag::NODE_OUTPUT)?.clone();
        let label = bag.require_str(NODE_LABEL)?;
        let target = output.join(format!("{}-{label}", self.ctx.server));
        std::fs::create_dir_all(&target)?;
        bag.set(NODE_TARGET_DIRECTORY, BagValue::Path(target.clone()));

        let chain = bag
            .get_backups(NODE_BACKUPS)
            .ok_or(EngineError::MissingBagEntry(NODE_BACKUPS))?;
        // the chain is child first; the full backup terminates it
        let full = chain.last().ok_or_else(|| {
            EngineError::Stage("empty backup chain".to_string())
        })?;
        let source = self
            .ctx
            .catalogue()
            .backup_dir(&full.label)
            .join("data");

        decode_tree(
            &self.ctx,
            &source,
            &target,
            full.compression,
            full.encryption,
        )?;
        info!(server = %self.ctx.server, label = %full.label, "base layer extracted");
        Ok(())
    }
}

/// Decode every file of `source` into `target`, stripping the recorded
/// codec layers and dropping the extension suffixes.
fn decode_tree(
    ctx: &Arc<StageContext>,
    source: &Path,
    target: &Path,
    compression: CompressionKind,
    encryption: EncryptionKind,
) -> Result<(), EngineError> {
    let pool = WorkerPool::new(ctx.workers);
    let errors: Arc<Mutex<Vec<String>>> = Arc::default();
    let mut files = Vec::new();
    walk_files(source, &mut files)?;

    for path in files {
        let rel = match pathfmt::relative_to(source, &path) {
            Some(rel) => rel,
            None => continue,
        };
        let ctx = ctx.clone();
        let target = target.to_path_buf();
        let errors = errors.clone();
        pool.submit(move |worker| {
            if let Err(e) = decode_file(&ctx, &path, &target, &rel, compression, encryption) {
                errors.lock().expect("errors lock").push(format!("{rel}: {e}"));
                worker.fail();
            }
        });
    }
    let ok = pool.wait_for_idle();
    pool.shutdown();
    if !ok {
        let errors = errors.lock().expect("errors lock");
        for error in errors.iter() {
            warn!(error = %error, "extract failed");
        }
        return Err(EngineError::Workers {
            phase: "extract_layers".to_string(),
            failed: errors.len(),
        });
    }
    Ok(())
}

fn decode_file(
    ctx: &StageContext,
    path: &Path,
    target_root: &Path,
    rel: &str,
    compression: CompressionKind,
    encryption: EncryptionKind,
) -> Result<(), EngineError> {
    let mut streamer = Streamer::new(
        StreamerMode::Restore,
        compression,
        encryption,
        -1,
        ctx.master_key.as_ref(),
    )?;
    let plain_rel = streamer.dest_file_name(rel);
    let dest = pathfmt::from_catalogue_path(target_root, &plain_rel);

    let name = Path::new(rel)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if vault_codec::detect_layers(&name).is_empty() {
        // plain file: straight copy
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(path, &dest)?;
        return Ok(());
    }

    let mut input = LocalFile::open(path)?;
    streamer.add_destination(Box::new(LocalFile::create(&dest)?));
    let mut buf = vec![0u8; 256 * 1024];
    loop {
        let chunk = input.read(&mut buf)?;
        streamer.write(&buf[..chunk.read], chunk.last_chunk)?;
        if chunk.last_chunk {
            break;
        }
    }
    streamer.finish()?;
    Ok(())
}

/// Overlay each incremental in the chain, oldest first, onto the
/// extracted base: whole files replace, `INCREMENTAL.*` files patch their
/// recorded blocks.
pub struct CombineIncrementalsStage {
    ctx: Arc<StageContext>,
}

impl CombineIncrementalsStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        CombineIncrementalsStage { ctx }
    }
}

impl Stage for CombineIncrementalsStage {
    fn name(&self) -> &str {
        "combine_incrementals"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        let chain = bag
            .get_backups(NODE_BACKUPS)
            .ok_or(EngineError::MissingBagEntry(NODE_BACKUPS))?
            .clone();
        if chain.len() < 2 {
            return Ok(());
        }
        let target = bag.require_path(NODE_TARGET_DIRECTORY)?.clone();
        let catalogue = self.ctx.catalogue();

        // skip the full (last); apply oldest incremental first
        for backup in chain[..chain.len() - 1].iter().rev() {
            let source = catalogue.backup_dir(&backup.label).join("data");
            let tmp = target.join(".combine-tmp");
            decode_tree(&self.ctx, &source, &tmp, backup.compression, backup.encryption)?;

            let mut files = Vec::new();
            walk_files(&tmp, &mut files)?;
            for path in files {
                let rel = match pathfmt::relative_to(&tmp, &path) {
                    Some(rel) => rel,
                    None => continue,
                };
                let name = Path::new(&rel)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if let Some(plain_name) = name.strip_prefix(INCREMENTAL_PREFIX) {
                    let plain_rel = match rel.rsplit_once('/') {
                        Some((dir, _)) => format!("{dir}/{plain_name}"),
                        None => plain_name.to_string(),
                    };
                    let dest = pathfmt::from_catalogue_path(&target, &plain_rel);
                    apply_incremental_file(&path, &dest)?;
                } else {
                    let dest = pathfmt::from_catalogue_path(&target, &rel);
                    if let Some(parent) = dest.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::copy(&path, &dest)?;
                }
            }
            std::fs::remove_dir_all(&tmp)?;
            debug!(label = %backup.label, "incremental combined");
        }
        info!(server = %self.ctx.server, applied = chain.len() - 1, "incremental chain combined");
        Ok(())
    }
}

/// Copy archived WAL segments next to the restored directory.
pub struct CopyWalStage {
    ctx: Arc<StageContext>,
}

impl CopyWalStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        CopyWalStage { ctx }
    }
}

impl Stage for CopyWalStage {
    fn name(&self) -> &str {
        "copy_wal"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        let target = bag.require_path(NODE_TARGET_DIRECTORY)?.clone();
        let wal_root = self.ctx.catalogue().wal_root();
        let dest = target.join("pg_wal");
        std::fs::create_dir_all(&dest)?;
        if !wal_root.is_dir() {
            return Ok(());
        }
        let mut copied = 0usize;
        for entry in std::fs::read_dir(&wal_root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                std::fs::copy(entry.path(), dest.join(entry.file_name()))?;
                copied += 1;
            }
        }
        debug!(segments = copied, "wal copied");
        Ok(())
    }
}

/// Restore upstream directory permissions: 0700 directories, 0600 files.
pub struct PermissionsStage;

impl Stage for PermissionsStage {
    fn name(&self) -> &str {
        "permissions"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        let target = bag.require_path(NODE_TARGET_DIRECTORY)?.clone();
        apply_permissions(&target)?;
        Ok(())
    }
}

#[cfg(unix)]
fn apply_permissions(dir: &Path) -> Result<(), EngineError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            apply_permissions(&path)?;
        } else {
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_permissions(_dir: &Path) -> Result<(), EngineError> {
    Ok(())
}

/// Drop transient files the earlier stages may have left behind.
pub struct CleanupStage;

impl Stage for CleanupStage {
    fn name(&self) -> &str {
        "cleanup"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        let target = bag.require_path(NODE_TARGET_DIRECTORY)?.clone();
        let tmp = target.join(".combine-tmp");
        if tmp.is_dir() {
            std::fs::remove_dir_all(&tmp)?;
        }
        let mut files = Vec::new();
        walk_files(&target, &mut files)?;
        for path in files {
            if path.extension().is_some_and(|e| e == "tmp") {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}
