//! Stages composing the backup verb.

use crate::bag::{
    Bag, BagValue, NODE_DIRECTORY, NODE_KIND, NODE_LABEL, NODE_PARENT_LABEL,
    NODE_SOURCE_DIRECTORY, NODE_SYSTEM_ID, NODE_WAL_START, NODE_WAL_STOP,
};
use crate::error::EngineError;
use crate::incremental::{
    blocks_in_segment, parse_relation_path, write_incremental_file, BLOCK_SIZE, INCREMENTAL_PREFIX,
};
use crate::stages::StageContext;
use crate::workflow::Stage;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use vault_catalogue::{manifest, BackupInfo, Manifest};
use vault_concurrency::WorkerPool;
use vault_core::catalog_csv::{self, CatalogueRow};
use vault_core::hash::hash_file;
use vault_core::{pathfmt, BackupKind, CompressionKind, EncryptionKind, HashAlgorithm, Lsn};
use vault_storage::{LocalFile, Streamer, StreamerMode};
use vault_wal::reader::WalReaderOptions;
use vault_wal::{summarize_wal, BlockRefTable};

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

/// Copy the upstream data directory into the snapshot, full or
/// incremental. For incrementals the changed-block set comes from WAL
/// summarisation when archived segments cover the range, and from a
/// block-level comparison against the plain parent otherwise (the local
/// directory-scan path).
pub struct BaseBackupStage {
    ctx: Arc<StageContext>,
    pool: Option<WorkerPool>,
}

impl BaseBackupStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        BaseBackupStage { ctx, pool: None }
    }

    fn decide_kind(&self) -> Result<(BackupKind, Option<BackupInfo>), EngineError> {
        let catalogue = self.ctx.catalogue();
        let backups = catalogue.list_backups()?;
        // a backup is incremental iff a usable parent exists: the newest
        // backup, stored plain, with a manifest to diff against
        let parent = match backups.last() {
            Some(parent) => parent.clone(),
            None => return Ok((BackupKind::Full, None)),
        };
        if parent.compression != CompressionKind::None
            || parent.encryption != EncryptionKind::None
        {
            debug!(parent = %parent.label, "parent is encoded, taking a full backup");
            return Ok((BackupKind::Full, None));
        }
        if !catalogue
            .backup_dir(&parent.label)
            .join("backup_manifest")
            .is_file()
        {
            return Ok((BackupKind::Full, None));
        }
        Ok((BackupKind::Incremental, Some(parent)))
    }

    fn build_brt(
        &self,
        bag: &Bag,
        parent: &BackupInfo,
        source: &Path,
    ) -> Result<BlockRefTable, EngineError> {
        let mut brt = BlockRefTable::new();

        // preferred: summarize archived WAL between the parent's stop
        // position and ours
        let wal_start = parent.wal_stop;
        let wal_stop = bag.get_lsn(NODE_WAL_STOP).unwrap_or(Lsn::INVALID);
        if wal_start.is_valid() && wal_stop.is_valid() && wal_stop > wal_start {
            let options = WalReaderOptions {
                server_version: self.ctx.server_version,
                best_effort: true,
                ..WalReaderOptions::default()
            };
            let wal_dir = self.ctx.catalogue().wal_root();
            match summarize_wal(&wal_dir, 1, wal_start, wal_stop, options, &mut brt) {
                Ok(stats) => {
                    info!(records = stats.records, blocks = stats.blocks_marked, "brt from wal");
                    return Ok(brt);
                }
                Err(e) => {
                    warn!(error = %e, "wal summarisation unavailable, scanning blocks");
                    brt = BlockRefTable::new();
                }
            }
        }

        // fallback: compare changed relation files block by block against
        // the plain parent copy
        let parent_data = self.ctx.catalogue().backup_dir(&parent.label).join("data");
        let mut files = Vec::new();
        walk_files(source, &mut files)?;
        for path in files {
            let rel = match pathfmt::relative_to(source, &path) {
                Some(rel) => rel,
                None => continue,
            };
            let Some(relation) = parse_relation_path(&rel) else {
                continue;
            };
            let parent_file = pathfmt::from_catalogue_path(&parent_data, &rel);
            if !parent_file.is_file() {
                continue; // new relation, stored whole
            }
            let ours = std::fs::read(&path)?;
            let theirs = std::fs::read(&parent_file)?;
            let blocks = (ours.len() + BLOCK_SIZE - 1) / BLOCK_SIZE;
            for block in 0..blocks {
                let start = block * BLOCK_SIZE;
                let our_block = &ours[start..ours.len().min(start + BLOCK_SIZE)];
                let their_block: &[u8] = if start < theirs.len() {
                    &theirs[start..theirs.len().min(start + BLOCK_SIZE)]
                } else {
                    &[]
                };
                if our_block != their_block {
                    let absolute =
                        relation.segment * crate::incremental::BLOCKS_PER_SEGMENT + block as u32;
                    brt.mark_block_modified(relation.key, absolute);
                }
            }
        }
        Ok(brt)
    }
}

impl Stage for BaseBackupStage {
    fn name(&self) -> &str {
        "base_backup"
    }

    fn setup(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        let catalogue = self.ctx.catalogue();
        catalogue.ensure_layout()?;

        if bag.get_str(NODE_LABEL).is_none() {
            // labels have second resolution; a burst of backups walks
            // forward to the next free label so ordering stays intact
            let mut at = Utc::now();
            let label = loop {
                let candidate = BackupInfo::generate_label(at);
                if !catalogue.backup_dir(&candidate).exists() {
                    break candidate;
                }
                at += chrono::Duration::seconds(1);
            };
            bag.set(NODE_LABEL, BagValue::Str(label));
        }
        let label = bag.require_str(NODE_LABEL)?.to_string();
        let dir = catalogue.backup_dir(&label);
        std::fs::create_dir_all(dir.join("data"))?;
        std::fs::create_dir_all(dir.join("tablespaces"))?;
        bag.set(NODE_DIRECTORY, BagValue::Path(dir));
        bag.set(
            "started_epoch",
            BagValue::U64(Utc::now().timestamp() as u64),
        );
        self.pool = Some(WorkerPool::new(self.ctx.workers));
        Ok(())
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        let source = bag.require_path(NODE_SOURCE_DIRECTORY)?.clone();
        let dir = bag.require_path(NODE_DIRECTORY)?.clone();
        let data_dir = dir.join("data");
        let label = bag.require_str(NODE_LABEL)?.to_string();

        // a pre-seeded kind of "full" overrides the automatic choice
        let forced_full = matches!(bag.get_str(NODE_KIND), Some("full"));
        let (kind, parent) = if forced_full {
            (BackupKind::Full, None)
        } else {
            self.decide_kind()?
        };
        bag.set(NODE_KIND, BagValue::Str(kind.to_string()));
        if let Some(parent) = &parent {
            bag.set(NODE_PARENT_LABEL, BagValue::Str(parent.label.clone()));
        }
        info!(server = %self.ctx.server, label = %label, kind = %kind, "base backup started");

        let mut files = Vec::new();
        walk_files(&source, &mut files)?;
        files.sort();

        // incremental planning: which relation files shrink to block files
        let parent_manifest = match (&parent, kind) {
            (Some(parent), BackupKind::Incremental) => Some(Manifest::load(
                &self.ctx.catalogue().backup_dir(&parent.label).join("backup_manifest"),
            )?),
            _ => None,
        };
        let brt = match (&parent, kind) {
            (Some(parent), BackupKind::Incremental) => {
                Some(self.build_brt(bag, parent, &source)?)
            }
            _ => None,
        };

        let pool = self.pool.as_ref().expect("created in setup");
        let errors: Arc<Mutex<Vec<String>>> = Arc::default();

        for path in files {
            let rel = pathfmt::relative_to(&source, &path)
                .ok_or_else(|| EngineError::Stage("file escapes source".to_string()))?;

            // skip live WAL and transient files
            if rel.starts_with("pg_wal/") || rel.ends_with(".tmp") {
                continue;
            }

            let action = plan_file(&rel, &path, parent_manifest.as_ref(), brt.as_ref())?;
            let dest_root = data_dir.clone();
            let errors = errors.clone();
            match action {
                FileAction::Skip => {}
                FileAction::CopyWhole => {
                    pool.submit(move |worker| {
                        let dest = pathfmt::from_catalogue_path(&dest_root, &rel);
                        if let Err(e) = copy_streamed(&path, &dest) {
                            errors.lock().expect("errors lock").push(format!("{rel}: {e}"));
                            worker.fail();
                        }
                    });
                }
                FileAction::IncrementalBlocks(blocks) => {
                    pool.submit(move |worker| {
                        let (dir_part, name) = match rel.rsplit_once('/') {
                            Some((dir_part, name)) => (Some(dir_part), name),
                            None => (None, rel.as_str()),
                        };
                        let mut dest = dest_root.clone();
                        if let Some(dir_part) = dir_part {
                            dest = pathfmt::from_catalogue_path(&dest, dir_part);
                        }
                        let dest = dest.join(format!("{INCREMENTAL_PREFIX}{name}"));
                        if let Err(e) = write_incremental_file(&path, &blocks, &dest) {
                            errors.lock().expect("errors lock").push(format!("{rel}: {e}"));
                            worker.fail();
                        }
                    });
                }
            }
        }

        if !pool.wait_for_idle() {
            let errors = errors.lock().expect("errors lock");
            for error in errors.iter() {
                warn!(error = %error, "base backup file failed");
            }
            return Err(EngineError::Workers {
                phase: "base_backup".to_string(),
                failed: errors.len(),
            });
        }
        Ok(())
    }

    fn teardown(&mut self, _bag: &mut Bag) -> Result<(), EngineError> {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
        Ok(())
    }
}

enum FileAction {
    Skip,
    CopyWhole,
    IncrementalBlocks(Vec<u32>),
}

/// Decide how one source file lands in an incremental (or full) snapshot.
fn plan_file(
    rel: &str,
    _path: &Path,
    parent_manifest: Option<&Manifest>,
    brt: Option<&BlockRefTable>,
) -> Result<FileAction, EngineError> {
    let (Some(parent_manifest), Some(brt)) = (parent_manifest, brt) else {
        return Ok(FileAction::CopyWhole);
    };
    let Some(relation) = parse_relation_path(rel) else {
        return Ok(FileAction::CopyWhole);
    };
    if parent_manifest.entry(rel).is_none() {
        // new since the parent
        return Ok(FileAction::CopyWhole);
    }
    match brt.get_entry(&relation.key) {
        None => Ok(FileAction::Skip),
        Some(entry) => {
            let segment_blocks = blocks_in_segment(&entry.all_blocks(), relation.segment);
            if segment_blocks.is_empty() {
                Ok(FileAction::Skip)
            } else {
                Ok(FileAction::IncrementalBlocks(segment_blocks))
            }
        }
    }
}

/// Plain streamed copy through the virtual-file layer.
fn copy_streamed(source: &Path, dest: &Path) -> Result<(), EngineError> {
    let mut input = LocalFile::open(source)?;
    let mut streamer = Streamer::new(
        StreamerMode::Backup,
        CompressionKind::None,
        EncryptionKind::None,
        -1,
        None,
    )?;
    streamer.add_destination(Box::new(LocalFile::create(dest)?));
    let mut buf = vec![0u8; 256 * 1024];
    loop {
        let chunk = vault_storage::VirtualFile::read(&mut input, &mut buf)?;
        streamer.write(&buf[..chunk.read], chunk.last_chunk)?;
        if chunk.last_chunk {
            break;
        }
    }
    streamer.finish()?;
    Ok(())
}

/// Generate `backup_manifest` over the snapshot's plain data directory.
pub struct ManifestStage {
    ctx: Arc<StageContext>,
}

impl ManifestStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        ManifestStage { ctx }
    }
}

impl Stage for ManifestStage {
    fn name(&self) -> &str {
        "manifest"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        let dir = bag.require_path(NODE_DIRECTORY)?;
        let system_id = bag.get_u64(NODE_SYSTEM_ID).unwrap_or(0);
        let manifest = Manifest::generate(&dir.join("data"), system_id)?;
        manifest.write_to(&dir.join("backup_manifest"))?;
        info!(server = %self.ctx.server, files = manifest.files.len(), "manifest written");
        Ok(())
    }
}

/// Write the `backup.sha256` checksum catalogue over every stored file.
pub struct Sha256Stage {
    ctx: Arc<StageContext>,
}

impl Sha256Stage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        Sha256Stage { ctx }
    }
}

impl Stage for Sha256Stage {
    fn name(&self) -> &str {
        "sha256"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        let dir = bag.require_path(NODE_DIRECTORY)?.clone();
        let pool = WorkerPool::new(self.ctx.workers);
        let rows: Arc<Mutex<Vec<CatalogueRow>>> = Arc::default();

        let mut files = Vec::new();
        walk_files(&dir.join("data"), &mut files)?;
        walk_files(&dir.join("tablespaces"), &mut files)?;

        for path in files {
            let rel = pathfmt::relative_to(&dir, &path)
                .ok_or_else(|| EngineError::Stage("file escapes backup dir".to_string()))?;
            let rows = rows.clone();
            pool.submit(move |worker| match hash_file(HashAlgorithm::Sha256, &path) {
                Ok(checksum) => rows.lock().expect("rows lock").push(CatalogueRow {
                    path: rel,
                    checksum,
                }),
                Err(e) => {
                    warn!(path = %rel, error = %e, "hashing failed");
                    worker.fail();
                }
            });
        }
        let ok = pool.wait_for_idle();
        pool.shutdown();
        if !ok {
            return Err(EngineError::Workers {
                phase: "sha256".to_string(),
                failed: 1,
            });
        }

        let mut rows = Arc::try_unwrap(rows)
            .map_err(|_| EngineError::Stage("sha256 rows still shared".to_string()))?
            .into_inner()
            .expect("rows lock");
        rows.sort_by(|a, b| a.path.cmp(&b.path));
        let file = std::fs::File::create(dir.join("backup.sha256"))?;
        catalog_csv::write_rows(file, &rows)
            .map_err(|e| EngineError::Stage(format!("writing backup.sha256: {e}")))?;
        Ok(())
    }
}

/// Compress every stored file in place, appending the codec suffix.
pub struct CompressStage {
    ctx: Arc<StageContext>,
}

impl CompressStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        CompressStage { ctx }
    }
}

impl Stage for CompressStage {
    fn name(&self) -> &str {
        "compress"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        if self.ctx.compression == CompressionKind::None {
            return Ok(());
        }
        transform_tree(
            &self.ctx,
            bag,
            self.ctx.compression,
            EncryptionKind::None,
            "compress",
        )
    }
}

/// Encrypt every stored file in place, appending `.aes`.
pub struct EncryptStage {
    ctx: Arc<StageContext>,
}

impl EncryptStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        EncryptStage { ctx }
    }
}

impl Stage for EncryptStage {
    fn name(&self) -> &str {
        "encrypt"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        if self.ctx.encryption == EncryptionKind::None {
            return Ok(());
        }
        transform_tree(
            &self.ctx,
            bag,
            CompressionKind::None,
            self.ctx.encryption,
            "encrypt",
        )
    }
}

fn transform_tree(
    ctx: &Arc<StageContext>,
    bag: &Bag,
    compression: CompressionKind,
    encryption: EncryptionKind,
    phase: &str,
) -> Result<(), EngineError> {
    let dir = bag.require_path(NODE_DIRECTORY)?.clone();
    let pool = WorkerPool::new(ctx.workers);
    let mut files = Vec::new();
    walk_files(&dir.join("data"), &mut files)?;
    walk_files(&dir.join("tablespaces"), &mut files)?;

    let mut transformed = 0usize;
    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        // each file carries at most one compression and one encryption layer
        if !vault_codec::detect_layers(&name).is_empty() {
            continue;
        }
        transformed += 1;
        let ctx = ctx.clone();
        pool.submit(move |worker| {
            if let Err(e) = transform_file(&ctx, &path, compression, encryption) {
                warn!(path = %path.display(), error = %e, "transform failed");
                worker.fail();
            }
        });
    }

    let ok = pool.wait_for_idle();
    pool.shutdown();
    if !ok {
        return Err(EngineError::Workers {
            phase: phase.to_string(),
            failed: 1,
        });
    }
    debug!(files = transformed, phase, "tree transformed");
    Ok(())
}

fn transform_file(
    ctx: &StageContext,
    path: &Path,
    compression: CompressionKind,
    encryption: EncryptionKind,
) -> Result<(), EngineError> {
    let mut streamer = Streamer::new(
        StreamerMode::Backup,
        compression,
        encryption,
        ctx.compression_level,
        ctx.master_key.as_ref(),
    )?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dest = path.with_file_name(streamer.dest_file_name(&name));

    let mut input = LocalFile::open(path)?;
    streamer.add_destination(Box::new(LocalFile::create(&dest)?));
    let mut buf = vec![0u8; 256 * 1024];
    loop {
        let chunk = vault_storage::VirtualFile::read(&mut input, &mut buf)?;
        streamer.write(&buf[..chunk.read], chunk.last_chunk)?;
        if chunk.last_chunk {
            break;
        }
    }
    streamer.finish()?;
    drop(input);
    std::fs::remove_file(path)?;
    Ok(())
}

/// Hardlink files unchanged since the parent backup, deduplicating plain
/// full backups on disk. Applies only when both snapshots are plain: a
/// transformed file's bytes are not comparable through the manifest.
pub struct LinkStage {
    ctx: Arc<StageContext>,
}

impl LinkStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        LinkStage { ctx }
    }
}

impl Stage for LinkStage {
    fn name(&self) -> &str {
        "link"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        if self.ctx.compression != CompressionKind::None
            || self.ctx.encryption != EncryptionKind::None
        {
            return Ok(());
        }
        if bag.get_str(NODE_KIND) == Some("incremental") {
            // incremental snapshots already skip unchanged files
            return Ok(());
        }
        let catalogue = self.ctx.catalogue();
        let label = bag.require_str(NODE_LABEL)?.to_string();
        let dir = bag.require_path(NODE_DIRECTORY)?.clone();

        // previous backup, if plain
        let previous = catalogue
            .list_backups()?
            .into_iter()
            .filter(|b| b.label < label)
            .next_back();
        let Some(previous) = previous else {
            return Ok(());
        };
        if previous.compression != CompressionKind::None
            || previous.encryption != EncryptionKind::None
        {
            return Ok(());
        }
        let previous_dir = catalogue.backup_dir(&previous.label);
        let previous_manifest = match Manifest::load(&previous_dir.join("backup_manifest")) {
            Ok(manifest) => manifest,
            Err(_) => return Ok(()),
        };
        let our_manifest = Manifest::load(&dir.join("backup_manifest"))?;

        let diff = manifest::diff(&previous_manifest, &our_manifest);
        let mut linked = 0usize;
        for entry in &our_manifest.files {
            let changed = diff.changed.contains_key(entry.path.as_bytes())
                || diff.added.contains_key(entry.path.as_bytes());
            if changed {
                continue;
            }
            let ours = pathfmt::from_catalogue_path(&dir.join("data"), &entry.path);
            let theirs = pathfmt::from_catalogue_path(&previous_dir.join("data"), &entry.path);
            if !theirs.is_file() {
                continue;
            }
            std::fs::remove_file(&ours)?;
            std::fs::hard_link(&theirs, &ours)?;
            linked += 1;
        }
        info!(server = %self.ctx.server, linked, parent = %previous.label, "unchanged files linked");
        Ok(())
    }
}

/// Finalise `backup.info` and the server metadata.
pub struct RecoveryInfoStage {
    ctx: Arc<StageContext>,
}

impl RecoveryInfoStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        RecoveryInfoStage { ctx }
    }
}

impl Stage for RecoveryInfoStage {
    fn name(&self) -> &str {
        "recovery_info"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        let dir = bag.require_path(NODE_DIRECTORY)?.clone();
        let label = bag.require_str(NODE_LABEL)?.to_string();
        let kind = match bag.get_str(NODE_KIND) {
            Some("incremental") => BackupKind::Incremental,
            _ => BackupKind::Full,
        };

        let mut info = BackupInfo::new(&label, kind);
        info.parent = bag.get_str(NODE_PARENT_LABEL).map(str::to_string);
        info.wal_start = bag.get_lsn(NODE_WAL_START).unwrap_or(Lsn::INVALID);
        info.wal_stop = bag.get_lsn(NODE_WAL_STOP).unwrap_or(Lsn::INVALID);
        info.compression = self.ctx.compression;
        info.encryption = self.ctx.encryption;
        if let Some(started) = bag.get_u64("started_epoch") {
            let now = Utc::now().timestamp() as u64;
            info.elapsed_secs = now.saturating_sub(started);
        }
        info.store(&dir)?;

        // server.info carries the newest label for quick health checks
        let server_info = self
            .ctx
            .base_dir
            .join(&self.ctx.server)
            .join("server.info");
        std::fs::write(&server_info, format!("LATEST={label}\n"))?;
        info!(server = %self.ctx.server, label = %label, "backup finalised");
        Ok(())
    }
}

/// Tablespace mapping support: mirror user tablespaces into the snapshot.
pub struct TablespaceStage {
    ctx: Arc<StageContext>,
}

impl TablespaceStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        TablespaceStage { ctx }
    }
}

impl Stage for TablespaceStage {
    fn name(&self) -> &str {
        "tablespaces"
    }

    fn execute(&mut self, bag: &mut Bag) -> Result<(), EngineError> {
        let source = bag.require_path(NODE_SOURCE_DIRECTORY)?.clone();
        let dir = bag.require_path(NODE_DIRECTORY)?.clone();
        let tblspc = source.join("pg_tblspc");
        if !tblspc.is_dir() {
            return Ok(());
        }
        let mut mapping: HashMap<String, PathBuf> = HashMap::new();
        for entry in std::fs::read_dir(&tblspc)? {
            let entry = entry?;
            let link = entry.path();
            let target = std::fs::read_link(&link).unwrap_or(link.clone());
            mapping.insert(entry.file_name().to_string_lossy().into_owned(), target);
        }
        for (name, target) in mapping {
            let dest = dir.join("tablespaces").join(&name);
            let mut files = Vec::new();
            walk_files(&target, &mut files)?;
            for path in files {
                if let Some(rel) = pathfmt::relative_to(&target, &path) {
                    let out = pathfmt::from_catalogue_path(&dest, &rel);
                    if let Some(parent) = out.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::copy(&path, &out)?;
                }
            }
            debug!(server = %self.ctx.server, tablespace = %name, "tablespace captured");
        }
        Ok(())
    }
}
