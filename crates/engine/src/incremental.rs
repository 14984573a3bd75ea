//! Incremental snapshot file format and relation-path mapping.
//!
//! An incremental backup stores, for each relation file with modified
//! blocks, an `INCREMENTAL.<name>` file carrying only those blocks; all
//! non-relation files are copied whole. The combine step overlays a chain
//! of such snapshots onto a copy of the full backup to reconstruct a plain
//! data directory.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use vault_wal::{ForkId, ForkKey};

use crate::error::EngineError;

/// Magic at the start of an incremental block file ("INCB").
pub const INCREMENTAL_MAGIC: u32 = 0x4243_4E49;

/// Format version.
pub const INCREMENTAL_VERSION: u16 = 1;

/// Relation block size.
pub const BLOCK_SIZE: usize = 8192;

/// Name prefix marking an incremental block file.
pub const INCREMENTAL_PREFIX: &str = "INCREMENTAL.";

/// Tablespace OID of `base/` (pg_default).
pub const DEFAULT_TABLESPACE_OID: u32 = 1663;

/// Tablespace OID of `global/` (pg_global).
pub const GLOBAL_TABLESPACE_OID: u32 = 1664;

/// Blocks per 1 GiB relation segment.
pub const BLOCKS_PER_SEGMENT: u32 = 131_072;

/// A data-directory path resolved to its relation fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationPath {
    /// Fork key of the file
    pub key: ForkKey,
    /// 1 GiB segment number (the `.N` suffix; 0 when absent)
    pub segment: u32,
}

/// Map a catalogue path inside `data/` to its relation fork.
///
/// Recognises `base/<db>/<rel>` and `global/<rel>` files with optional
/// `_fsm`/`_vm`/`_init` fork suffixes and `.N` segment suffixes. Anything
/// else (configuration files, CLOG, the WAL itself) is not a relation.
pub fn parse_relation_path(path: &str) -> Option<RelationPath> {
    let parts: Vec<&str> = path.split('/').collect();
    let (spc_oid, db_oid, file_name) = match parts.as_slice() {
        ["base", db, name] => (DEFAULT_TABLESPACE_OID, db.parse::<u32>().ok()?, *name),
        ["global", name] => (GLOBAL_TABLESPACE_OID, 0, *name),
        _ => return None,
    };

    let (name, segment) = match file_name.rsplit_once('.') {
        Some((stem, seg)) => (stem, seg.parse::<u32>().ok()?),
        None => (file_name, 0),
    };
    let (rel_text, fork) = if let Some(stem) = name.strip_suffix("_fsm") {
        (stem, ForkId::Fsm)
    } else if let Some(stem) = name.strip_suffix("_vm") {
        (stem, ForkId::Vm)
    } else if let Some(stem) = name.strip_suffix("_init") {
        (stem, ForkId::Init)
    } else {
        (name, ForkId::Main)
    };
    let rel_oid = rel_text.parse::<u32>().ok()?;

    Some(RelationPath {
        key: ForkKey {
            spc_oid,
            db_oid,
            rel_oid,
            fork,
        },
        segment,
    })
}

/// Block numbers relative to this segment file for a fork-wide block list.
pub fn blocks_in_segment(blocks: &[u32], segment: u32) -> Vec<u32> {
    let lo = segment * BLOCKS_PER_SEGMENT;
    let hi = lo + BLOCKS_PER_SEGMENT;
    blocks
        .iter()
        .filter(|&&b| b >= lo && b < hi)
        .map(|&b| b - lo)
        .collect()
}

/// Write `INCREMENTAL.<name>`: the listed blocks of `source`, plus enough
/// header to reconstruct.
///
/// Layout (little-endian): magic u32, version u16, block count u32, source
/// length in bytes u64, then block numbers, then per block a u32 payload
/// length and the payload.
pub fn write_incremental_file(
    source: &Path,
    blocks: &[u32],
    dest: &Path,
) -> Result<(), EngineError> {
    let mut input = File::open(source)?;
    let source_len = input.metadata()?.len();

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(File::create(dest)?);
    out.write_u32::<LittleEndian>(INCREMENTAL_MAGIC)?;
    out.write_u16::<LittleEndian>(INCREMENTAL_VERSION)?;
    out.write_u32::<LittleEndian>(blocks.len() as u32)?;
    out.write_u64::<LittleEndian>(source_len)?;
    for &block in blocks {
        out.write_u32::<LittleEndian>(block)?;
    }

    let mut buf = vec![0u8; BLOCK_SIZE];
    for &block in blocks {
        let offset = block as u64 * BLOCK_SIZE as u64;
        input.seek(SeekFrom::Start(offset))?;
        let mut filled = 0usize;
        while filled < BLOCK_SIZE {
            let n = input.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        out.write_u32::<LittleEndian>(filled as u32)?;
        out.write_all(&buf[..filled])?;
    }
    out.flush()?;
    Ok(())
}

/// Apply an incremental block file onto `target`, creating or extending it
/// as needed and truncating to the recorded source length.
pub fn apply_incremental_file(incremental: &Path, target: &Path) -> Result<(), EngineError> {
    let mut input = BufReader::new(File::open(incremental)?);
    let magic = input.read_u32::<LittleEndian>()?;
    if magic != INCREMENTAL_MAGIC {
        return Err(EngineError::Stage(format!(
            "{} is not an incremental block file",
            incremental.display()
        )));
    }
    let version = input.read_u16::<LittleEndian>()?;
    if version != INCREMENTAL_VERSION {
        return Err(EngineError::Stage(format!(
            "unsupported incremental file version {version}"
        )));
    }
    let count = input.read_u32::<LittleEndian>()? as usize;
    let source_len = input.read_u64::<LittleEndian>()?;
    let mut blocks = Vec::with_capacity(count);
    for _ in 0..count {
        blocks.push(input.read_u32::<LittleEndian>()?);
    }

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = OpenOptions::new()
        .create(true)
        .write(true)
        .read(true)
        .open(target)?;
    let mut buf = vec![0u8; BLOCK_SIZE];
    for &block in &blocks {
        let len = input.read_u32::<LittleEndian>()? as usize;
        if len > BLOCK_SIZE {
            return Err(EngineError::Stage(format!(
                "incremental block payload of {len} bytes"
            )));
        }
        input.read_exact(&mut buf[..len])?;
        out.seek(SeekFrom::Start(block as u64 * BLOCK_SIZE as u64))?;
        out.write_all(&buf[..len])?;
    }
    out.set_len(source_len)?;
    out.flush()?;
    Ok(())
}
