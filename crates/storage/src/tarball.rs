//! Tar pack and unpack.
//!
//! Directory trees are packed with entries in sorted path order so that two
//! packs of the same tree are byte-identical.

use crate::error::StorageError;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};
use tracing::debug;

/// Pack `dir` into a tar stream on `writer`, entries sorted by path.
pub fn pack_directory<W: Write>(dir: &Path, writer: W) -> Result<W, StorageError> {
    let mut builder = Builder::new(writer);
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    walk(dir, &mut files, &mut dirs)?;
    dirs.sort();
    files.sort();

    for sub in dirs {
        let rel = sub.strip_prefix(dir).unwrap_or(&sub).to_path_buf();
        if rel.as_os_str().is_empty() {
            continue;
        }
        builder.append_dir(&rel, &sub)?;
    }
    for file in files {
        let rel = file.strip_prefix(dir).unwrap_or(&file).to_path_buf();
        builder.append_path_with_name(&file, &rel)?;
    }
    let writer = builder.into_inner()?;
    Ok(writer)
}

/// Pack `dir` into a tar file at `tar_path`.
pub fn pack_directory_to_file(dir: &Path, tar_path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = tar_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(tar_path)?;
    let mut writer = pack_directory(dir, BufWriter::new(file))?;
    writer.flush()?;
    debug!(dir = %dir.display(), tar = %tar_path.display(), "directory packed");
    Ok(())
}

/// Unpack a tar file into `dest`.
pub fn unpack_to_directory(tar_path: &Path, dest: &Path) -> Result<(), StorageError> {
    std::fs::create_dir_all(dest)?;
    let file = File::open(tar_path)?;
    let mut archive = Archive::new(file);
    archive.set_preserve_permissions(true);
    archive
        .unpack(dest)
        .map_err(|e| StorageError::NotArchive(format!("{}: {e}", tar_path.display())))?;
    Ok(())
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>, dirs: &mut Vec<PathBuf>) -> Result<(), StorageError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let kind = entry.file_type()?;
        if kind.is_dir() {
            dirs.push(path.clone());
            walk(&path, files, dirs)?;
        } else if kind.is_file() {
            files.push(path);
        }
        // sockets and other specials are skipped
    }
    Ok(())
}
