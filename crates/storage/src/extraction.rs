//! Layered extraction.
//!
//! A delivered file may be encrypted, compressed, and a tar archive, in any
//! sensible layering. [`extract_file`] peels the layers one at a time until
//! a directory can be produced, removing every intermediate it created and
//! leaving the original source untouched.

use crate::error::StorageError;
use crate::tarball::unpack_to_directory;
use std::path::{Path, PathBuf};
use tracing::debug;
use vault_codec::{decompressor, decryptor, detect_layers, run_to_vec, FileLayer, MasterKey};
use vault_core::EncryptionKind;

/// Type bit: file carries an AES layer.
pub const TYPE_ENCRYPTED: u8 = 0x01;
/// Type bit: file carries a compression layer.
pub const TYPE_COMPRESSED: u8 = 0x02;
/// Type bit: file is a tar archive.
pub const TYPE_TAR: u8 = 0x04;

/// Unpeel `path` into the directory `destination`.
///
/// - `type_mask` zero means "detect from the extension sequence"
/// - with `copy` set the source is duplicated first and the copy is
///   consumed instead
/// - fails with [`StorageError::NotArchive`] when the innermost layer is
///   not a tar archive
pub fn extract_file(
    path: &Path,
    destination: &Path,
    type_mask: u8,
    copy: bool,
    key: Option<&MasterKey>,
) -> Result<(), StorageError> {
    let mut current: PathBuf = path.to_path_buf();
    let mut intermediates: Vec<PathBuf> = Vec::new();

    if copy {
        let duplicate = destination_sibling(destination, path)?;
        std::fs::copy(path, &duplicate)?;
        intermediates.push(duplicate.clone());
        current = duplicate;
    }

    let result = unpeel(&current, destination, type_mask, path, key, &mut intermediates);

    // intermediates are removed on success and failure alike
    for intermediate in intermediates {
        if intermediate != *path {
            let _ = std::fs::remove_file(&intermediate);
        }
    }
    result
}

fn unpeel(
    start: &Path,
    destination: &Path,
    type_mask: u8,
    original: &Path,
    key: Option<&MasterKey>,
    intermediates: &mut Vec<PathBuf>,
) -> Result<(), StorageError> {
    let mut current = start.to_path_buf();
    loop {
        let name = current
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let layers = detect_layers(&name);
        let outer = effective_outer_layer(&layers, type_mask);

        match outer {
            Some(FileLayer::Encrypted) => {
                let key = key.ok_or_else(|| StorageError::EncryptedNoKey(name.clone()))?;
                let mut codec = decryptor(EncryptionKind::Aes256Ctr, Some(key))?
                    .expect("ctr decryptor for a concrete key");
                current = strip_one(&current, original, codec.as_mut(), intermediates)?;
            }
            Some(FileLayer::Compressed(kind)) => {
                let mut codec =
                    decompressor(kind).expect("decompressor for a concrete codec kind");
                current = strip_one(&current, original, codec.as_mut(), intermediates)?;
            }
            Some(FileLayer::Archive) => {
                debug!(file = %current.display(), dest = %destination.display(), "untarring");
                return unpack_to_directory(&current, destination);
            }
            None => {
                // mask said TAR even though the name does not
                if type_mask & TYPE_TAR != 0 {
                    return unpack_to_directory(&current, destination);
                }
                return Err(StorageError::NotArchive(name));
            }
        }
    }
}

/// The outermost layer still to strip, honouring an explicit mask.
fn effective_outer_layer(layers: &[FileLayer], type_mask: u8) -> Option<FileLayer> {
    let outer = layers.first().copied();
    if type_mask == 0 {
        return outer;
    }
    match outer {
        Some(FileLayer::Encrypted) if type_mask & TYPE_ENCRYPTED != 0 => outer,
        Some(FileLayer::Compressed(_)) if type_mask & TYPE_COMPRESSED != 0 => outer,
        Some(FileLayer::Archive) if type_mask & TYPE_TAR != 0 => outer,
        _ => None,
    }
}

/// Decode one layer of `current` into a sibling file without the outermost
/// extension, recording it as an intermediate.
fn strip_one(
    current: &Path,
    original: &Path,
    codec: &mut dyn vault_codec::Codec,
    intermediates: &mut Vec<PathBuf>,
) -> Result<PathBuf, StorageError> {
    let input = std::fs::read(current)?;
    let output = run_to_vec(codec, &input)?;

    let stem = current
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stripped = stem.rsplit_once('.').map(|(s, _)| s.to_string()).unwrap_or(stem);
    let out_path = current.with_file_name(stripped);

    std::fs::write(&out_path, output)?;
    if out_path != *original {
        intermediates.push(out_path.clone());
    }
    Ok(out_path)
}

fn destination_sibling(destination: &Path, path: &Path) -> Result<PathBuf, StorageError> {
    std::fs::create_dir_all(destination)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "payload".to_string());
    Ok(destination.join(name))
}
