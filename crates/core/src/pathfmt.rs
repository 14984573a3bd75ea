//! Relative-path normalisation.
//!
//! Manifest entries and checksum catalogues store forward-slash separated
//! relative paths that never begin with `/`. These helpers enforce that rule
//! at every boundary where an OS path becomes a catalogue key.

use std::path::{Component, Path, PathBuf};

/// Normalise a path into catalogue form.
///
/// Drops root and prefix components, resolves `.` away, and joins the rest
/// with forward slashes. `..` components are kept verbatim; catalogue
/// writers never produce them and readers treat them as plain names.
pub fn to_catalogue_path(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => parts.push("..".to_string()),
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
        }
    }
    parts.join("/")
}

/// Relative catalogue path of `path` under `root`.
///
/// Returns `None` when `path` is not inside `root`.
pub fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(to_catalogue_path(rel))
}

/// Turn a catalogue path back into an OS path under `root`.
pub fn from_catalogue_path(root: &Path, catalogue_path: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    for part in catalogue_path.split('/').filter(|p| !p.is_empty()) {
        out.push(part);
    }
    out
}
