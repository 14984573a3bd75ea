//! Codec layering expressed through file extensions.
//!
//! Every file in a backup is plain, compressed, encrypted, or
//! compressed-then-encrypted, and the extension sequence records the
//! layering exactly: `base/16384/1234.zst.aes` was compressed with zstd and
//! then encrypted. These helpers build and peel that sequence.

use vault_core::{CompressionKind, EncryptionKind};

/// One detected layer, outermost first when returned from [`detect_layers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLayer {
    /// AES encryption layer (`.aes`)
    Encrypted,
    /// A compression layer with its codec
    Compressed(CompressionKind),
    /// A tar archive (`.tar`)
    Archive,
}

/// Append the codec suffixes a backup write will produce.
pub fn encoded_file_name(
    name: &str,
    compression: CompressionKind,
    encryption: EncryptionKind,
) -> String {
    let mut out = name.to_string();
    if let Some(ext) = compression.extension() {
        out.push('.');
        out.push_str(ext);
    }
    if let Some(ext) = encryption.extension() {
        out.push('.');
        out.push_str(ext);
    }
    out
}

/// Strip every recognised codec suffix, yielding the plain name.
pub fn plain_file_name(name: &str) -> String {
    let mut out = name;
    while let Some((stem, ext)) = out.rsplit_once('.') {
        if ext == "aes" || CompressionKind::from_extension(ext).is_some() {
            out = stem;
        } else {
            break;
        }
    }
    out.to_string()
}

/// Detect the layer stack from the extension sequence, outermost first.
pub fn detect_layers(name: &str) -> Vec<FileLayer> {
    let mut layers = Vec::new();
    let mut rest = name;
    loop {
        let Some((stem, ext)) = rest.rsplit_once('.') else {
            break;
        };
        if ext == "aes" {
            layers.push(FileLayer::Encrypted);
        } else if ext == "tar" {
            layers.push(FileLayer::Archive);
        } else if let Some(kind) = CompressionKind::from_extension(ext) {
            layers.push(FileLayer::Compressed(kind));
        } else {
            break;
        }
        rest = stem;
    }
    layers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_name_layering() {
        assert_eq!(
            encoded_file_name("1234", CompressionKind::Zstd, EncryptionKind::Aes256Ctr),
            "1234.zst.aes"
        );
        assert_eq!(
            encoded_file_name("1234", CompressionKind::None, EncryptionKind::None),
            "1234"
        );
        assert_eq!(
            encoded_file_name("1234", CompressionKind::Gzip, EncryptionKind::None),
            "1234.gz"
        );
    }

    #[test]
    fn test_plain_name_strips_all_layers() {
        assert_eq!(plain_file_name("1234.zst.aes"), "1234");
        assert_eq!(plain_file_name("archive.tar"), "archive.tar");
        assert_eq!(plain_file_name("PG_VERSION"), "PG_VERSION");
    }

    #[test]
    fn test_detect_layers_outermost_first() {
        assert_eq!(
            detect_layers("backup.tar.zst.aes"),
            vec![
                FileLayer::Encrypted,
                FileLayer::Compressed(CompressionKind::Zstd),
                FileLayer::Archive,
            ]
        );
        assert_eq!(detect_layers("plain.txt"), vec![]);
    }
}
