//! Core value types: WAL positions, backup kinds, codec selectors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 64-bit position in the WAL stream.
///
/// Displayed in the upstream `XXXXXXXX/XXXXXXXX` split-hex notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lsn(pub u64);

impl Lsn {
    /// The zero position, used as "not yet known".
    pub const INVALID: Lsn = Lsn(0);

    /// High 32 bits (log file id).
    pub fn high(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Low 32 bits (offset within the log file id).
    pub fn low(self) -> u32 {
        self.0 as u32
    }

    /// Whether this position is set.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.high(), self.low())
    }
}

impl FromStr for Lsn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hi, lo) = s
            .split_once('/')
            .ok_or_else(|| format!("LSN must be HI/LO hex: {s}"))?;
        let hi = u32::from_str_radix(hi, 16).map_err(|e| e.to_string())?;
        let lo = u32::from_str_radix(lo, 16).map_err(|e| e.to_string())?;
        Ok(Lsn(((hi as u64) << 32) | lo as u64))
    }
}

/// Kind of a backup snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    /// Complete copy of the data directory
    Full,
    /// Only blocks changed since the parent backup
    Incremental,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::Full => write!(f, "full"),
            BackupKind::Incremental => write!(f, "incremental"),
        }
    }
}

/// Compression applied to files and wire messages.
///
/// The numeric discriminants are the stable wire bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    /// No compression
    #[default]
    None = 0,
    /// gzip (DEFLATE with gzip framing)
    Gzip = 1,
    /// Zstandard
    Zstd = 2,
    /// LZ4 frame format
    Lz4 = 3,
    /// bzip2
    Bzip2 = 4,
}

impl CompressionKind {
    /// File extension appended by this codec, without the dot.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            CompressionKind::None => None,
            CompressionKind::Gzip => Some("gz"),
            CompressionKind::Zstd => Some("zst"),
            CompressionKind::Lz4 => Some("lz4"),
            CompressionKind::Bzip2 => Some("bz2"),
        }
    }

    /// Recognise a codec from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "gz" => Some(CompressionKind::Gzip),
            "zst" => Some(CompressionKind::Zstd),
            "lz4" => Some(CompressionKind::Lz4),
            "bz2" => Some(CompressionKind::Bzip2),
            _ => None,
        }
    }
}

impl FromStr for CompressionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(CompressionKind::None),
            "gzip" => Ok(CompressionKind::Gzip),
            "zstd" => Ok(CompressionKind::Zstd),
            "lz4" => Ok(CompressionKind::Lz4),
            "bzip2" => Ok(CompressionKind::Bzip2),
            _ => Err(format!("unknown compression: {s}")),
        }
    }
}

/// Encryption applied to files and wire messages.
///
/// The numeric discriminants are the stable wire bit values. File encryption
/// is single-pass AES-256 in counter mode; the CBC selector exists for wire
/// compatibility and is rejected by the file codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionKind {
    /// No encryption
    #[default]
    None = 0,
    /// AES-256 in CBC mode (wire selector only)
    Aes256Cbc = 1,
    /// AES-256 in CTR mode
    Aes256Ctr = 2,
}

impl EncryptionKind {
    /// File extension appended by the encryptor, without the dot.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            EncryptionKind::None => None,
            EncryptionKind::Aes256Cbc | EncryptionKind::Aes256Ctr => Some("aes"),
        }
    }
}

impl FromStr for EncryptionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(EncryptionKind::None),
            "aes-256-cbc" => Ok(EncryptionKind::Aes256Cbc),
            "aes" | "aes-256-ctr" => Ok(EncryptionKind::Aes256Ctr),
            _ => Err(format!("unknown encryption: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsn_display_roundtrip() {
        let lsn = Lsn(0x1_016B_3730);
        let s = lsn.to_string();
        assert_eq!(s, "1/16B3730");
        assert_eq!(s.parse::<Lsn>().unwrap(), lsn);
    }

    #[test]
    fn test_lsn_ordering_matches_position() {
        assert!(Lsn(0x1_0000_0000) > Lsn(0xFFFF_FFFF));
        assert!(!Lsn::INVALID.is_valid());
    }

    #[test]
    fn test_compression_extension_roundtrip() {
        for kind in [
            CompressionKind::Gzip,
            CompressionKind::Zstd,
            CompressionKind::Lz4,
            CompressionKind::Bzip2,
        ] {
            let ext = kind.extension().unwrap();
            assert_eq!(CompressionKind::from_extension(ext), Some(kind));
        }
        assert_eq!(CompressionKind::None.extension(), None);
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("zstd".parse::<CompressionKind>().unwrap(), CompressionKind::Zstd);
        assert_eq!(
            "aes-256-ctr".parse::<EncryptionKind>().unwrap(),
            EncryptionKind::Aes256Ctr
        );
        assert!("brotli".parse::<CompressionKind>().is_err());
    }
}
