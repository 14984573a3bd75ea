//! Streaming content hashes.
//!
//! Every checksum the engine produces goes through [`Hasher`], which hides
//! the digest width behind one enum so manifests can record which algorithm
//! produced a given hex string.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read granularity for file hashing.
const HASH_BUF_SIZE: usize = 64 * 1024;

/// Supported checksum algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-224
    Sha224,
    /// SHA-256, the manifest default
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl HashAlgorithm {
    /// Upstream manifest name for this algorithm.
    pub fn manifest_name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha224 => "SHA224",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha384 => "SHA384",
            HashAlgorithm::Sha512 => "SHA512",
        }
    }

    /// Parse the upstream manifest name.
    pub fn from_manifest_name(name: &str) -> Option<Self> {
        match name {
            "SHA224" => Some(HashAlgorithm::Sha224),
            "SHA256" => Some(HashAlgorithm::Sha256),
            "SHA384" => Some(HashAlgorithm::Sha384),
            "SHA512" => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.manifest_name())
    }
}

enum Inner {
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

/// Incremental hasher over byte chunks.
pub struct Hasher {
    inner: Inner,
}

impl Hasher {
    /// Start a hash with the given algorithm.
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let inner = match algorithm {
            HashAlgorithm::Sha224 => Inner::Sha224(Sha224::new()),
            HashAlgorithm::Sha256 => Inner::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => Inner::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => Inner::Sha512(Sha512::new()),
        };
        Hasher { inner }
    }

    /// Feed a chunk.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            Inner::Sha224(h) => h.update(data),
            Inner::Sha256(h) => h.update(data),
            Inner::Sha384(h) => h.update(data),
            Inner::Sha512(h) => h.update(data),
        }
    }

    /// Finish and return the lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self.inner {
            Inner::Sha224(h) => hex::encode(h.finalize()),
            Inner::Sha256(h) => hex::encode(h.finalize()),
            Inner::Sha384(h) => hex::encode(h.finalize()),
            Inner::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Hash a whole byte slice.
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize_hex()
}

/// Stream a file through the hasher without loading it whole.
pub fn hash_file(algorithm: HashAlgorithm, path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Hasher::new(algorithm);
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize_hex())
}

/// HMAC-SHA256 of `data` under `key`, hex encoded.
pub fn hmac_sha256_hex(key: &[u8], data: &[u8]) -> String {
    // Hmac::new_from_slice accepts any key length
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            hash_bytes(HashAlgorithm::Sha256, b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_streaming_matches_oneshot() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let mut hasher = Hasher::new(HashAlgorithm::Sha512);
        for chunk in data.chunks(777) {
            hasher.update(chunk);
        }
        assert_eq!(hasher.finalize_hex(), hash_bytes(HashAlgorithm::Sha512, &data));
    }

    #[test]
    fn test_hash_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"abc").unwrap();
        drop(f);
        assert_eq!(
            hash_file(HashAlgorithm::Sha256, &path).unwrap(),
            hash_bytes(HashAlgorithm::Sha256, b"abc")
        );
    }

    #[test]
    fn test_manifest_name_roundtrip() {
        for alg in [
            HashAlgorithm::Sha224,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ] {
            assert_eq!(HashAlgorithm::from_manifest_name(alg.manifest_name()), Some(alg));
        }
        assert_eq!(HashAlgorithm::from_manifest_name("CRC32"), None);
    }

    #[test]
    fn test_hmac_differs_by_key() {
        let a = hmac_sha256_hex(b"key-a", b"payload");
        let b = hmac_sha256_hex(b"key-b", b"payload");
        assert_ne!(a, b);
    }
}
