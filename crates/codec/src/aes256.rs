//! AES-256-CTR encryption codec.
//!
//! The 256-bit key is derived once from a master password with
//! PBKDF2-HMAC-SHA256. Encryption is single-pass counter mode: a random
//! 16-byte IV is generated per stream and prepended to the ciphertext, and
//! its presence is mandatory for decryption. No random access is required
//! in either direction.

use crate::traits::{Codec, CodecError, DrainBuf, StepResult};
use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes256;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use std::path::Path;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// IV length in bytes, prepended to every encrypted stream.
pub const IV_LEN: usize = 16;

/// PBKDF2 iteration count for master-key stretching.
const PBKDF2_ROUNDS: u32 = 100_000;

/// Salt namespace for the derivation. Fixed: the master password file is the
/// secret, the salt only separates this use from other PBKDF2 users.
const PBKDF2_SALT: &[u8] = b"pgvault-master-key-v1";

/// The stretched master key.
#[derive(Clone)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    /// Derive from a master password.
    pub fn derive(password: &[u8]) -> Self {
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(password, PBKDF2_SALT, PBKDF2_ROUNDS, &mut key);
        MasterKey(key)
    }

    /// Load the base64 master password file and derive the key.
    pub fn load(path: &Path) -> Result<Self, CodecError> {
        let text = std::fs::read_to_string(path).map_err(|_| CodecError::KeyMissing)?;
        let password = base64::engine::general_purpose::STANDARD
            .decode(text.trim())
            .map_err(|e| CodecError::Init(format!("master key file is not base64: {e}")))?;
        Ok(Self::derive(&password))
    }

    fn bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        f.write_str("MasterKey(..)")
    }
}

pub struct Aes256CtrEncryptor {
    cipher: Aes256Ctr,
    drain: DrainBuf,
    iv_emitted: bool,
    iv: [u8; IV_LEN],
    last_seen: bool,
}

impl Aes256CtrEncryptor {
    pub fn new(key: &MasterKey) -> Self {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        Aes256CtrEncryptor {
            cipher: Aes256Ctr::new(key.bytes().into(), &iv.into()),
            drain: DrainBuf::default(),
            iv_emitted: false,
            iv,
            last_seen: false,
        }
    }
}

impl Codec for Aes256CtrEncryptor {
    fn prepare(&mut self, input: &[u8], last_chunk: bool) -> Result<(), CodecError> {
        if self.last_seen {
            return Err(CodecError::Input("stream already finished".to_string()));
        }
        if !self.iv_emitted {
            let iv = self.iv;
            self.drain.push(&iv);
            self.iv_emitted = true;
        }
        let mut block = input.to_vec();
        self.cipher.apply_keystream(&mut block);
        self.drain.push(&block);
        if last_chunk {
            self.last_seen = true;
        }
        Ok(())
    }

    fn step(&mut self, out: &mut [u8]) -> Result<StepResult, CodecError> {
        let written = self.drain.drain_into(out);
        Ok(StepResult {
            written,
            finished: self.last_seen && self.drain.is_empty(),
        })
    }

    fn close(&mut self) -> Result<(), CodecError> {
        Ok(())
    }
}

pub struct Aes256CtrDecryptor {
    key: MasterKey,
    cipher: Option<Aes256Ctr>,
    iv_buf: Vec<u8>,
    drain: DrainBuf,
    last_seen: bool,
}

impl Aes256CtrDecryptor {
    pub fn new(key: &MasterKey) -> Self {
        Aes256CtrDecryptor {
            key: key.clone(),
            cipher: None,
            iv_buf: Vec::with_capacity(IV_LEN),
            drain: DrainBuf::default(),
            last_seen: false,
        }
    }
}

impl Codec for Aes256CtrDecryptor {
    fn prepare(&mut self, input: &[u8], last_chunk: bool) -> Result<(), CodecError> {
        if self.last_seen {
            return Err(CodecError::Input("stream already finished".to_string()));
        }
        let mut rest = input;
        if self.cipher.is_none() {
            let need = IV_LEN - self.iv_buf.len();
            let take = need.min(rest.len());
            self.iv_buf.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.iv_buf.len() == IV_LEN {
                let mut iv = [0u8; IV_LEN];
                iv.copy_from_slice(&self.iv_buf);
                self.cipher = Some(Aes256Ctr::new(self.key.bytes().into(), &iv.into()));
            } else if last_chunk {
                return Err(CodecError::Corrupt(
                    "encrypted stream shorter than its IV".to_string(),
                ));
            }
        }
        if let Some(cipher) = self.cipher.as_mut() {
            if !rest.is_empty() {
                let mut block = rest.to_vec();
                cipher.apply_keystream(&mut block);
                self.drain.push(&block);
            }
        }
        if last_chunk {
            self.last_seen = true;
        }
        Ok(())
    }

    fn step(&mut self, out: &mut [u8]) -> Result<StepResult, CodecError> {
        let written = self.drain.drain_into(out);
        Ok(StepResult {
            written,
            finished: self.last_seen && self.drain.is_empty(),
        })
    }

    fn close(&mut self) -> Result<(), CodecError> {
        self.cipher = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_to_vec;
    use std::io::Write;

    #[test]
    fn test_iv_prepended_and_unique() {
        let key = MasterKey::derive(b"pw");
        let mut e1 = Aes256CtrEncryptor::new(&key);
        let mut e2 = Aes256CtrEncryptor::new(&key);
        let c1 = run_to_vec(&mut e1, b"same input").unwrap();
        let c2 = run_to_vec(&mut e2, b"same input").unwrap();
        assert_ne!(&c1[..IV_LEN], &c2[..IV_LEN]);
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_decrypt_split_iv_across_windows() {
        let key = MasterKey::derive(b"pw");
        let mut enc = Aes256CtrEncryptor::new(&key);
        let ciphertext = run_to_vec(&mut enc, b"split windows payload").unwrap();

        let mut dec = Aes256CtrDecryptor::new(&key);
        let mut out = Vec::new();
        let mut scratch = [0u8; 256];
        // feed 5 bytes at a time so the IV spans several windows
        let chunks: Vec<&[u8]> = ciphertext.chunks(5).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            dec.prepare(chunk, i == chunks.len() - 1).unwrap();
            loop {
                let step = dec.step(&mut scratch).unwrap();
                out.extend_from_slice(&scratch[..step.written]);
                if step.written == 0 || step.finished {
                    break;
                }
            }
        }
        assert_eq!(out, b"split windows payload");
    }

    #[test]
    fn test_truncated_iv_is_corrupt() {
        let key = MasterKey::derive(b"pw");
        let mut dec = Aes256CtrDecryptor::new(&key);
        let err = dec.prepare(&[1, 2, 3], true).unwrap_err();
        assert!(matches!(err, CodecError::Corrupt(_)));
    }

    #[test]
    fn test_wrong_key_garbles() {
        let mut enc = Aes256CtrEncryptor::new(&MasterKey::derive(b"right"));
        let ciphertext = run_to_vec(&mut enc, b"payload").unwrap();
        let mut dec = Aes256CtrDecryptor::new(&MasterKey::derive(b"wrong"));
        let out = run_to_vec(&mut dec, &ciphertext).unwrap();
        assert_ne!(out, b"payload");
    }

    #[test]
    fn test_master_key_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.key");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "{}",
            base64::engine::general_purpose::STANDARD.encode(b"file password")
        )
        .unwrap();
        drop(f);
        let from_file = MasterKey::load(&path).unwrap();
        let derived = MasterKey::derive(b"file password");
        assert_eq!(from_file.bytes(), derived.bytes());
    }

    #[test]
    fn test_missing_key_file() {
        let err = MasterKey::load(Path::new("/nonexistent/master.key")).unwrap_err();
        assert!(matches!(err, CodecError::KeyMissing));
    }
}
