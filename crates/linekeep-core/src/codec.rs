//! Password-based encoding of file content.
//!
//! Encrypted files carry a fixed-size header followed by the XChaCha20-Poly1305
//! ciphertext. The header embeds the KDF parameters, salt and nonce, so a file
//! can be decoded with nothing but the password.

use crate::crypto::{self, KdfParams, NONCE_LEN, SALT_LEN};
use crate::error::{Result, StoreError};
use std::path::Path;
use tracing::debug;
use zeroize::Zeroizing;

pub const CIPHER_MAGIC: &[u8] = b"LKENC01\0";
pub const CIPHER_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 80;

/// Suffix marking a file as encrypted.
pub const DEFAULT_ENCRYPTED_SUFFIX: &str = ".jenc";

/// A password held in memory that is wiped on drop.
#[derive(Clone)]
pub struct Password(Zeroizing<Vec<u8>>);

impl Password {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    pub fn from_zeroizing(secret: Zeroizing<String>) -> Self {
        Self::new(secret.as_bytes().to_vec())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherHeader {
    pub version: u32,
    pub kdf: KdfParams,
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
}

impl CipherHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[..8].copy_from_slice(CIPHER_MAGIC);
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.kdf.time_cost.to_le_bytes());
        buf[16..20].copy_from_slice(&self.kdf.memory_cost.to_le_bytes());
        buf[20..24].copy_from_slice(&self.kdf.parallelism.to_le_bytes());
        buf[24..56].copy_from_slice(&self.salt);
        buf[56..80].copy_from_slice(&self.nonce);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(StoreError::Encryption("ciphertext too short".into()));
        }
        if &buf[..8] != CIPHER_MAGIC {
            return Err(StoreError::Encryption("not an encrypted file".into()));
        }
        let version = read_u32(buf, 8);
        if version != CIPHER_VERSION {
            return Err(StoreError::Encryption(format!(
                "unsupported cipher version {version}"
            )));
        }
        let kdf = KdfParams {
            time_cost: read_u32(buf, 12),
            memory_cost: read_u32(buf, 16),
            parallelism: read_u32(buf, 20),
        };
        kdf.validate()
            .map_err(|e| StoreError::Encryption(format!("bad key parameters: {e}")))?;
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&buf[24..56]);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&buf[56..80]);
        Ok(Self {
            version,
            kdf,
            salt,
            nonce,
        })
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(word)
}

/// Encodes and decodes file content for encryption-eligible paths.
#[derive(Debug, Clone)]
pub struct CryptoCodec {
    available: bool,
    suffix: String,
    kdf: KdfParams,
}

impl Default for CryptoCodec {
    fn default() -> Self {
        Self::new(true, DEFAULT_ENCRYPTED_SUFFIX, KdfParams::default())
    }
}

impl CryptoCodec {
    pub fn new(available: bool, suffix: &str, kdf: KdfParams) -> Self {
        Self {
            available,
            suffix: suffix.to_string(),
            kdf,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn is_eligible(&self, path: &Path) -> bool {
        if !self.available {
            return false;
        }
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|name| name.ends_with(&self.suffix))
            .unwrap_or(false)
    }

    /// Encrypts `content` under a fresh salt and nonce.
    pub fn encode(&self, content: &str, password: &Password) -> Result<Vec<u8>> {
        if !self.available {
            return Err(StoreError::Encryption("encryption unavailable".into()));
        }
        if password.is_empty() {
            return Err(StoreError::Encryption("empty password".into()));
        }
        let header = CipherHeader {
            version: CIPHER_VERSION,
            kdf: self.kdf,
            salt: crypto::generate_salt(),
            nonce: crypto::generate_nonce(),
        };
        let key = crypto::derive_key(password.expose(), &header.salt, &header.kdf)
            .map_err(|e| StoreError::Encryption(e.to_string()))?;
        let ciphertext = crypto::encrypt(&key, &header.nonce, content.as_bytes())
            .map_err(|e| StoreError::Encryption(e.to_string()))?;
        let mut out = header.to_bytes();
        out.extend_from_slice(&ciphertext);
        debug!(plain = content.len(), encoded = out.len(), "content encoded");
        Ok(out)
    }

    pub fn decode(&self, bytes: &[u8], password: &Password) -> Result<String> {
        if password.is_empty() {
            return Err(StoreError::Encryption("empty password".into()));
        }
        let header = CipherHeader::from_bytes(bytes)?;
        let key = crypto::derive_key(password.expose(), &header.salt, &header.kdf)
            .map_err(|e| StoreError::Encryption(e.to_string()))?;
        let plaintext = Zeroizing::new(
            crypto::decrypt(&key, &header.nonce, &bytes[HEADER_SIZE..])
                .map_err(|_| StoreError::Encryption("wrong password or corrupted file".into()))?,
        );
        String::from_utf8(plaintext.to_vec())
            .map_err(|_| StoreError::Encryption("decrypted content is not utf-8".into()))
    }
}
