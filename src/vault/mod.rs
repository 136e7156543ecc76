// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Didmarket Developers

//! # Encrypted Key Vault
//!
//! Encrypted-at-rest storage mapping a DID to its private key material.
//!
//! ## Security Model
//!
//! - The vault key is derived from a master secret via PBKDF2-HMAC-SHA256
//!   with a fixed work factor and a salt stored alongside the ciphertexts
//! - Key material is sealed with AES-256-GCM under a fresh random nonce
//!   per entry; tampering with the stored file fails decryption
//! - The full map is persisted on every write (atomic temp-file + rename),
//!   and reloaded at startup, so entries survive process restarts
//! - Decrypted key material is zeroized when dropped
//!
//! All read-modify-write sections are serialized by a single exclusive
//! lock per vault instance; concurrent writes never interleave.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::Mutex;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// On-disk format version, bumped on incompatible layout changes.
const VAULT_VERSION: u32 = 1;

/// PBKDF2 work factor for the master key derivation.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Error type for vault operations.
#[derive(Debug)]
pub enum VaultError {
    /// No key material stored for the requested DID
    NoKeyForDid(String),
    /// Cipher failure while sealing key material
    Encryption(String),
    /// Cipher failure while opening key material (wrong master secret or
    /// tampered ciphertext)
    Decryption(String),
    /// I/O error during persistence
    Io(io::Error),
    /// JSON serialization/deserialization error
    Json(serde_json::Error),
}

impl std::fmt::Display for VaultError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultError::NoKeyForDid(did) => write!(f, "No key material for DID: {did}"),
            VaultError::Encryption(msg) => write!(f, "Encryption failed: {msg}"),
            VaultError::Decryption(msg) => write!(f, "Decryption failed: {msg}"),
            VaultError::Io(e) => write!(f, "I/O error: {e}"),
            VaultError::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for VaultError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VaultError::Io(e) => Some(e),
            VaultError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for VaultError {
    fn from(e: io::Error) -> Self {
        VaultError::Io(e)
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::Json(e)
    }
}

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// One sealed entry: AES-GCM nonce plus ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncryptedKeyEntry {
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

/// Persisted vault file: the KDF salt and the full DID -> ciphertext map.
#[derive(Debug, Serialize, Deserialize)]
struct VaultFile {
    version: u32,
    salt: Vec<u8>,
    keys: BTreeMap<String, EncryptedKeyEntry>,
}

/// Decrypted key material, zeroized when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: Vec<u8>,
}

impl KeyMaterial {
    /// Raw key bytes. Handle with care and let the wrapper drop early.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Encrypted store for DID private key material.
pub struct KeyVault {
    path: PathBuf,
    cipher: Aes256Gcm,
    salt: Vec<u8>,
    entries: Mutex<BTreeMap<String, EncryptedKeyEntry>>,
}

impl KeyVault {
    /// Open a vault at `path`, reloading persisted entries if present.
    ///
    /// A missing file starts an empty vault with a freshly generated salt.
    /// The encryption key is derived once here; a wrong master secret shows
    /// up later as `Decryption` errors on `retrieve`.
    pub fn open(path: impl AsRef<Path>, master_secret: &str) -> VaultResult<Self> {
        let path = path.as_ref().to_path_buf();

        let (salt, keys) = match std::fs::read(&path) {
            Ok(bytes) => {
                let file: VaultFile = serde_json::from_slice(&bytes)?;
                tracing::info!(path = %path.display(), entries = file.keys.len(), "vault loaded");
                (file.salt, file.keys)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let mut salt = vec![0u8; SALT_LEN];
                OsRng.fill_bytes(&mut salt);
                tracing::info!(path = %path.display(), "initialized empty vault");
                (salt, BTreeMap::new())
            }
            Err(e) => return Err(e.into()),
        };

        let cipher = derive_cipher(master_secret, &salt)?;

        Ok(Self {
            path,
            cipher,
            salt,
            entries: Mutex::new(keys),
        })
    }

    /// Seal `key_material` under `did` and persist the full map.
    ///
    /// A second `store` for the same DID replaces the entry; callers that
    /// need create-once semantics check `contains` first.
    pub async fn store(&self, did: &str, key_material: &[u8]) -> VaultResult<()> {
        let mut entries = self.entries.lock().await;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), key_material)
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        entries.insert(
            did.to_string(),
            EncryptedKeyEntry {
                nonce: nonce.to_vec(),
                ciphertext,
            },
        );

        self.persist(&entries)?;
        tracing::debug!(did, "key material stored");
        Ok(())
    }

    /// Open the entry for `did` and return the plaintext key material.
    pub async fn retrieve(&self, did: &str) -> VaultResult<KeyMaterial> {
        let entries = self.entries.lock().await;

        let entry = entries
            .get(did)
            .ok_or_else(|| VaultError::NoKeyForDid(did.to_string()))?;

        let bytes = self
            .cipher
            .decrypt(Nonce::from_slice(&entry.nonce), entry.ciphertext.as_slice())
            .map_err(|e| VaultError::Decryption(e.to_string()))?;

        Ok(KeyMaterial { bytes })
    }

    /// Whether an entry exists for `did`, without decrypting it.
    pub async fn contains(&self, did: &str) -> bool {
        self.entries.lock().await.contains_key(did)
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the vault holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Write the full map to disk, all-or-nothing (temp file + rename).
    fn persist(&self, entries: &BTreeMap<String, EncryptedKeyEntry>) -> VaultResult<()> {
        let file = VaultFile {
            version: VAULT_VERSION,
            salt: self.salt.clone(),
            keys: entries.clone(),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp = self.path.with_extension("tmp");
        std::fs::write(&temp, serde_json::to_vec_pretty(&file)?)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

/// Derive the AES-256-GCM cipher from the master secret and stored salt.
fn derive_cipher(master_secret: &str, salt: &[u8]) -> VaultResult<Aes256Gcm> {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(master_secret.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| VaultError::Encryption(e.to_string()))?;
    key.zeroize();
    Ok(cipher)
}
