// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Didmarket Developers

//! # Proof Engine
//!
//! Proof-of-possession signatures authorizing per-action requests.
//!
//! A proof is an ECDSA/SHA-256 signature over an application-chosen message,
//! produced with a secp256k1 key derived from the DID's native Ed25519 key
//! material by hashing the raw seed into a scalar. The derivation is
//! deterministic so the proof key is stable per DID, but it narrows the
//! original key's security margin; see DESIGN.md.
//!
//! Verification is a pure boolean check: a failed proof is an authorization
//! denial, never an exceptional condition. Freshness is the verifier's job:
//! callers embed `address:context:unixTimestamp` messages and the verifying
//! party bounds the timestamp with [`ProofEngine::verify_fresh`].

use std::sync::Arc;

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::vault::{KeyVault, VaultError};

/// Tolerated forward clock skew when checking proof freshness, in seconds.
const CLOCK_SKEW_SECS: i64 = 60;

/// Errors while producing a proof. Verification never errors.
#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    #[error("Proof key derivation failed: {0}")]
    KeyDerivation(String),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

/// A proof-of-possession signature over `message`.
///
/// `r` and `s` are hex-encoded signature scalars. Proofs are ephemeral:
/// produced per call, consumed once by the verifier, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub r: String,
    pub s: String,
    pub message: String,
}

impl Proof {
    /// The unix timestamp embedded as the final `:`-separated message field.
    pub fn timestamp(&self) -> Option<i64> {
        self.message.rsplit(':').next()?.parse().ok()
    }
}

/// Generates and verifies DID-bound proofs using keys from the vault.
pub struct ProofEngine {
    vault: Arc<KeyVault>,
}

impl ProofEngine {
    pub fn new(vault: Arc<KeyVault>) -> Self {
        Self { vault }
    }

    /// Sign `message` with the proof key derived for `did`.
    pub async fn generate(&self, did: &str, message: &str) -> Result<Proof, ProofError> {
        let material = self.vault.retrieve(did).await?;
        let signing = proof_signing_key(material.as_bytes())?;

        let signature: EcdsaSignature = signing.sign(message.as_bytes());
        tracing::debug!(did, "proof generated");

        Ok(Proof {
            r: format!("0x{}", alloy::hex::encode(signature.r().to_bytes())),
            s: format!("0x{}", alloy::hex::encode(signature.s().to_bytes())),
            message: message.to_string(),
        })
    }

    /// Uncompressed SEC1 public key of the proof key for `did`.
    ///
    /// Verifiers hold this instead of vault access.
    pub async fn public_key(&self, did: &str) -> Result<Vec<u8>, ProofError> {
        let material = self.vault.retrieve(did).await?;
        let signing = proof_signing_key(material.as_bytes())?;
        Ok(signing
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec())
    }

    /// Verify a proof against a SEC1-encoded public key.
    ///
    /// Returns `false` for any malformed input; never raises.
    pub fn verify(proof: &Proof, public_key: &[u8]) -> bool {
        let Ok(verifying) = VerifyingKey::from_sec1_bytes(public_key) else {
            return false;
        };
        let Some(signature) = signature_from_proof(proof) else {
            return false;
        };
        verifying.verify(proof.message.as_bytes(), &signature).is_ok()
    }

    /// Verify a proof and bound the age of its embedded timestamp.
    ///
    /// A proof without a parseable trailing timestamp is never fresh.
    pub fn verify_fresh(proof: &Proof, public_key: &[u8], max_age_secs: i64) -> bool {
        let Some(issued_at) = proof.timestamp() else {
            return false;
        };
        let now = chrono::Utc::now().timestamp();
        if issued_at > now + CLOCK_SKEW_SECS || now - issued_at > max_age_secs {
            return false;
        }
        Self::verify(proof, public_key)
    }
}

/// Derive the secp256k1 proof signing key from native key material.
///
/// SHA-256 of the raw seed bytes, interpreted as a scalar on the target
/// curve. Rejects the (astronomically unlikely) out-of-range digests.
fn proof_signing_key(native: &[u8]) -> Result<SigningKey, ProofError> {
    let digest = Sha256::digest(native);
    SigningKey::from_slice(&digest).map_err(|e| ProofError::KeyDerivation(e.to_string()))
}

/// Rebuild the ECDSA signature from the hex scalar fields.
fn signature_from_proof(proof: &Proof) -> Option<EcdsaSignature> {
    let r = scalar_bytes(&proof.r)?;
    let s = scalar_bytes(&proof.s)?;
    EcdsaSignature::from_scalars(r, s).ok()
}

/// Decode a hex scalar into left-padded 32 bytes.
fn scalar_bytes(field: &str) -> Option<k256::FieldBytes> {
    let trimmed = field.trim_start_matches("0x");
    let padded = if trimmed.len() % 2 == 1 {
        format!("0{trimmed}")
    } else {
        trimmed.to_string()
    };
    let bytes = alloy::hex::decode(&padded).ok()?;
    if bytes.is_empty() || bytes.len() > 32 {
        return None;
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    Some(out.into())
}
