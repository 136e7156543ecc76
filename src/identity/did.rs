// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Didmarket Developers

//! DID generation and derivation (`did:key` method).
//!
//! A DID is a self-certifying identifier derived one-way from freshly
//! generated Ed25519 key material: the multicodec-prefixed public key,
//! base58btc-encoded with the `z` multibase prefix.

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;

/// Multicodec prefix for an Ed25519 public key.
const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// Generate a fresh Ed25519 keypair for a new DID.
pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Derive the `did:key` identifier for an Ed25519 public key.
pub fn derive_did(public: &VerifyingKey) -> String {
    let mut raw = Vec::with_capacity(ED25519_MULTICODEC.len() + 32);
    raw.extend_from_slice(&ED25519_MULTICODEC);
    raw.extend_from_slice(public.as_bytes());
    format!("did:key:z{}", bs58::encode(raw).into_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_did_has_key_method_shape() {
        let key = generate_keypair();
        let did = derive_did(&key.verifying_key());
        assert!(did.starts_with("did:key:z"));
    }

    #[test]
    fn derivation_is_deterministic() {
        let key = generate_keypair();
        let a = derive_did(&key.verifying_key());
        let b = derive_did(&key.verifying_key());
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_keys_get_distinct_dids() {
        let a = derive_did(&generate_keypair().verifying_key());
        let b = derive_did(&generate_keypair().verifying_key());
        assert_ne!(a, b);
    }

    #[test]
    fn did_encodes_the_public_key() {
        let key = generate_keypair();
        let did = derive_did(&key.verifying_key());

        let encoded = did.strip_prefix("did:key:z").unwrap();
        let raw = bs58::decode(encoded).into_vec().unwrap();
        assert_eq!(&raw[..2], &ED25519_MULTICODEC);
        assert_eq!(&raw[2..], key.verifying_key().as_bytes());
    }
}
