// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Didmarket Developers

//! # Identity Registry
//!
//! Nonce-based wallet authentication state machine.
//!
//! ## Auth Flow
//!
//! 1. `connect(address)` issues a single-use random nonce
//! 2. The wallet signs the canonical challenge string embedding that nonce
//!    with its own key (EIP-191 `personal_sign`)
//! 3. `authenticate(address, signature)` recovers the signer address from
//!    the signature; a mismatch fails and leaves the nonce untouched so the
//!    caller can retry against the same challenge
//! 4. On success the session is marked authenticated, a DID is created and
//!    bound on first authentication, and the nonce is rotated so a captured
//!    signature cannot be replayed
//!
//! The check-then-rotate sequence runs under the sessions lock: two
//! concurrent authentications against the same nonce cannot both succeed.

pub mod did;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, Signature};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::Mutex;

use crate::vault::{KeyVault, VaultError};

/// Bytes of entropy in an authentication nonce (hex-encoded on the wire).
const NONCE_LEN: usize = 32;

/// Canonical challenge string a wallet signs to authenticate.
pub fn challenge_message(nonce: &str) -> String {
    format!("Authenticate to Didmarket with nonce: {nonce}")
}

/// Errors from wallet connection and authentication.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Invalid wallet address: {0}")]
    InvalidAddress(String),

    #[error("Wallet {0} is not connected")]
    NotConnected(Address),

    #[error("Wallet {0} is not authenticated")]
    NotAuthenticated(Address),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

/// Per-wallet authentication session.
#[derive(Debug, Clone)]
pub struct WalletSession {
    /// The connected wallet address
    pub address: Address,
    /// Current single-use challenge nonce
    pub nonce: String,
    /// Whether the current session passed the signature check
    pub authenticated: bool,
    /// DID bound on first successful authentication, immutable thereafter
    pub bound_did: Option<String>,
}

/// Successful authentication result.
#[derive(Debug, Clone)]
pub struct AuthenticatedWallet {
    /// The DID bound to the wallet
    pub did: String,
    /// Fresh nonce for the next authentication
    pub new_nonce: String,
}

/// Wallet authentication state machine backed by the key vault.
pub struct IdentityRegistry {
    vault: Arc<KeyVault>,
    sessions: Mutex<HashMap<Address, WalletSession>>,
}

impl IdentityRegistry {
    pub fn new(vault: Arc<KeyVault>) -> Self {
        Self {
            vault,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Connect a wallet and issue its challenge nonce.
    ///
    /// Reconnecting resets the authenticated flag and issues a fresh nonce;
    /// a DID bound by an earlier session stays bound.
    pub async fn connect(&self, address: &str) -> Result<String, IdentityError> {
        let address = parse_address(address)?;
        let nonce = fresh_nonce();

        let mut sessions = self.sessions.lock().await;
        let session = sessions.entry(address).or_insert_with(|| WalletSession {
            address,
            nonce: String::new(),
            authenticated: false,
            bound_did: None,
        });
        session.nonce = nonce.clone();
        session.authenticated = false;

        tracing::info!(%address, "wallet connected");
        Ok(nonce)
    }

    /// Verify a challenge signature and mark the session authenticated.
    ///
    /// `signature` is the hex-encoded 65-byte EIP-191 `personal_sign`
    /// signature over [`challenge_message`] for the session's current nonce.
    /// On failure the nonce is left unchanged (retry-safe); on success it is
    /// rotated so the consumed signature cannot be replayed.
    pub async fn authenticate(
        &self,
        address: &str,
        signature: &str,
    ) -> Result<AuthenticatedWallet, IdentityError> {
        let address = parse_address(address)?;

        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&address)
            .ok_or(IdentityError::NotConnected(address))?;

        let message = challenge_message(&session.nonce);
        let recovered = match recover_signer(&message, signature) {
            Ok(recovered) => recovered,
            Err(reason) => {
                session.authenticated = false;
                return Err(IdentityError::AuthenticationFailed(reason));
            }
        };

        if recovered != address {
            session.authenticated = false;
            tracing::warn!(%address, %recovered, "challenge signature recovered to a different address");
            return Err(IdentityError::AuthenticationFailed(
                "recovered signer does not match wallet address".to_string(),
            ));
        }

        session.authenticated = true;

        let did = match session.bound_did.clone() {
            Some(did) => did,
            None => {
                let signing = did::generate_keypair();
                let did = did::derive_did(&signing.verifying_key());
                self.vault.store(&did, signing.as_bytes()).await?;
                session.bound_did = Some(did.clone());
                tracing::info!(%address, did, "DID created and bound");
                did
            }
        };

        session.nonce = fresh_nonce();
        tracing::info!(%address, "wallet authenticated");

        Ok(AuthenticatedWallet {
            did,
            new_nonce: session.nonce.clone(),
        })
    }

    /// Snapshot of the session for `address`, if connected.
    pub async fn session(&self, address: Address) -> Option<WalletSession> {
        self.sessions.lock().await.get(&address).cloned()
    }

    /// Resolve an authenticated session or fail the DID-bound operation.
    pub async fn require_authenticated(
        &self,
        address: &str,
    ) -> Result<WalletSession, IdentityError> {
        let address = parse_address(address)?;
        let sessions = self.sessions.lock().await;
        match sessions.get(&address) {
            None => Err(IdentityError::NotConnected(address)),
            Some(session) if !session.authenticated => {
                Err(IdentityError::NotAuthenticated(address))
            }
            Some(session) => Ok(session.clone()),
        }
    }
}

/// Parse and validate a wallet address.
pub fn parse_address(address: &str) -> Result<Address, IdentityError> {
    Address::from_str(address).map_err(|e| IdentityError::InvalidAddress(format!("{address}: {e}")))
}

/// Generate a fresh hex-encoded challenge nonce.
fn fresh_nonce() -> String {
    let mut bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut bytes);
    alloy::hex::encode(bytes)
}

/// Recover the EIP-191 signer address from a hex-encoded signature.
fn recover_signer(message: &str, signature: &str) -> Result<Address, String> {
    let bytes = alloy::hex::decode(signature.trim_start_matches("0x"))
        .map_err(|e| format!("malformed signature: {e}"))?;
    let signature =
        Signature::from_raw(&bytes).map_err(|e| format!("malformed signature: {e}"))?;
    signature
        .recover_address_from_msg(message)
        .map_err(|e| format!("signature recovery failed: {e}"))
}
