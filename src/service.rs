// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Didmarket Developers

//! # Marketplace Service
//!
//! The boundary consumed by the routing layer. Wires the identity registry,
//! proof engine, ledger gateway, asset registry and the external
//! collaborators; every dependency is injected, nothing is ambient.
//!
//! Sensitive operations follow one shape: resolve an authenticated session,
//! then act. Purchases additionally require a fresh DID-bound proof: the
//! service is the verifying party, enforcing the freshness window on the
//! proof's embedded timestamp. A stale or invalid proof is an authorization
//! denial, terminal for the calling flow.

use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};

use crate::external::{ContentStore, ExternalError, StreamBus};
use crate::identity::{AuthenticatedWallet, IdentityError, IdentityRegistry, WalletSession};
use crate::ledger::{GatewayError, LedgerGateway, WithdrawOutcome};
use crate::market::{AssetContent, AssetRegistry, ListingSpec, MarketError};
use crate::proof::{Proof, ProofEngine, ProofError};
use crate::vault::VaultError;

/// Errors surfaced across the service boundary.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Proof failed verification or its freshness window; terminal denial
    #[error("Invalid proof")]
    InvalidProof,

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Market(#[from] MarketError),

    #[error(transparent)]
    External(#[from] ExternalError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Payload for a new asset.
#[derive(Debug, Clone)]
pub enum AssetPayload {
    /// Raw bytes to store through the content store
    Static { data: Vec<u8> },
    /// An existing stream to list
    Stream { stream_id: String },
}

/// Input for asset creation across the boundary.
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub name: String,
    pub description: String,
    pub price: U256,
    pub payload: AssetPayload,
}

/// Result of a confirmed asset creation.
#[derive(Debug, Clone, Copy)]
pub struct CreatedAsset {
    pub asset_id: u64,
    pub tx_hash: B256,
}

/// Build the canonical `address:context:unixTimestamp` proof message.
pub fn proof_message(address: Address, context: &str) -> String {
    format!("{address}:{context}:{}", chrono::Utc::now().timestamp())
}

/// The exposed marketplace boundary.
pub struct MarketService {
    identity: Arc<IdentityRegistry>,
    proofs: Arc<ProofEngine>,
    gateway: Arc<LedgerGateway>,
    assets: Arc<AssetRegistry>,
    content: Arc<dyn ContentStore>,
    streams: Arc<dyn StreamBus>,
    proof_max_age_secs: i64,
}

impl MarketService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: Arc<IdentityRegistry>,
        proofs: Arc<ProofEngine>,
        gateway: Arc<LedgerGateway>,
        assets: Arc<AssetRegistry>,
        content: Arc<dyn ContentStore>,
        streams: Arc<dyn StreamBus>,
        proof_max_age_secs: i64,
    ) -> Self {
        Self {
            identity,
            proofs,
            gateway,
            assets,
            content,
            streams,
            proof_max_age_secs,
        }
    }

    // ========== Wallet Connection and Authentication ==========

    /// Connect a wallet and return its challenge nonce.
    pub async fn connect(&self, address: &str) -> Result<String, ServiceError> {
        Ok(self.identity.connect(address).await?)
    }

    /// Authenticate a wallet with its challenge signature.
    pub async fn authenticate(
        &self,
        address: &str,
        signature: &str,
    ) -> Result<AuthenticatedWallet, ServiceError> {
        Ok(self.identity.authenticate(address, signature).await?)
    }

    /// Issue a fresh DID-bound proof for an authenticated wallet.
    pub async fn issue_proof(
        &self,
        address: &str,
        context: &str,
    ) -> Result<Proof, ServiceError> {
        let (session, did) = self.authenticated_did(address).await?;
        let message = proof_message(session.address, context);
        Ok(self.proofs.generate(&did, &message).await?)
    }

    // ========== Asset Lifecycle ==========

    /// Store the payload (for static assets), create the asset on the
    /// ledger, and record its listing.
    pub async fn create_asset(
        &self,
        owner: &str,
        asset: NewAsset,
    ) -> Result<CreatedAsset, ServiceError> {
        let session = self.identity.require_authenticated(owner).await?;

        let content = match asset.payload {
            AssetPayload::Static { data } => {
                let content_ref = self.content.store(data).await?;
                AssetContent::Static { content_ref }
            }
            AssetPayload::Stream { stream_id } => AssetContent::Stream { stream_id },
        };

        let spec = ListingSpec {
            name: asset.name,
            description: asset.description,
            price: asset.price,
            content,
        };
        let (asset_id, tx_hash) = self.assets.add(session.address, spec).await?;
        Ok(CreatedAsset { asset_id, tx_hash })
    }

    /// Purchase an asset; `proof` must verify against the buyer's DID and
    /// fall inside the freshness window.
    pub async fn purchase(
        &self,
        asset_id: u64,
        buyer: &str,
        proof: &Proof,
    ) -> Result<B256, ServiceError> {
        let (session, did) = self.authenticated_did(buyer).await?;

        let public_key = self.proofs.public_key(&did).await?;
        if !ProofEngine::verify_fresh(proof, &public_key, self.proof_max_age_secs) {
            tracing::warn!(asset_id, buyer = %session.address, "purchase proof rejected");
            return Err(ServiceError::InvalidProof);
        }

        let proof_bytes = serde_json::to_vec(proof)?;
        Ok(self
            .assets
            .purchase(asset_id, session.address, &proof_bytes)
            .await?)
    }

    /// Resolve the content reference or stream id behind an owned asset.
    pub async fn access_asset(
        &self,
        asset_id: u64,
        requester: &str,
    ) -> Result<AssetContent, ServiceError> {
        let session = self.identity.require_authenticated(requester).await?;
        Ok(self.assets.access(asset_id, session.address).await?)
    }

    /// Delete an owned asset, then release its stored content.
    pub async fn delete_asset(
        &self,
        asset_id: u64,
        requester: &str,
    ) -> Result<B256, ServiceError> {
        let session = self.identity.require_authenticated(requester).await?;
        let (removed, tx_hash) = self.assets.delete(asset_id, session.address).await?;

        if let AssetContent::Static { content_ref } = &removed.content {
            // The chain no longer references the blob; a failed release is
            // recoverable garbage, not a failed delete.
            if let Err(error) = self.content.delete(content_ref).await {
                tracing::warn!(%error, content_ref, "failed to release stored content");
            }
        }
        Ok(tx_hash)
    }

    /// Withdraw accumulated sale revenue.
    pub async fn withdraw_revenue(
        &self,
        address: &str,
    ) -> Result<WithdrawOutcome, ServiceError> {
        let session = self.identity.require_authenticated(address).await?;
        Ok(self.gateway.withdraw_revenue(session.address).await?)
    }

    // ========== Streams ==========

    /// Subscribe to a stream with a freshly generated DID-bound proof.
    pub async fn subscribe_stream(
        &self,
        stream_id: &str,
        address: &str,
    ) -> Result<String, ServiceError> {
        let (session, did) = self.authenticated_did(address).await?;
        let proof = self
            .fresh_proof(&did, session.address, &format!("subscribe:{stream_id}"))
            .await?;
        Ok(self.streams.subscribe(stream_id, &did, &proof).await?)
    }

    /// Publish a payload to a stream with a freshly generated proof.
    pub async fn publish_stream(
        &self,
        stream_id: &str,
        address: &str,
        payload: Vec<u8>,
    ) -> Result<(), ServiceError> {
        let (session, did) = self.authenticated_did(address).await?;
        let proof = self
            .fresh_proof(&did, session.address, &format!("publish:{stream_id}"))
            .await?;
        Ok(self
            .streams
            .publish(stream_id, payload, &did, &proof)
            .await?)
    }

    // ========== Internals ==========

    async fn authenticated_did(
        &self,
        address: &str,
    ) -> Result<(WalletSession, String), ServiceError> {
        let session = self.identity.require_authenticated(address).await?;
        let did = session
            .bound_did
            .clone()
            .ok_or(IdentityError::NotAuthenticated(session.address))?;
        Ok((session, did))
    }

    async fn fresh_proof(
        &self,
        did: &str,
        address: Address,
        context: &str,
    ) -> Result<Vec<u8>, ServiceError> {
        let message = proof_message(address, context);
        let proof = self.proofs.generate(did, &message).await?;
        Ok(serde_json::to_vec(&proof)?)
    }
}
