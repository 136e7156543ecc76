// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Didmarket Developers

//! # Asset Registry
//!
//! Off-chain listing cache reconciled against the ledger's authoritative
//! ownership state.
//!
//! The registry never trusts itself on ownership: the `owner` field on a
//! listing is a display hint, and every access/delete/purchase decision is
//! gated by a fresh read-only ownership call against the chain. Mutating
//! flows are sequenced ledger-first: the listing is written only after the
//! on-chain creation confirmed and the recorded owner was read back, and it
//! is removed only after the on-chain removal confirmed. A failure in
//! between leaves "confirmed on ledger, local write missing", which later
//! ownership checks reconcile; it never leaves the reverse.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use tokio::sync::RwLock;

use crate::ledger::{GatewayError, LedgerGateway};

/// Errors from listing management.
#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("Asset {0} not found")]
    AssetNotFound(u64),

    #[error("Address {address} does not own asset {asset_id}")]
    OwnershipMismatch { asset_id: u64, address: Address },

    #[error("Asset {0} is a stream; subscribe to it instead of purchasing")]
    StreamNotPurchasable(u64),

    #[error("Listing inconsistency: {0}")]
    Consistency(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// What a listing resolves to when accessed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetContent {
    /// Static data, fetchable from the content store by reference
    Static { content_ref: String },
    /// Live data, reachable through the stream bus
    Stream { stream_id: String },
}

/// Off-chain listing metadata.
///
/// `asset_id` is the ledger-assigned id; `owner` is a cache of the on-chain
/// owner and never authoritative.
#[derive(Debug, Clone)]
pub struct AssetListing {
    pub asset_id: u64,
    pub owner: Address,
    pub name: String,
    pub description: String,
    pub price: U256,
    pub content: AssetContent,
}

/// Input for a new listing; the asset id comes from the ledger.
#[derive(Debug, Clone)]
pub struct ListingSpec {
    pub name: String,
    pub description: String,
    pub price: U256,
    pub content: AssetContent,
}

/// Listing cache gated by on-chain ownership truth.
pub struct AssetRegistry {
    gateway: Arc<LedgerGateway>,
    listings: RwLock<HashMap<u64, AssetListing>>,
}

impl AssetRegistry {
    pub fn new(gateway: Arc<LedgerGateway>) -> Self {
        Self {
            gateway,
            listings: RwLock::new(HashMap::new()),
        }
    }

    /// Create the asset on the ledger, then store its listing.
    ///
    /// The recorded on-chain owner is read back before anything is written
    /// locally; a mismatch aborts the whole operation and no listing exists.
    pub async fn add(
        &self,
        owner: Address,
        spec: ListingSpec,
    ) -> Result<(u64, B256), MarketError> {
        let chain_ref = match &spec.content {
            AssetContent::Static { content_ref } => content_ref.clone(),
            AssetContent::Stream { stream_id } => stream_id.clone(),
        };

        let submitted = self
            .gateway
            .submit_asset_creation(owner, &chain_ref, spec.price)
            .await?;

        let recorded = self.gateway.owner_of(submitted.asset_id).await?;
        if recorded != owner {
            return Err(MarketError::Consistency(format!(
                "asset {} recorded owner {recorded}, expected {owner}",
                submitted.asset_id
            )));
        }

        let listing = AssetListing {
            asset_id: submitted.asset_id,
            owner,
            name: spec.name,
            description: spec.description,
            price: spec.price,
            content: spec.content,
        };
        self.listings
            .write()
            .await
            .insert(submitted.asset_id, listing);

        tracing::info!(asset_id = submitted.asset_id, %owner, "asset listed");
        Ok((submitted.asset_id, submitted.tx_hash))
    }

    /// Resolve the content behind an asset for `requester`.
    ///
    /// Requires a fresh on-chain ownership check; the cached owner field is
    /// never consulted for the decision.
    pub async fn access(
        &self,
        asset_id: u64,
        requester: Address,
    ) -> Result<AssetContent, MarketError> {
        let content = {
            let listings = self.listings.read().await;
            let listing = listings
                .get(&asset_id)
                .ok_or(MarketError::AssetNotFound(asset_id))?;
            listing.content.clone()
        };

        if !self.gateway.check_ownership(asset_id, requester).await? {
            tracing::warn!(asset_id, %requester, "access denied by on-chain ownership check");
            return Err(MarketError::OwnershipMismatch {
                asset_id,
                address: requester,
            });
        }

        Ok(content)
    }

    /// Purchase a static asset through the gateway.
    ///
    /// Streams are not purchasable; they are subscribed to. The cached owner
    /// hint follows the confirmed transfer.
    pub async fn purchase(
        &self,
        asset_id: u64,
        buyer: Address,
        proof: &[u8],
    ) -> Result<B256, MarketError> {
        {
            let listings = self.listings.read().await;
            let listing = listings
                .get(&asset_id)
                .ok_or(MarketError::AssetNotFound(asset_id))?;
            if matches!(listing.content, AssetContent::Stream { .. }) {
                return Err(MarketError::StreamNotPurchasable(asset_id));
            }
        }

        let tx_hash = self.gateway.submit_purchase(buyer, asset_id, proof).await?;

        if let Some(listing) = self.listings.write().await.get_mut(&asset_id) {
            listing.owner = buyer;
        }
        Ok(tx_hash)
    }

    /// Remove an asset, ledger first.
    ///
    /// Requires the off-chain owner hint to match AND a fresh on-chain
    /// ownership confirmation; the local listing goes away only after the
    /// removal transaction confirmed. Returns the removed listing so the
    /// caller can release any stored content.
    pub async fn delete(
        &self,
        asset_id: u64,
        requester: Address,
    ) -> Result<(AssetListing, B256), MarketError> {
        {
            let listings = self.listings.read().await;
            let listing = listings
                .get(&asset_id)
                .ok_or(MarketError::AssetNotFound(asset_id))?;
            if listing.owner != requester {
                return Err(MarketError::OwnershipMismatch {
                    asset_id,
                    address: requester,
                });
            }
        }

        if !self.gateway.check_ownership(asset_id, requester).await? {
            tracing::warn!(asset_id, %requester, "delete denied by on-chain ownership check");
            return Err(MarketError::OwnershipMismatch {
                asset_id,
                address: requester,
            });
        }

        let tx_hash = self
            .gateway
            .submit_asset_removal(requester, asset_id)
            .await?;

        let removed = self
            .listings
            .write()
            .await
            .remove(&asset_id)
            .ok_or(MarketError::AssetNotFound(asset_id))?;

        tracing::info!(asset_id, %requester, "asset delisted");
        Ok((removed, tx_hash))
    }

    /// Snapshot of one listing.
    pub async fn get(&self, asset_id: u64) -> Option<AssetListing> {
        self.listings.read().await.get(&asset_id).cloned()
    }

    /// Snapshot of all listings.
    pub async fn list(&self) -> Vec<AssetListing> {
        self.listings.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use alloy::signers::local::PrivateKeySigner;

    fn market() -> Address {
        Address::repeat_byte(0x42)
    }

    fn static_spec(price: u64) -> ListingSpec {
        ListingSpec {
            name: "weather-data".to_string(),
            description: "hourly readings".to_string(),
            price: U256::from(price),
            content: AssetContent::Static {
                content_ref: "sha256:aa".to_string(),
            },
        }
    }

    async fn setup() -> (
        Arc<MemoryLedger>,
        Arc<LedgerGateway>,
        AssetRegistry,
        PrivateKeySigner,
    ) {
        let ledger = Arc::new(MemoryLedger::new(market()));
        let gateway = Arc::new(LedgerGateway::new(ledger.clone(), market()));
        let registry = AssetRegistry::new(gateway.clone());
        let owner = PrivateKeySigner::random();
        gateway.register_signer(owner.clone()).await;
        (ledger, gateway, registry, owner)
    }

    #[tokio::test]
    async fn add_stores_listing_after_chain_confirms() {
        let (_ledger, _gateway, registry, owner) = setup().await;

        let (asset_id, _tx) = registry
            .add(owner.address(), static_spec(100))
            .await
            .unwrap();

        let listing = registry.get(asset_id).await.unwrap();
        assert_eq!(listing.owner, owner.address());
        assert_eq!(listing.price, U256::from(100));
    }

    #[tokio::test]
    async fn add_aborts_without_creation_event_and_stores_nothing() {
        let (ledger, _gateway, registry, owner) = setup().await;
        ledger.drop_creation_events(true).await;

        let result = registry.add(owner.address(), static_spec(100)).await;
        assert!(matches!(
            result,
            Err(MarketError::Gateway(GatewayError::Consistency(_)))
        ));
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn access_requires_on_chain_ownership() {
        let (_ledger, _gateway, registry, owner) = setup().await;
        let (asset_id, _tx) = registry
            .add(owner.address(), static_spec(100))
            .await
            .unwrap();

        let content = registry.access(asset_id, owner.address()).await.unwrap();
        assert_eq!(
            content,
            AssetContent::Static {
                content_ref: "sha256:aa".to_string()
            }
        );

        let stranger = Address::repeat_byte(0x77);
        let result = registry.access(asset_id, stranger).await;
        assert!(matches!(result, Err(MarketError::OwnershipMismatch { .. })));
    }

    #[tokio::test]
    async fn stale_cached_owner_never_overrides_ledger_truth() {
        let (ledger, gateway, registry, owner) = setup().await;
        let (asset_id, _tx) = registry
            .add(owner.address(), static_spec(100))
            .await
            .unwrap();

        // Ownership moves on chain behind the registry's back
        let buyer = PrivateKeySigner::random();
        gateway.register_signer(buyer.clone()).await;
        ledger.fund(buyer.address(), U256::from(1_000)).await;
        gateway
            .submit_purchase(buyer.address(), asset_id, b"proof")
            .await
            .unwrap();

        // The cache still names the original owner, but access is denied
        assert_eq!(registry.get(asset_id).await.unwrap().owner, owner.address());
        let result = registry.access(asset_id, owner.address()).await;
        assert!(matches!(result, Err(MarketError::OwnershipMismatch { .. })));
    }

    #[tokio::test]
    async fn unknown_asset_is_not_found() {
        let (_ledger, _gateway, registry, owner) = setup().await;
        let result = registry.access(99, owner.address()).await;
        assert!(matches!(result, Err(MarketError::AssetNotFound(99))));
    }

    #[tokio::test]
    async fn purchase_updates_owner_hint() {
        let (ledger, gateway, registry, owner) = setup().await;
        let (asset_id, _tx) = registry
            .add(owner.address(), static_spec(100))
            .await
            .unwrap();

        let buyer = PrivateKeySigner::random();
        gateway.register_signer(buyer.clone()).await;
        ledger.fund(buyer.address(), U256::from(1_000)).await;

        registry
            .purchase(asset_id, buyer.address(), b"proof")
            .await
            .unwrap();

        assert_eq!(registry.get(asset_id).await.unwrap().owner, buyer.address());
        let content = registry.access(asset_id, buyer.address()).await.unwrap();
        assert!(matches!(content, AssetContent::Static { .. }));
    }

    #[tokio::test]
    async fn streams_cannot_be_purchased() {
        let (_ledger, _gateway, registry, owner) = setup().await;
        let spec = ListingSpec {
            name: "ticker".to_string(),
            description: "live prices".to_string(),
            price: U256::from(50),
            content: AssetContent::Stream {
                stream_id: "stream-7".to_string(),
            },
        };
        let (asset_id, _tx) = registry.add(owner.address(), spec).await.unwrap();

        let result = registry.purchase(asset_id, owner.address(), b"proof").await;
        assert!(matches!(result, Err(MarketError::StreamNotPurchasable(_))));
    }

    #[tokio::test]
    async fn delete_requires_both_cache_and_ledger_agreement() {
        let (ledger, gateway, registry, owner) = setup().await;
        let (asset_id, _tx) = registry
            .add(owner.address(), static_spec(100))
            .await
            .unwrap();

        // Off-chain hint mismatch fails fast
        let stranger = Address::repeat_byte(0x77);
        let result = registry.delete(asset_id, stranger).await;
        assert!(matches!(result, Err(MarketError::OwnershipMismatch { .. })));

        // Cache agrees but the chain moved on: still denied, nothing removed
        let buyer = PrivateKeySigner::random();
        gateway.register_signer(buyer.clone()).await;
        ledger.fund(buyer.address(), U256::from(1_000)).await;
        gateway
            .submit_purchase(buyer.address(), asset_id, b"proof")
            .await
            .unwrap();

        let before = ledger.broadcast_count().await;
        let result = registry.delete(asset_id, owner.address()).await;
        assert!(matches!(result, Err(MarketError::OwnershipMismatch { .. })));
        assert!(registry.get(asset_id).await.is_some());
        assert_eq!(ledger.broadcast_count().await, before);
    }

    #[tokio::test]
    async fn delete_removes_listing_after_chain_confirms() {
        let (ledger, _gateway, registry, owner) = setup().await;
        let (asset_id, _tx) = registry
            .add(owner.address(), static_spec(100))
            .await
            .unwrap();

        let (removed, _tx) = registry.delete(asset_id, owner.address()).await.unwrap();
        assert_eq!(removed.asset_id, asset_id);
        assert!(registry.get(asset_id).await.is_none());
        assert_eq!(ledger.asset_owner(asset_id).await, None);
    }
}
