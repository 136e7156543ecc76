// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Didmarket Developers

//! # Ledger Gateway
//!
//! Builds, signs, submits and confirms marketplace transactions, and decodes
//! the events they emit.
//!
//! ## Sequencing
//!
//! Fetching the sequence number, signing and broadcasting are not atomic on
//! the ledger side, so all submissions for one signing address run under a
//! per-address lock: sequence numbers are used exactly once, in increasing
//! order, with no gaps. Submissions for distinct addresses proceed in
//! parallel, and the confirmation wait happens outside the lock.
//!
//! ## Failure Model
//!
//! Mutating calls are at-most-once. A failed receipt raises
//! [`GatewayError::ExecutionFailed`] with the revert reason, and is never
//! retried here: a retry needs a fresh sequence number and a caller-side
//! check of what actually landed on chain. A confirmation that outlives its
//! bounded wait raises the distinct [`GatewayError::ConfirmationTimeout`]:
//! the transaction's fate is unknown, not necessarily failed. Callers
//! reconcile via the read-only ownership calls before resubmitting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::connection::{Ledger, LedgerError};
use super::contract::{creation_event, IDataMarket};
use super::types::{
    TxReceipt, CONFIRM_TIMEOUT, DEFAULT_GAS_LIMIT, PRIORITY_FEE, RECEIPT_POLL_INTERVAL,
};

/// Errors from transaction orchestration.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("No signing key registered for address {0}")]
    UnknownSigner(Address),

    #[error("Insufficient balance: needs {needed} wei, wallet holds {available} wei")]
    InsufficientBalance { needed: U256, available: U256 },

    #[error("Transaction execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timed out waiting for confirmation of {0}")]
    ConfirmationTimeout(B256),

    #[error("Confirmation wait cancelled")]
    Cancelled,

    #[error("Ledger state inconsistency: {0}")]
    Consistency(String),

    #[error("Transaction signing failed: {0}")]
    Signing(String),

    #[error("Response decoding failed: {0}")]
    Decode(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Result of a confirmed asset creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmittedAsset {
    /// Asset id assigned by the ledger, decoded from the creation event
    pub asset_id: u64,
    /// Hash of the confirmed transaction
    pub tx_hash: B256,
}

/// Result of a revenue withdrawal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawOutcome {
    /// A withdrawal transaction was confirmed
    Submitted { tx_hash: B256 },
    /// No pending revenue; nothing was submitted
    NothingToWithdraw,
}

/// Transaction gateway for the marketplace contract.
pub struct LedgerGateway {
    ledger: Arc<dyn Ledger>,
    contract: Address,
    confirm_timeout: Duration,
    shutdown: CancellationToken,
    signers: Mutex<HashMap<Address, PrivateKeySigner>>,
    submission_locks: Mutex<HashMap<Address, Arc<Mutex<()>>>>,
}

impl LedgerGateway {
    pub fn new(ledger: Arc<dyn Ledger>, contract: Address) -> Self {
        Self {
            ledger,
            contract,
            confirm_timeout: CONFIRM_TIMEOUT,
            shutdown: CancellationToken::new(),
            signers: Mutex::new(HashMap::new()),
            submission_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Override the bound on confirmation waits.
    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    /// Token a host process cancels to abort in-flight confirmation waits.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Register the signing key for a wallet address.
    pub async fn register_signer(&self, signer: PrivateKeySigner) {
        let address = signer.address();
        self.signers.lock().await.insert(address, signer);
        tracing::debug!(%address, "signer registered");
    }

    // ========== Mutating Calls ==========

    /// Create the on-chain asset and return the id the ledger assigned.
    ///
    /// The id comes from the `AssetCreated` event in the confirmed receipt;
    /// a mined transaction without that event is a consistency failure, not
    /// a success.
    pub async fn submit_asset_creation(
        &self,
        owner: Address,
        content_ref: &str,
        price: U256,
    ) -> Result<SubmittedAsset, GatewayError> {
        let input = IDataMarket::createAssetCall {
            contentRef: content_ref.to_string(),
            price,
        }
        .abi_encode();

        let tx_hash = self.submit(owner, input.into(), U256::ZERO).await?;
        let receipt = self.wait_for_receipt(tx_hash).await?;
        ensure_success(&receipt)?;

        let event = creation_event(&receipt.logs, self.contract).ok_or_else(|| {
            GatewayError::Consistency(format!(
                "transaction {tx_hash} mined without an AssetCreated event"
            ))
        })?;
        let asset_id = event.assetId.to::<u64>();

        tracing::info!(%owner, asset_id, %tx_hash, "asset creation confirmed");
        Ok(SubmittedAsset { asset_id, tx_hash })
    }

    /// Purchase an asset at its current on-chain price.
    ///
    /// The price is read immediately before building the transaction so a
    /// stale cached value is never attached, and the buyer's balance is
    /// checked client-side before anything is broadcast, so an underfunded
    /// purchase consumes no sequence number.
    pub async fn submit_purchase(
        &self,
        buyer: Address,
        asset_id: u64,
        proof: &[u8],
    ) -> Result<B256, GatewayError> {
        let price = self.asset_price(asset_id).await?;
        let available = self.ledger.balance(buyer).await?;
        if available < price {
            tracing::warn!(%buyer, asset_id, %price, %available, "purchase rejected before broadcast");
            return Err(GatewayError::InsufficientBalance {
                needed: price,
                available,
            });
        }

        let input = IDataMarket::purchaseAssetCall {
            assetId: U256::from(asset_id),
            proof: proof.to_vec().into(),
        }
        .abi_encode();

        let tx_hash = self.submit(buyer, input.into(), price).await?;
        let receipt = self.wait_for_receipt(tx_hash).await?;
        ensure_success(&receipt)?;

        tracing::info!(%buyer, asset_id, %tx_hash, "purchase confirmed");
        Ok(tx_hash)
    }

    /// Remove an asset from the ledger.
    pub async fn submit_asset_removal(
        &self,
        owner: Address,
        asset_id: u64,
    ) -> Result<B256, GatewayError> {
        let input = IDataMarket::removeAssetCall {
            assetId: U256::from(asset_id),
        }
        .abi_encode();

        let tx_hash = self.submit(owner, input.into(), U256::ZERO).await?;
        let receipt = self.wait_for_receipt(tx_hash).await?;
        ensure_success(&receipt)?;

        tracing::info!(%owner, asset_id, %tx_hash, "asset removal confirmed");
        Ok(tx_hash)
    }

    /// Withdraw accumulated sale revenue for `address`.
    ///
    /// Reads the pending amount first and submits nothing when it is zero.
    pub async fn withdraw_revenue(
        &self,
        address: Address,
    ) -> Result<WithdrawOutcome, GatewayError> {
        let pending = self.pending_revenue(address).await?;
        if pending.is_zero() {
            tracing::debug!(%address, "no pending revenue to withdraw");
            return Ok(WithdrawOutcome::NothingToWithdraw);
        }

        let input = IDataMarket::withdrawCall {}.abi_encode();
        let tx_hash = self.submit(address, input.into(), U256::ZERO).await?;
        let receipt = self.wait_for_receipt(tx_hash).await?;
        ensure_success(&receipt)?;

        tracing::info!(%address, %pending, %tx_hash, "withdrawal confirmed");
        Ok(WithdrawOutcome::Submitted { tx_hash })
    }

    // ========== Read-Only Calls ==========

    /// Whether `address` owns the asset, straight from the ledger.
    pub async fn check_ownership(
        &self,
        asset_id: u64,
        address: Address,
    ) -> Result<bool, GatewayError> {
        let data = IDataMarket::checkOwnershipCall {
            assetId: U256::from(asset_id),
            claimant: address,
        }
        .abi_encode();
        let raw = self.ledger.call(self.contract, data.into()).await?;
        IDataMarket::checkOwnershipCall::abi_decode_returns(&raw)
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    /// Recorded owner of the asset.
    pub async fn owner_of(&self, asset_id: u64) -> Result<Address, GatewayError> {
        let data = IDataMarket::ownerOfCall {
            assetId: U256::from(asset_id),
        }
        .abi_encode();
        let raw = self.ledger.call(self.contract, data.into()).await?;
        IDataMarket::ownerOfCall::abi_decode_returns(&raw)
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    /// Current asking price of the asset.
    pub async fn asset_price(&self, asset_id: u64) -> Result<U256, GatewayError> {
        let data = IDataMarket::assetPriceCall {
            assetId: U256::from(asset_id),
        }
        .abi_encode();
        let raw = self.ledger.call(self.contract, data.into()).await?;
        IDataMarket::assetPriceCall::abi_decode_returns(&raw)
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    /// Sale revenue accumulated for `address` and not yet withdrawn.
    pub async fn pending_revenue(&self, address: Address) -> Result<U256, GatewayError> {
        let data = IDataMarket::pendingRevenueCall { seller: address }.abi_encode();
        let raw = self.ledger.call(self.contract, data.into()).await?;
        IDataMarket::pendingRevenueCall::abi_decode_returns(&raw)
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    // ========== Internals ==========

    async fn signer_for(&self, address: Address) -> Result<PrivateKeySigner, GatewayError> {
        self.signers
            .lock()
            .await
            .get(&address)
            .cloned()
            .ok_or(GatewayError::UnknownSigner(address))
    }

    async fn submission_lock(&self, address: Address) -> Arc<Mutex<()>> {
        self.submission_locks
            .lock()
            .await
            .entry(address)
            .or_default()
            .clone()
    }

    /// Fetch-sequence-number -> build -> sign -> broadcast, serialized per
    /// signing address. The per-address lock is released before the
    /// confirmation wait so confirmations overlap freely.
    async fn submit(&self, from: Address, input: Bytes, value: U256) -> Result<B256, GatewayError> {
        let signer = self.signer_for(from).await?;
        let lock = self.submission_lock(from).await;
        let _guard = lock.lock().await;

        let sequence = self.ledger.sequence_number(from).await?;
        let gas_price = self.ledger.gas_price().await?;

        let mut tx = TxEip1559 {
            chain_id: self.ledger.chain_id(),
            nonce: sequence,
            gas_limit: DEFAULT_GAS_LIMIT,
            max_fee_per_gas: gas_price.saturating_mul(2).saturating_add(PRIORITY_FEE),
            max_priority_fee_per_gas: PRIORITY_FEE,
            to: TxKind::Call(self.contract),
            value,
            input,
            ..Default::default()
        };

        let signature = signer
            .sign_transaction_sync(&mut tx)
            .map_err(|e| GatewayError::Signing(e.to_string()))?;
        let raw = TxEnvelope::Eip1559(tx.into_signed(signature)).encoded_2718();

        let tx_hash = self.ledger.send_raw_transaction(raw).await?;
        tracing::debug!(%from, sequence, %tx_hash, "transaction broadcast");
        Ok(tx_hash)
    }

    /// Poll for the receipt, bounded by the configured timeout and
    /// cancellable through the shutdown token.
    pub async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt, GatewayError> {
        let deadline = tokio::time::Instant::now() + self.confirm_timeout;
        loop {
            if let Some(receipt) = self.ledger.receipt(tx_hash).await? {
                return Ok(receipt);
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(GatewayError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(GatewayError::ConfirmationTimeout(tx_hash));
                }
                _ = tokio::time::sleep(RECEIPT_POLL_INTERVAL) => {}
            }
        }
    }
}

fn ensure_success(receipt: &TxReceipt) -> Result<(), GatewayError> {
    if receipt.success {
        Ok(())
    } else {
        Err(GatewayError::ExecutionFailed(
            receipt
                .revert_reason
                .clone()
                .unwrap_or_else(|| format!("transaction {} reverted", receipt.tx_hash)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryLedger;

    fn market() -> Address {
        Address::repeat_byte(0x42)
    }

    async fn setup() -> (Arc<MemoryLedger>, Arc<LedgerGateway>, PrivateKeySigner) {
        let ledger = Arc::new(MemoryLedger::new(market()));
        let gateway = Arc::new(LedgerGateway::new(ledger.clone(), market()));
        let signer = PrivateKeySigner::random();
        gateway.register_signer(signer.clone()).await;
        (ledger, gateway, signer)
    }

    #[tokio::test]
    async fn creation_returns_ledger_assigned_id() {
        let (_ledger, gateway, signer) = setup().await;

        let created = gateway
            .submit_asset_creation(signer.address(), "sha256:aa", U256::from(100))
            .await
            .unwrap();
        assert_eq!(created.asset_id, 1);

        assert!(gateway
            .check_ownership(created.asset_id, signer.address())
            .await
            .unwrap());
        assert_eq!(
            gateway.owner_of(created.asset_id).await.unwrap(),
            signer.address()
        );
    }

    #[tokio::test]
    async fn unknown_signer_is_rejected() {
        let (_ledger, gateway, _signer) = setup().await;
        let stranger = Address::repeat_byte(0x77);

        let result = gateway
            .submit_asset_creation(stranger, "sha256:aa", U256::from(1))
            .await;
        assert!(matches!(result, Err(GatewayError::UnknownSigner(_))));
    }

    #[tokio::test]
    async fn concurrent_creations_use_distinct_sequence_numbers() {
        let (ledger, gateway, signer) = setup().await;
        let owner = signer.address();

        let a = tokio::spawn({
            let gateway = gateway.clone();
            async move {
                gateway
                    .submit_asset_creation(owner, "sha256:aa", U256::from(1))
                    .await
            }
        });
        let b = tokio::spawn({
            let gateway = gateway.clone();
            async move {
                gateway
                    .submit_asset_creation(owner, "sha256:bb", U256::from(2))
                    .await
            }
        });

        let first = a.await.unwrap().unwrap();
        let second = b.await.unwrap().unwrap();

        assert_ne!(first.asset_id, second.asset_id);
        assert_eq!(ledger.broadcast_count().await, 2);
        assert_eq!(ledger.sequence_number(owner).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn mined_without_creation_event_is_a_consistency_failure() {
        let (ledger, gateway, signer) = setup().await;
        ledger.drop_creation_events(true).await;

        let result = gateway
            .submit_asset_creation(signer.address(), "sha256:aa", U256::from(1))
            .await;
        assert!(matches!(result, Err(GatewayError::Consistency(_))));
    }

    #[tokio::test]
    async fn underfunded_purchase_never_reaches_broadcast() {
        let (ledger, gateway, seller) = setup().await;
        let created = gateway
            .submit_asset_creation(seller.address(), "sha256:aa", U256::from(1_000))
            .await
            .unwrap();

        let buyer = PrivateKeySigner::random();
        gateway.register_signer(buyer.clone()).await;
        ledger.fund(buyer.address(), U256::from(10)).await;

        let before = ledger.broadcast_count().await;
        let result = gateway
            .submit_purchase(buyer.address(), created.asset_id, b"proof")
            .await;
        assert!(matches!(
            result,
            Err(GatewayError::InsufficientBalance { .. })
        ));

        // No ledger side effect, no sequence number consumed
        assert_eq!(ledger.broadcast_count().await, before);
        assert_eq!(ledger.sequence_number(buyer.address()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn funded_purchase_transfers_ownership_and_revenue() {
        let (ledger, gateway, seller) = setup().await;
        let price = U256::from(1_000);
        let created = gateway
            .submit_asset_creation(seller.address(), "sha256:aa", price)
            .await
            .unwrap();

        let buyer = PrivateKeySigner::random();
        gateway.register_signer(buyer.clone()).await;
        ledger.fund(buyer.address(), U256::from(5_000)).await;

        gateway
            .submit_purchase(buyer.address(), created.asset_id, b"proof")
            .await
            .unwrap();

        assert_eq!(
            gateway.owner_of(created.asset_id).await.unwrap(),
            buyer.address()
        );
        assert_eq!(
            gateway.pending_revenue(seller.address()).await.unwrap(),
            price
        );
        assert_eq!(
            ledger.balance(buyer.address()).await.unwrap(),
            U256::from(4_000)
        );
    }

    #[tokio::test]
    async fn failed_execution_surfaces_revert_reason() {
        let (ledger, gateway, signer) = setup().await;
        ledger.fail_next_execution("asset limit reached").await;

        let result = gateway
            .submit_asset_creation(signer.address(), "sha256:aa", U256::from(1))
            .await;
        match result {
            Err(GatewayError::ExecutionFailed(reason)) => {
                assert!(reason.contains("asset limit reached"));
            }
            other => panic!("expected ExecutionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stalled_ledger_times_out_distinctly() {
        let ledger = Arc::new(MemoryLedger::new(market()));
        let gateway = LedgerGateway::new(ledger.clone(), market())
            .with_confirm_timeout(Duration::from_millis(50));
        let signer = PrivateKeySigner::random();
        gateway.register_signer(signer.clone()).await;

        ledger.pause_mining().await;
        let result = gateway
            .submit_asset_creation(signer.address(), "sha256:aa", U256::from(1))
            .await;
        assert!(matches!(result, Err(GatewayError::ConfirmationTimeout(_))));
    }

    #[tokio::test]
    async fn cancelled_wait_is_not_a_timeout() {
        let ledger = Arc::new(MemoryLedger::new(market()));
        let gateway = Arc::new(LedgerGateway::new(ledger.clone(), market()));
        let signer = PrivateKeySigner::random();
        gateway.register_signer(signer.clone()).await;

        ledger.pause_mining().await;
        let token = gateway.shutdown_token();

        let task = tokio::spawn({
            let gateway = gateway.clone();
            let owner = signer.address();
            async move {
                gateway
                    .submit_asset_creation(owner, "sha256:aa", U256::from(1))
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(GatewayError::Cancelled)));
    }

    #[tokio::test]
    async fn withdraw_with_nothing_pending_submits_nothing() {
        let (ledger, gateway, signer) = setup().await;

        let before = ledger.broadcast_count().await;
        let outcome = gateway.withdraw_revenue(signer.address()).await.unwrap();
        assert_eq!(outcome, WithdrawOutcome::NothingToWithdraw);
        assert_eq!(ledger.broadcast_count().await, before);
    }

    #[tokio::test]
    async fn withdraw_credits_the_seller() {
        let (ledger, gateway, seller) = setup().await;
        let price = U256::from(700);
        let created = gateway
            .submit_asset_creation(seller.address(), "sha256:aa", price)
            .await
            .unwrap();

        let buyer = PrivateKeySigner::random();
        gateway.register_signer(buyer.clone()).await;
        ledger.fund(buyer.address(), price).await;
        gateway
            .submit_purchase(buyer.address(), created.asset_id, b"proof")
            .await
            .unwrap();

        let outcome = gateway.withdraw_revenue(seller.address()).await.unwrap();
        assert!(matches!(outcome, WithdrawOutcome::Submitted { .. }));
        assert_eq!(ledger.balance(seller.address()).await.unwrap(), price);
        assert_eq!(
            gateway.pending_revenue(seller.address()).await.unwrap(),
            U256::ZERO
        );
    }
}
