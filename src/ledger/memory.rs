// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Didmarket Developers

//! In-process ledger implementing the marketplace contract semantics.
//!
//! A deterministic stand-in for a real settlement chain, used by the demo
//! binary and the test suites: it decodes broadcast transactions, enforces
//! per-address sequence numbers, executes the marketplace calls against an
//! in-memory state, and produces receipts with the emitted events.
//!
//! Fault injection hooks cover the failure paths the gateway must handle:
//! a failed execution, a mined receipt with the creation event missing, and
//! a ledger that stops producing receipts.

use std::collections::HashMap;

use alloy::consensus::transaction::SignerRecoverable;
use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{keccak256, Address, Bytes, Log, B256, U256};
use alloy::sol_types::{SolCall, SolEvent, SolValue};
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::connection::{Ledger, LedgerError};
use super::contract::IDataMarket;
use super::types::TxReceipt;

/// Local development chain id.
const MEMORY_CHAIN_ID: u64 = 31_337;

/// Flat gas price quoted by the in-process ledger (25 gwei).
const MEMORY_GAS_PRICE: u128 = 25_000_000_000;

/// On-chain asset record.
#[derive(Debug, Clone)]
struct ChainAsset {
    owner: Address,
    #[allow(dead_code)]
    content_ref: String,
    price: U256,
}

#[derive(Default)]
struct MemoryState {
    balances: HashMap<Address, U256>,
    sequence: HashMap<Address, u64>,
    assets: HashMap<u64, ChainAsset>,
    revenue: HashMap<Address, U256>,
    receipts: HashMap<B256, TxReceipt>,
    pending: Vec<(B256, Address, TxEnvelope)>,
    next_asset_id: u64,
    height: u64,
    broadcast_count: u64,
    mining_paused: bool,
    fail_next: Option<String>,
    drop_creation_event: bool,
}

/// Deterministic in-process ledger.
pub struct MemoryLedger {
    contract: Address,
    state: Mutex<MemoryState>,
}

impl MemoryLedger {
    /// Create a ledger with the marketplace deployed at `contract`.
    pub fn new(contract: Address) -> Self {
        Self {
            contract,
            state: Mutex::new(MemoryState {
                next_asset_id: 1,
                ..MemoryState::default()
            }),
        }
    }

    /// Credit `amount` to an address.
    pub async fn fund(&self, address: Address, amount: U256) {
        let mut state = self.state.lock().await;
        let balance = state.balances.entry(address).or_default();
        *balance = balance.saturating_add(amount);
    }

    /// Stop producing receipts; broadcast transactions queue as pending.
    pub async fn pause_mining(&self) {
        self.state.lock().await.mining_paused = true;
    }

    /// Execute all pending transactions and resume mining.
    pub async fn mine_pending(&self) {
        let mut state = self.state.lock().await;
        state.mining_paused = false;
        let pending = std::mem::take(&mut state.pending);
        for (hash, from, envelope) in pending {
            let receipt = execute(&mut state, self.contract, hash, from, &envelope);
            state.receipts.insert(hash, receipt);
        }
    }

    /// Mark the next executed transaction as failed with `reason`.
    pub async fn fail_next_execution(&self, reason: &str) {
        self.state.lock().await.fail_next = Some(reason.to_string());
    }

    /// Suppress `AssetCreated` events on subsequent creations.
    pub async fn drop_creation_events(&self, drop: bool) {
        self.state.lock().await.drop_creation_event = drop;
    }

    /// Number of transactions accepted for broadcast so far.
    pub async fn broadcast_count(&self) -> u64 {
        self.state.lock().await.broadcast_count
    }

    /// Current on-chain owner of an asset, if it exists.
    pub async fn asset_owner(&self, asset_id: u64) -> Option<Address> {
        self.state
            .lock()
            .await
            .assets
            .get(&asset_id)
            .map(|asset| asset.owner)
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, LedgerError> {
        if to != self.contract {
            return Err(LedgerError::Reverted(format!("no contract at {to}")));
        }

        let state = self.state.lock().await;
        let input = data.as_ref();

        if let Ok(call) = IDataMarket::checkOwnershipCall::abi_decode(input) {
            let asset_id = call.assetId.to::<u64>();
            let owns = state
                .assets
                .get(&asset_id)
                .map(|asset| asset.owner == call.claimant)
                .unwrap_or(false);
            return Ok(owns.abi_encode().into());
        }

        if let Ok(call) = IDataMarket::ownerOfCall::abi_decode(input) {
            let asset_id = call.assetId.to::<u64>();
            let asset = state
                .assets
                .get(&asset_id)
                .ok_or_else(|| LedgerError::Reverted(format!("unknown asset {asset_id}")))?;
            return Ok(asset.owner.abi_encode().into());
        }

        if let Ok(call) = IDataMarket::assetPriceCall::abi_decode(input) {
            let asset_id = call.assetId.to::<u64>();
            let asset = state
                .assets
                .get(&asset_id)
                .ok_or_else(|| LedgerError::Reverted(format!("unknown asset {asset_id}")))?;
            return Ok(asset.price.abi_encode().into());
        }

        if let Ok(call) = IDataMarket::pendingRevenueCall::abi_decode(input) {
            let pending = state
                .revenue
                .get(&call.seller)
                .copied()
                .unwrap_or_default();
            return Ok(pending.abi_encode().into());
        }

        Err(LedgerError::Reverted("unknown method".to_string()))
    }

    async fn send_raw_transaction(&self, raw: Vec<u8>) -> Result<B256, LedgerError> {
        let envelope = TxEnvelope::decode_2718(&mut raw.as_slice())
            .map_err(|e| LedgerError::Rejected(format!("undecodable transaction: {e}")))?;
        let from = envelope
            .recover_signer()
            .map_err(|e| LedgerError::Rejected(format!("unrecoverable signer: {e}")))?;
        let hash = keccak256(&raw);

        let mut state = self.state.lock().await;

        let expected = state.sequence.get(&from).copied().unwrap_or_default();
        let nonce = envelope.nonce();
        if nonce != expected {
            return Err(LedgerError::Rejected(format!(
                "invalid sequence number for {from}: got {nonce}, expected {expected}"
            )));
        }
        state.sequence.insert(from, expected + 1);
        state.broadcast_count += 1;

        if state.mining_paused {
            state.pending.push((hash, from, envelope));
        } else {
            let receipt = execute(&mut state, self.contract, hash, from, &envelope);
            state.receipts.insert(hash, receipt);
        }

        Ok(hash)
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, LedgerError> {
        Ok(self.state.lock().await.receipts.get(&tx_hash).cloned())
    }

    async fn sequence_number(&self, address: Address) -> Result<u64, LedgerError> {
        Ok(self
            .state
            .lock()
            .await
            .sequence
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn balance(&self, address: Address) -> Result<U256, LedgerError> {
        Ok(self
            .state
            .lock()
            .await
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn gas_price(&self) -> Result<u128, LedgerError> {
        Ok(MEMORY_GAS_PRICE)
    }

    fn chain_id(&self) -> u64 {
        MEMORY_CHAIN_ID
    }
}

/// Execute a broadcast transaction against the marketplace state.
fn execute(
    state: &mut MemoryState,
    contract: Address,
    hash: B256,
    from: Address,
    tx: &TxEnvelope,
) -> TxReceipt {
    state.height += 1;
    let mut receipt = TxReceipt {
        tx_hash: hash,
        block_number: state.height,
        gas_used: 21_000,
        success: true,
        revert_reason: None,
        logs: Vec::new(),
    };

    if let Some(reason) = state.fail_next.take() {
        return reverted(receipt, reason);
    }

    if tx.to() != Some(contract) {
        return reverted(receipt, "no contract at recipient".to_string());
    }

    let input = tx.input().as_ref();
    let value = tx.value();

    if let Ok(call) = IDataMarket::createAssetCall::abi_decode(input) {
        let asset_id = state.next_asset_id;
        state.next_asset_id += 1;
        state.assets.insert(
            asset_id,
            ChainAsset {
                owner: from,
                content_ref: call.contentRef,
                price: call.price,
            },
        );
        if !state.drop_creation_event {
            let event = IDataMarket::AssetCreated {
                assetId: U256::from(asset_id),
                owner: from,
            };
            receipt.logs.push(Log {
                address: contract,
                data: event.encode_log_data(),
            });
        }
        return receipt;
    }

    if let Ok(call) = IDataMarket::purchaseAssetCall::abi_decode(input) {
        let asset_id = call.assetId.to::<u64>();
        let (seller, price) = match state.assets.get(&asset_id) {
            Some(asset) => (asset.owner, asset.price),
            None => return reverted(receipt, format!("unknown asset {asset_id}")),
        };
        if value < price {
            return reverted(receipt, "payment below asking price".to_string());
        }
        let balance = state.balances.get(&from).copied().unwrap_or_default();
        if balance < value {
            return reverted(receipt, "insufficient funds for value".to_string());
        }

        state.balances.insert(from, balance - value);
        let revenue = state.revenue.entry(seller).or_default();
        *revenue = revenue.saturating_add(value);
        if let Some(asset) = state.assets.get_mut(&asset_id) {
            asset.owner = from;
        }

        let event = IDataMarket::AssetPurchased {
            assetId: U256::from(asset_id),
            buyer: from,
            price: value,
        };
        receipt.logs.push(Log {
            address: contract,
            data: event.encode_log_data(),
        });
        return receipt;
    }

    if let Ok(call) = IDataMarket::removeAssetCall::abi_decode(input) {
        let asset_id = call.assetId.to::<u64>();
        match state.assets.get(&asset_id) {
            None => return reverted(receipt, format!("unknown asset {asset_id}")),
            Some(asset) if asset.owner != from => {
                return reverted(receipt, "caller does not own asset".to_string());
            }
            Some(_) => {
                state.assets.remove(&asset_id);
            }
        }
        return receipt;
    }

    if IDataMarket::withdrawCall::abi_decode(input).is_ok() {
        let amount = state.revenue.remove(&from).unwrap_or_default();
        let balance = state.balances.entry(from).or_default();
        *balance = balance.saturating_add(amount);
        return receipt;
    }

    reverted(receipt, "unknown method".to_string())
}

fn reverted(mut receipt: TxReceipt, reason: String) -> TxReceipt {
    receipt.success = false;
    receipt.revert_reason = Some(reason);
    receipt.logs.clear();
    receipt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::contract::creation_event;
    use alloy::consensus::{SignableTransaction, TxEip1559};
    use alloy::eips::eip2718::Encodable2718;
    use alloy::network::TxSignerSync;
    use alloy::primitives::TxKind;
    use alloy::signers::local::PrivateKeySigner;

    fn market() -> Address {
        Address::repeat_byte(0x42)
    }

    fn signed_create(
        signer: &PrivateKeySigner,
        contract: Address,
        nonce: u64,
        content_ref: &str,
        price: U256,
    ) -> Vec<u8> {
        let mut tx = TxEip1559 {
            chain_id: MEMORY_CHAIN_ID,
            nonce,
            gas_limit: 300_000,
            max_fee_per_gas: MEMORY_GAS_PRICE,
            max_priority_fee_per_gas: 0,
            to: TxKind::Call(contract),
            input: IDataMarket::createAssetCall {
                contentRef: content_ref.to_string(),
                price,
            }
            .abi_encode()
            .into(),
            ..Default::default()
        };
        let signature = signer.sign_transaction_sync(&mut tx).unwrap();
        TxEnvelope::Eip1559(tx.into_signed(signature)).encoded_2718()
    }

    #[tokio::test]
    async fn creation_assigns_id_and_emits_event() {
        let ledger = MemoryLedger::new(market());
        let signer = PrivateKeySigner::random();

        let raw = signed_create(&signer, market(), 0, "sha256:aa", U256::from(100));
        let hash = ledger.send_raw_transaction(raw).await.unwrap();

        let receipt = ledger.receipt(hash).await.unwrap().unwrap();
        assert!(receipt.success);

        let event = creation_event(&receipt.logs, market()).unwrap();
        assert_eq!(event.assetId, U256::from(1));
        assert_eq!(event.owner, signer.address());
        assert_eq!(ledger.asset_owner(1).await, Some(signer.address()));
    }

    #[tokio::test]
    async fn out_of_order_sequence_is_rejected() {
        let ledger = MemoryLedger::new(market());
        let signer = PrivateKeySigner::random();

        let raw = signed_create(&signer, market(), 5, "sha256:aa", U256::from(100));
        let result = ledger.send_raw_transaction(raw).await;
        assert!(matches!(result, Err(LedgerError::Rejected(_))));

        // Sequence numbers are consumed in order, exactly once
        let first = signed_create(&signer, market(), 0, "sha256:aa", U256::from(100));
        ledger.send_raw_transaction(first.clone()).await.unwrap();
        let replayed = ledger.send_raw_transaction(first).await;
        assert!(matches!(replayed, Err(LedgerError::Rejected(_))));
    }

    #[tokio::test]
    async fn readonly_calls_report_ownership_and_price() {
        let ledger = MemoryLedger::new(market());
        let signer = PrivateKeySigner::random();

        let raw = signed_create(&signer, market(), 0, "sha256:aa", U256::from(250));
        ledger.send_raw_transaction(raw).await.unwrap();

        let data = IDataMarket::checkOwnershipCall {
            assetId: U256::from(1),
            claimant: signer.address(),
        }
        .abi_encode();
        let out = ledger.call(market(), data.into()).await.unwrap();
        assert!(IDataMarket::checkOwnershipCall::abi_decode_returns(&out).unwrap());

        let data = IDataMarket::assetPriceCall {
            assetId: U256::from(1),
        }
        .abi_encode();
        let out = ledger.call(market(), data.into()).await.unwrap();
        assert_eq!(
            IDataMarket::assetPriceCall::abi_decode_returns(&out).unwrap(),
            U256::from(250)
        );
    }

    #[tokio::test]
    async fn paused_mining_defers_receipts() {
        let ledger = MemoryLedger::new(market());
        let signer = PrivateKeySigner::random();

        ledger.pause_mining().await;
        let raw = signed_create(&signer, market(), 0, "sha256:aa", U256::from(1));
        let hash = ledger.send_raw_transaction(raw).await.unwrap();
        assert!(ledger.receipt(hash).await.unwrap().is_none());

        ledger.mine_pending().await;
        assert!(ledger.receipt(hash).await.unwrap().is_some());
    }
}
