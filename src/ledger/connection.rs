// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Didmarket Developers

//! The ledger connection abstraction and its RPC implementation.
//!
//! The gateway talks to the settlement chain exclusively through the
//! [`Ledger`] trait so chain access stays injectable and testable:
//! production wires [`RpcLedger`] over HTTP, tests and the demo wire the
//! in-process [`super::MemoryLedger`].

use alloy::network::Ethereum;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller,
};
use alloy::providers::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;

use super::types::TxReceipt;

/// HTTP provider type for the settlement chain (with all fillers).
type HttpProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<Ethereum>,
>;

/// Errors from the ledger transport.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Execution reverted: {0}")]
    Reverted(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),
}

/// Generic ledger capability consumed by the gateway.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Read-only contract call; no transaction, no state change.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, LedgerError>;

    /// Broadcast a signed, serialized transaction and return its hash.
    async fn send_raw_transaction(&self, raw: Vec<u8>) -> Result<B256, LedgerError>;

    /// Receipt for a transaction, if it has been included yet.
    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, LedgerError>;

    /// Next unused sequence number for an address, counting pending
    /// transactions so back-to-back submissions never collide.
    async fn sequence_number(&self, address: Address) -> Result<u64, LedgerError>;

    /// Native balance of an address.
    async fn balance(&self, address: Address) -> Result<U256, LedgerError>;

    /// Current gas price quoted by the ledger.
    async fn gas_price(&self) -> Result<u128, LedgerError>;

    /// Chain id transactions must be bound to.
    fn chain_id(&self) -> u64;
}

/// Ledger connection over JSON-RPC HTTP.
pub struct RpcLedger {
    provider: HttpProvider,
    chain_id: u64,
}

impl RpcLedger {
    /// Connect to an RPC endpoint.
    pub fn connect(rpc_url: &str, chain_id: u64) -> Result<Self, LedgerError> {
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e: url::ParseError| LedgerError::InvalidRpcUrl(e.to_string()))?;

        let provider = ProviderBuilder::new().connect_http(url);

        Ok(Self { provider, chain_id })
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, LedgerError> {
        let tx = TransactionRequest::default().to(to).input(data.into());
        self.provider
            .call(tx)
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    async fn send_raw_transaction(&self, raw: Vec<u8>) -> Result<B256, LedgerError> {
        let pending = self
            .provider
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| LedgerError::Rejected(e.to_string()))?;
        Ok(*pending.tx_hash())
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, LedgerError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;

        Ok(receipt.map(|r| TxReceipt {
            tx_hash: r.transaction_hash,
            block_number: r.block_number.unwrap_or_default(),
            gas_used: r.gas_used as u64,
            success: r.status(),
            revert_reason: None,
            logs: r.logs().iter().map(|log| log.inner.clone()).collect(),
        }))
    }

    async fn sequence_number(&self, address: Address) -> Result<u64, LedgerError> {
        self.provider
            .get_transaction_count(address)
            .pending()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    async fn balance(&self, address: Address) -> Result<U256, LedgerError> {
        self.provider
            .get_balance(address)
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    async fn gas_price(&self) -> Result<u128, LedgerError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }
}
