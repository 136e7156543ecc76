// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Didmarket Developers

//! # Ledger Integration
//!
//! Settlement-chain plumbing for the marketplace:
//!
//! - `connection` - the [`Ledger`] transport abstraction and its JSON-RPC
//!   implementation
//! - `contract` - marketplace contract bindings and event decoding
//! - `gateway` - transaction building, signing, sequencing and confirmation
//! - `memory` - deterministic in-process ledger for demos and tests
//!
//! The ledger is the source of ground truth for asset ownership; everything
//! off-chain is a cache reconciled against it.

pub mod connection;
pub mod contract;
pub mod gateway;
pub mod memory;
pub mod types;

pub use connection::{Ledger, LedgerError, RpcLedger};
pub use contract::IDataMarket;
pub use gateway::{GatewayError, LedgerGateway, SubmittedAsset, WithdrawOutcome};
pub use memory::MemoryLedger;
pub use types::TxReceipt;
