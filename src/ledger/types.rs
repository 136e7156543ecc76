// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Didmarket Developers

//! Ledger types and gas constants.

use std::time::Duration;

use alloy::primitives::{Log, B256};

/// Fixed gas limit applied to marketplace mutating calls.
pub const DEFAULT_GAS_LIMIT: u64 = 300_000;

/// Standard priority fee attached to submissions (1.5 gwei).
pub const PRIORITY_FEE: u128 = 1_500_000_000;

/// Default bound on a confirmation wait.
pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for a receipt.
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Confirmation record returned by the ledger once a transaction is included.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    /// Transaction hash
    pub tx_hash: B256,
    /// Block number where the transaction was included
    pub block_number: u64,
    /// Gas actually used
    pub gas_used: u64,
    /// Whether execution succeeded
    pub success: bool,
    /// Revert reason, where the ledger surfaced one
    pub revert_reason: Option<String>,
    /// Events emitted during execution
    pub logs: Vec<Log>,
}
