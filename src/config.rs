// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Didmarket Developers

//! # Runtime Configuration
//!
//! Environment variable names and default values used throughout the
//! application. Configuration is loaded from the environment at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `LEDGER_RPC_URL` | JSON-RPC endpoint of the settlement chain | `http://127.0.0.1:8545` |
//! | `LEDGER_CHAIN_ID` | Chain id transactions are bound to | `31337` |
//! | `MARKET_CONTRACT_ADDRESS` | Deployed marketplace contract | Required for RPC deployments |
//! | `VAULT_PATH` | Path of the encrypted key vault file | `/data/vault/keys.json` |
//! | `VAULT_MASTER_SECRET` | Master secret for the vault KDF | Required for production |
//! | `PROOF_MAX_AGE_SECS` | Max accepted age of a proof timestamp | `300` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::env;
use std::path::PathBuf;

/// Environment variable for the ledger RPC endpoint.
pub const LEDGER_RPC_URL_ENV: &str = "LEDGER_RPC_URL";

/// Environment variable for the settlement chain id.
pub const LEDGER_CHAIN_ID_ENV: &str = "LEDGER_CHAIN_ID";

/// Environment variable for the marketplace contract address.
pub const MARKET_CONTRACT_ADDRESS_ENV: &str = "MARKET_CONTRACT_ADDRESS";

/// Environment variable for the vault file path.
pub const VAULT_PATH_ENV: &str = "VAULT_PATH";

/// Environment variable for the vault master secret.
pub const VAULT_MASTER_SECRET_ENV: &str = "VAULT_MASTER_SECRET";

/// Environment variable for the proof freshness window.
pub const PROOF_MAX_AGE_ENV: &str = "PROOF_MAX_AGE_SECS";

/// Default local development RPC endpoint.
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// Default local development chain id.
pub const DEFAULT_CHAIN_ID: u64 = 31_337;

/// Default vault location on the data mount.
pub const DEFAULT_VAULT_PATH: &str = "/data/vault/keys.json";

/// Default proof freshness window in seconds.
pub const DEFAULT_PROOF_MAX_AGE_SECS: i64 = 300;

/// Settings resolved from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub rpc_url: String,
    pub chain_id: u64,
    pub contract_address: Option<String>,
    pub vault_path: PathBuf,
    pub master_secret: Option<String>,
    pub proof_max_age_secs: i64,
}

impl Settings {
    /// Load settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            rpc_url: env::var(LEDGER_RPC_URL_ENV).unwrap_or_else(|_| DEFAULT_RPC_URL.to_string()),
            chain_id: parse_or(env::var(LEDGER_CHAIN_ID_ENV).ok(), DEFAULT_CHAIN_ID),
            contract_address: env::var(MARKET_CONTRACT_ADDRESS_ENV).ok(),
            vault_path: env::var(VAULT_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_VAULT_PATH)),
            master_secret: env::var(VAULT_MASTER_SECRET_ENV).ok(),
            proof_max_age_secs: parse_or(
                env::var(PROOF_MAX_AGE_ENV).ok(),
                DEFAULT_PROOF_MAX_AGE_SECS,
            ),
        }
    }
}

/// Parse an optional env value, falling back on absence or garbage.
fn parse_or<T: std::str::FromStr + Copy>(raw: Option<String>, default: T) -> T {
    raw.and_then(|value| value.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_or_accepts_valid_values() {
        assert_eq!(parse_or(Some("43113".to_string()), DEFAULT_CHAIN_ID), 43113);
        assert_eq!(
            parse_or(Some("60".to_string()), DEFAULT_PROOF_MAX_AGE_SECS),
            60
        );
    }

    #[test]
    fn parse_or_falls_back_on_garbage() {
        assert_eq!(
            parse_or(Some("not-a-number".to_string()), DEFAULT_CHAIN_ID),
            DEFAULT_CHAIN_ID
        );
        assert_eq!(parse_or::<u64>(None, DEFAULT_CHAIN_ID), DEFAULT_CHAIN_ID);
    }
}
