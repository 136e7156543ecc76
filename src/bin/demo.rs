// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Didmarket Developers

//! End-to-end marketplace demo against the in-process ledger.
//!
//! Drives the full flow a routing layer would: connect and authenticate two
//! wallets, list a static asset and a stream, purchase, access, subscribe,
//! and withdraw revenue. Useful as living documentation of the boundary.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use tracing_subscriber::EnvFilter;

use didmarket::config::Settings;
use didmarket::external::{MemoryContentStore, MemoryStreamBus};
use didmarket::identity::{challenge_message, IdentityRegistry};
use didmarket::ledger::{LedgerGateway, MemoryLedger, WithdrawOutcome};
use didmarket::market::{AssetContent, AssetRegistry};
use didmarket::proof::ProofEngine;
use didmarket::service::{AssetPayload, MarketService, NewAsset};
use didmarket::vault::KeyVault;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env();
    let master_secret = settings
        .master_secret
        .unwrap_or_else(|| "demo-master-secret".to_string());

    let vault_path = std::env::temp_dir()
        .join("didmarket-demo")
        .join(format!("vault-{}.json", std::process::id()));
    let vault = Arc::new(KeyVault::open(&vault_path, &master_secret)?);

    let contract = Address::repeat_byte(0x42);
    let ledger = Arc::new(MemoryLedger::new(contract));
    let gateway = Arc::new(LedgerGateway::new(ledger.clone(), contract));

    let identity = Arc::new(IdentityRegistry::new(vault.clone()));
    let proofs = Arc::new(ProofEngine::new(vault));
    let assets = Arc::new(AssetRegistry::new(gateway.clone()));
    let streams = Arc::new(MemoryStreamBus::new());

    let service = MarketService::new(
        identity,
        proofs,
        gateway.clone(),
        assets,
        Arc::new(MemoryContentStore::new()),
        streams,
        settings.proof_max_age_secs,
    );

    // Two custodial wallets: a data producer and a consumer
    let producer = PrivateKeySigner::random();
    let consumer = PrivateKeySigner::random();
    gateway.register_signer(producer.clone()).await;
    gateway.register_signer(consumer.clone()).await;
    ledger
        .fund(consumer.address(), U256::from(1_000_000u64))
        .await;

    // Connect + authenticate both wallets
    let producer_did = login(&service, &producer).await?;
    let consumer_did = login(&service, &consumer).await?;
    println!("producer DID: {producer_did}");
    println!("consumer DID: {consumer_did}");

    // Producer lists a static dataset
    let created = service
        .create_asset(
            &producer.address().to_string(),
            NewAsset {
                name: "weather-data".to_string(),
                description: "hourly sensor readings".to_string(),
                price: U256::from(2_500u64),
                payload: AssetPayload::Static {
                    data: b"temperature,humidity\n21,40\n22,38\n".to_vec(),
                },
            },
        )
        .await?;
    println!(
        "listed asset {} (tx {})",
        created.asset_id, created.tx_hash
    );

    // Consumer purchases it with a fresh DID-bound proof
    let proof = service
        .issue_proof(
            &consumer.address().to_string(),
            &format!("purchase:{}", created.asset_id),
        )
        .await?;
    let tx_hash = service
        .purchase(created.asset_id, &consumer.address().to_string(), &proof)
        .await?;
    println!("purchase confirmed (tx {tx_hash})");

    // Access now resolves for the consumer
    match service
        .access_asset(created.asset_id, &consumer.address().to_string())
        .await?
    {
        AssetContent::Static { content_ref } => println!("consumer access: {content_ref}"),
        AssetContent::Stream { stream_id } => println!("consumer access: stream {stream_id}"),
    }

    // Producer lists a stream; the consumer subscribes to it
    service
        .create_asset(
            &producer.address().to_string(),
            NewAsset {
                name: "ticker".to_string(),
                description: "live prices".to_string(),
                price: U256::from(100u64),
                payload: AssetPayload::Stream {
                    stream_id: "stream-7".to_string(),
                },
            },
        )
        .await?;
    let subscription = service
        .subscribe_stream("stream-7", &consumer.address().to_string())
        .await?;
    println!("stream subscription: {subscription}");

    // Producer withdraws the sale revenue
    match service
        .withdraw_revenue(&producer.address().to_string())
        .await?
    {
        WithdrawOutcome::Submitted { tx_hash } => println!("withdrawal confirmed (tx {tx_hash})"),
        WithdrawOutcome::NothingToWithdraw => println!("nothing to withdraw"),
    }

    Ok(())
}

/// Connect, sign the challenge, authenticate; returns the bound DID.
async fn login(
    service: &MarketService,
    signer: &PrivateKeySigner,
) -> Result<String, Box<dyn std::error::Error>> {
    let address = signer.address().to_string();
    let nonce = service.connect(&address).await?;
    let signature = signer.sign_message_sync(challenge_message(&nonce).as_bytes())?;
    let auth = service
        .authenticate(&address, &alloy::hex::encode(signature.as_bytes()))
        .await?;
    Ok(auth.did)
}
