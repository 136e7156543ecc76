// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Didmarket Developers

//! External collaborator interfaces: content storage and stream transport.
//!
//! The marketplace consumes these, it does not implement them. The in-memory
//! implementations here back the demo binary and the test suites.

use std::collections::HashMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

/// Errors from external collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ExternalError {
    #[error("Content {0} not found")]
    ContentNotFound(String),

    #[error("Content store error: {0}")]
    Store(String),

    #[error("Stream bus error: {0}")]
    Stream(String),
}

/// Content-addressed byte storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store a blob and return its content-addressed reference.
    async fn store(&self, bytes: Vec<u8>) -> Result<String, ExternalError>;

    /// Fetch a blob by reference.
    async fn retrieve(&self, content_ref: &str) -> Result<Vec<u8>, ExternalError>;

    /// Delete a blob by reference.
    async fn delete(&self, content_ref: &str) -> Result<(), ExternalError>;
}

/// Publish/subscribe transport for stream assets.
///
/// Both operations carry the caller's DID and a proof-of-possession so the
/// transport can authorize them.
#[async_trait]
pub trait StreamBus: Send + Sync {
    async fn publish(
        &self,
        stream_id: &str,
        payload: Vec<u8>,
        did: &str,
        proof: &[u8],
    ) -> Result<(), ExternalError>;

    async fn subscribe(
        &self,
        stream_id: &str,
        did: &str,
        proof: &[u8],
    ) -> Result<String, ExternalError>;
}

/// In-process content store addressing blobs by SHA-256 digest.
#[derive(Default)]
pub struct MemoryContentStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn store(&self, bytes: Vec<u8>) -> Result<String, ExternalError> {
        let content_ref = format!("sha256:{}", alloy::hex::encode(Sha256::digest(&bytes)));
        self.blobs.lock().await.insert(content_ref.clone(), bytes);
        Ok(content_ref)
    }

    async fn retrieve(&self, content_ref: &str) -> Result<Vec<u8>, ExternalError> {
        self.blobs
            .lock()
            .await
            .get(content_ref)
            .cloned()
            .ok_or_else(|| ExternalError::ContentNotFound(content_ref.to_string()))
    }

    async fn delete(&self, content_ref: &str) -> Result<(), ExternalError> {
        self.blobs
            .lock()
            .await
            .remove(content_ref)
            .map(|_| ())
            .ok_or_else(|| ExternalError::ContentNotFound(content_ref.to_string()))
    }
}

/// In-process stream bus recording publishes and subscriptions.
#[derive(Default)]
pub struct MemoryStreamBus {
    published: Mutex<Vec<(String, Vec<u8>)>>,
    subscriptions: Mutex<Vec<(String, String)>>,
}

impl MemoryStreamBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads published so far.
    pub async fn published_count(&self) -> usize {
        self.published.lock().await.len()
    }

    /// Recorded (stream id, DID) subscription pairs.
    pub async fn subscriptions(&self) -> Vec<(String, String)> {
        self.subscriptions.lock().await.clone()
    }
}

#[async_trait]
impl StreamBus for MemoryStreamBus {
    async fn publish(
        &self,
        stream_id: &str,
        payload: Vec<u8>,
        did: &str,
        proof: &[u8],
    ) -> Result<(), ExternalError> {
        if did.is_empty() || proof.is_empty() {
            return Err(ExternalError::Stream("missing credentials".to_string()));
        }
        self.published
            .lock()
            .await
            .push((stream_id.to_string(), payload));
        Ok(())
    }

    async fn subscribe(
        &self,
        stream_id: &str,
        did: &str,
        proof: &[u8],
    ) -> Result<String, ExternalError> {
        if did.is_empty() || proof.is_empty() {
            return Err(ExternalError::Stream("missing credentials".to_string()));
        }
        let mut subscriptions = self.subscriptions.lock().await;
        subscriptions.push((stream_id.to_string(), did.to_string()));
        Ok(format!("sub-{}", subscriptions.len()))
    }
}
