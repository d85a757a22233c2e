//! In-process backend.
//!
//! Keeps everything in memory. Useful as a local demo backend and as a test
//! double: reachability, per-operation failures and latency can all be
//! injected at runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use super::{
    newest_first, BlobLocator, RemoteError, RemoteId, RemoteRecord, RemoteSyncAdapter, Result,
};
use crate::types::{LocationReading, SubmissionId, Timestamp};

/// An in-memory [`RemoteSyncAdapter`].
#[derive(Default)]
pub struct MemoryAdapter {
    records: RwLock<Vec<RemoteRecord>>,
    blobs: RwLock<HashMap<BlobLocator, Vec<u8>>>,
    next_id: AtomicU64,
    unreachable: AtomicBool,
    fail_uploads: AtomicBool,
    fail_inserts: AtomicBool,
    /// Simulated per-call latency in milliseconds (0 = no delay).
    latency_ms: AtomicU64,
}

impl std::fmt::Debug for MemoryAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAdapter")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("unreachable", &self.unreachable.load(Ordering::Relaxed))
            .finish()
    }
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the backend look offline. Every call then fails with `Unreachable`.
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Insert a fully formed record, bypassing upload. For seeding.
    pub async fn seed(&self, record: RemoteRecord) {
        self.records.write().await.push(record);
    }

    /// Bytes stored under a locator.
    pub async fn blob(&self, locator: &BlobLocator) -> Option<Vec<u8>> {
        self.blobs.read().await.get(locator).cloned()
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn blob_count(&self) -> usize {
        self.blobs.read().await.len()
    }

    async fn enter(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable("memory backend is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSyncAdapter for MemoryAdapter {
    fn name(&self) -> &str {
        "memory"
    }

    async fn is_reachable(&self) -> bool {
        !self.unreachable.load(Ordering::SeqCst)
    }

    async fn upload_blob(&self, bytes: &[u8], correlation_id: &str) -> Result<BlobLocator> {
        self.enter().await?;
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(RemoteError::Rejected("upload refused".into()));
        }

        let digest = hex::encode(Sha256::digest(bytes));
        let locator = BlobLocator(format!("memory://selfies/{}-{}", correlation_id, &digest[..16]));
        self.blobs
            .write()
            .await
            .insert(locator.clone(), bytes.to_vec());
        Ok(locator)
    }

    async fn insert_record(
        &self,
        user_code: &str,
        submission_id: &SubmissionId,
        location: &LocationReading,
        image: &BlobLocator,
    ) -> Result<RemoteId> {
        self.enter().await?;
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(RemoteError::Rejected("insert refused".into()));
        }
        if !self.blobs.read().await.contains_key(image) {
            return Err(RemoteError::Rejected(format!("unknown image locator {image}")));
        }

        let id = RemoteId(format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1));
        self.records.write().await.push(RemoteRecord {
            id: id.clone(),
            user_code: user_code.to_string(),
            submission_id: submission_id.clone(),
            location: *location,
            image: image.clone(),
            created_at: Timestamp::now(),
        });
        Ok(id)
    }

    async fn list_all(&self) -> Result<Vec<RemoteRecord>> {
        self.enter().await?;
        let mut records = self.records.read().await.clone();
        newest_first(&mut records);
        Ok(records)
    }
}
