//! Remote sync adapters.
//!
//! This module provides the [`RemoteSyncAdapter`] trait that every remote
//! backend implements. The sync orchestrator and any admin read surface talk
//! to a `dyn RemoteSyncAdapter` and never to a concrete backend.

mod http;
mod memory;

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, TimeZone};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{LocationReading, SubmissionId, Timestamp};

pub use http::{HttpAdapter, InsertRequest, CONTENT_DIGEST_HEADER, CORRELATION_HEADER};
pub use memory::MemoryAdapter;

/// Errors from a remote backend.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response from backend: {0}")]
    InvalidResponse(String),

    #[error("backend rejected the request: {0}")]
    Rejected(String),

    #[error("invalid backend configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for remote operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Where a backend put an uploaded image.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobLocator(pub String);

impl fmt::Display for BlobLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend-assigned record id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(pub String);

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A check-in as a backend stores it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: RemoteId,
    pub user_code: String,
    pub submission_id: SubmissionId,
    pub location: LocationReading,
    pub image: BlobLocator,
    pub created_at: Timestamp,
}

/// Aggregate figures for the admin view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStats {
    pub total: u64,

    /// Distinct user codes.
    pub unique_users: u64,

    /// Created on the current calendar day.
    pub today_count: u64,

    /// Created within the trailing 7 days.
    pub last_7_days_count: u64,
}

impl RemoteStats {
    /// Aggregate `records` relative to `now`.
    ///
    /// The calendar day is taken in `now`'s time zone.
    pub fn from_records<Tz: TimeZone>(records: &[RemoteRecord], now: &DateTime<Tz>) -> Self {
        let tz = now.timezone();
        let today = now.date_naive();
        let week_ago = Timestamp::from_datetime(&(now.clone() - Duration::days(7)));

        let mut users = HashSet::new();
        let mut stats = RemoteStats {
            total: records.len() as u64,
            ..Default::default()
        };

        for record in records {
            users.insert(record.user_code.as_str());

            if record
                .created_at
                .to_datetime(&tz)
                .is_some_and(|created| created.date_naive() == today)
            {
                stats.today_count += 1;
            }
            if record.created_at >= week_ago {
                stats.last_7_days_count += 1;
            }
        }

        stats.unique_users = users.len() as u64;
        stats
    }
}

/// Sort newest first, the order every listing returns.
pub(crate) fn newest_first(records: &mut [RemoteRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Contract shared by all remote backends.
///
/// Swapping one implementation for another must not change observable
/// behavior for callers.
///
/// # Example
///
/// ```ignore
/// use checkin_store::remote::{RemoteSyncAdapter, Result};
///
/// async fn print_stats(remote: &dyn RemoteSyncAdapter) -> Result<()> {
///     let stats = remote.compute_stats().await?;
///     println!("{} check-ins from {} users", stats.total, stats.unique_users);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait RemoteSyncAdapter: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Cheap reachability probe.
    ///
    /// The default implementation assumes the backend is reachable.
    async fn is_reachable(&self) -> bool {
        true
    }

    /// Upload image bytes. `correlation_id` ties the upload to its submission.
    async fn upload_blob(&self, bytes: &[u8], correlation_id: &str) -> Result<BlobLocator>;

    /// Insert the record that points at an uploaded image.
    async fn insert_record(
        &self,
        user_code: &str,
        submission_id: &SubmissionId,
        location: &LocationReading,
        image: &BlobLocator,
    ) -> Result<RemoteId>;

    /// Every record, newest first.
    async fn list_all(&self) -> Result<Vec<RemoteRecord>>;

    /// One user's records, newest first.
    async fn list_by_user(&self, user_code: &str) -> Result<Vec<RemoteRecord>> {
        let mut records = self.list_all().await?;
        records.retain(|r| r.user_code == user_code);
        Ok(records)
    }

    /// Aggregate stats, with "today" in the collector's local time zone.
    async fn compute_stats(&self) -> Result<RemoteStats> {
        let records = self.list_all().await?;
        Ok(RemoteStats::from_records(&records, &Local::now()))
    }
}
