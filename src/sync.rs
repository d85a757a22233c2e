//! Local-first submission with best-effort remote mirroring.
//!
//! A submission succeeds or fails on the local commit alone. Only after the
//! record is durable is the configured remote tried, once. Remote failures
//! are logged and reported in [`SyncOutcome`]; they are never returned as
//! errors, never retried and never queued.

use std::sync::Arc;

use crate::config::{ConfigError, SyncConfig};
use crate::error::{CheckinError, CheckinResult, StoreError};
use crate::remote::{BlobLocator, RemoteId, RemoteSyncAdapter};
use crate::store::CheckinStore;
use crate::types::{CheckinRecord, LocationReading, SubmissionId};

/// One check-in as captured in the field.
#[derive(Clone, Debug)]
pub struct CheckinSubmission {
    pub user_code: String,
    pub location: LocationReading,
    pub image: Vec<u8>,
    pub submission_id: SubmissionId,
}

/// What happened on the remote side of a submission.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncOutcome {
    /// Mirrored to the remote backend.
    Synced {
        remote_id: RemoteId,
        locator: BlobLocator,
    },

    /// Stored locally, not synced.
    StoredLocally { reason: String },

    /// No remote backend is configured.
    LocalOnly,
}

impl SyncOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced { .. })
    }
}

/// Result of a successful submission.
#[derive(Clone, Debug)]
pub struct SubmitReport {
    pub record: CheckinRecord,
    pub sync: SyncOutcome,
}

/// Commits locally, then tries one remote backend.
pub struct SyncOrchestrator {
    store: Arc<CheckinStore>,
    remote: Option<Arc<dyn RemoteSyncAdapter>>,
    probe_reachability: bool,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<CheckinStore>, remote: Option<Arc<dyn RemoteSyncAdapter>>) -> Self {
        Self {
            store,
            remote,
            probe_reachability: true,
        }
    }

    /// Build with the backend named in `config`.
    pub fn from_config(store: Arc<CheckinStore>, config: &SyncConfig) -> Result<Self, ConfigError> {
        let remote = config.backend.build()?;
        Ok(Self::new(store, remote).with_reachability_probe(config.probe_reachability))
    }

    /// Whether to ask the backend if it is reachable before uploading.
    pub fn with_reachability_probe(mut self, probe: bool) -> Self {
        self.probe_reachability = probe;
        self
    }

    pub fn store(&self) -> &Arc<CheckinStore> {
        &self.store
    }

    pub fn remote(&self) -> Option<&Arc<dyn RemoteSyncAdapter>> {
        self.remote.as_ref()
    }

    /// Submit a check-in.
    ///
    /// Errors only when the local commit fails. The local commit happens on
    /// the blocking pool and completes before any remote call starts.
    pub async fn submit(&self, submission: CheckinSubmission) -> CheckinResult<SubmitReport> {
        let store = Arc::clone(&self.store);
        let CheckinSubmission {
            user_code,
            location,
            image,
            submission_id,
        } = submission;

        let (committed, image) = tokio::task::spawn_blocking(move || {
            let committed =
                store.store_complete_checkin(&user_code, location, &image, submission_id);
            (committed, image)
        })
        .await
        .map_err(|e| CheckinError::Storage(StoreError::Io(std::io::Error::other(e))))?;
        let record = committed?;

        let sync = self.mirror(&record, &image).await;
        Ok(SubmitReport { record, sync })
    }

    /// Try the remote once. Never fails.
    async fn mirror(&self, record: &CheckinRecord, image: &[u8]) -> SyncOutcome {
        let Some(remote) = &self.remote else {
            return SyncOutcome::LocalOnly;
        };

        if self.probe_reachability && !remote.is_reachable().await {
            tracing::warn!(
                backend = remote.name(),
                submission_id = %record.submission_id,
                "remote unreachable; stored locally, not synced"
            );
            return SyncOutcome::StoredLocally {
                reason: format!("{} backend unreachable", remote.name()),
            };
        }

        let pushed = async {
            let locator = remote
                .upload_blob(image, record.submission_id.as_str())
                .await?;
            let remote_id = remote
                .insert_record(
                    &record.user_code,
                    &record.submission_id,
                    &record.location,
                    &locator,
                )
                .await?;
            Ok::<_, crate::remote::RemoteError>((remote_id, locator))
        };

        match pushed.await {
            Ok((remote_id, locator)) => {
                tracing::info!(
                    backend = remote.name(),
                    record_id = %record.id,
                    %remote_id,
                    "check-in synced"
                );
                SyncOutcome::Synced { remote_id, locator }
            }
            Err(e) => {
                tracing::warn!(
                    backend = remote.name(),
                    record_id = %record.id,
                    error = %e,
                    "remote sync failed; stored locally, not synced"
                );
                SyncOutcome::StoredLocally {
                    reason: e.to_string(),
                }
            }
        }
    }
}
