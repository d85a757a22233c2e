//! In-memory lookups over the record log.

use crate::types::{BlobId, CheckinRecord, RecordId, SubmissionId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// Index mapping record ids to log offsets, in insertion order.
#[derive(Default)]
pub struct RecordIndex {
    /// (id, offset) in append order.
    order: RwLock<Vec<(RecordId, u64)>>,

    /// Record ID to offset.
    id_to_offset: RwLock<HashMap<RecordId, u64>>,

    /// Submission id to the first record that used it.
    by_submission: RwLock<HashMap<SubmissionId, RecordId>>,

    /// User code to record ids.
    by_user: RwLock<HashMap<String, Vec<RecordId>>>,

    /// Blob ids referenced by at least one record.
    blob_refs: RwLock<HashSet<BlobId>>,
}

impl RecordIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry to the index.
    ///
    /// Returns `false` if the record's submission id was already indexed.
    pub fn add(&self, record: &CheckinRecord, offset: u64) -> bool {
        self.order.write().push((record.id, offset));
        self.id_to_offset.write().insert(record.id, offset);

        self.by_user
            .write()
            .entry(record.user_code.clone())
            .or_default()
            .push(record.id);

        self.blob_refs.write().insert(record.blob_id.clone());

        let mut by_submission = self.by_submission.write();
        if by_submission.contains_key(&record.submission_id) {
            false
        } else {
            by_submission.insert(record.submission_id.clone(), record.id);
            true
        }
    }

    /// Get offset for a record ID.
    pub fn get_offset(&self, id: RecordId) -> Option<u64> {
        self.id_to_offset.read().get(&id).copied()
    }

    /// Offsets of every record, oldest first.
    pub fn offsets(&self) -> Vec<u64> {
        self.order.read().iter().map(|(_, offset)| *offset).collect()
    }

    /// Record that first used a submission id.
    pub fn find_submission(&self, submission_id: &SubmissionId) -> Option<RecordId> {
        self.by_submission.read().get(submission_id).copied()
    }

    pub fn contains_submission(&self, submission_id: &SubmissionId) -> bool {
        self.by_submission.read().contains_key(submission_id)
    }

    /// Get all record IDs for a user, oldest first.
    pub fn get_by_user(&self, user_code: &str) -> Vec<RecordId> {
        self.by_user
            .read()
            .get(user_code)
            .cloned()
            .unwrap_or_default()
    }

    pub fn references_blob(&self, blob_id: &BlobId) -> bool {
        self.blob_refs.read().contains(blob_id)
    }

    /// Get count of records.
    pub fn count(&self) -> usize {
        self.order.read().len()
    }

    /// Forget every entry.
    pub fn clear(&self) {
        self.order.write().clear();
        self.id_to_offset.write().clear();
        self.by_submission.write().clear();
        self.by_user.write().clear();
        self.blob_refs.write().clear();
    }
}
