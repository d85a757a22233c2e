//! Derived storage statistics.

use crate::error::{CheckinResult, Result, StoreError};
use crate::store::CheckinStore;
use crate::types::StorageStats;

impl CheckinStore {
    /// Recompute counts and the storage estimate.
    ///
    /// `storage_size` is the JSON size of all metadata plus
    /// `per_image_size_estimate` per check-in. It is an estimate; use
    /// [`CheckinStore::disk_usage`] for bytes actually on disk.
    pub fn get_stats(&self) -> CheckinResult<StorageStats> {
        let records = self.list()?;
        let metadata_size = serde_json::to_vec(&records)
            .map_err(StoreError::from)?
            .len() as u64;

        let total_checkins = records.len() as u64;
        let total_images = self.blobs.count()? as u64;
        if total_images > total_checkins {
            tracing::debug!(
                orphans = total_images - total_checkins,
                "more images than check-ins"
            );
        }

        Ok(StorageStats {
            total_checkins,
            total_images,
            storage_size: metadata_size
                + self.config().per_image_size_estimate * total_checkins,
        })
    }

    /// Bytes held by the log and blob files.
    pub fn disk_usage(&self) -> Result<u64> {
        Ok(self.log.size() + self.blobs.total_size()?)
    }
}
