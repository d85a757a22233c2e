//! One-way export of the whole store as a self-contained JSON document.
//!
//! Blob bytes are base64-encoded so the snapshot is text-safe. There is no
//! import path.

use std::collections::BTreeMap;
use std::io::Write;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{CheckinError, CheckinResult, StoreError};
use crate::store::CheckinStore;
use crate::types::{BlobId, CheckinRecord};

/// Portable image of the store at one point in time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Records in insertion order.
    pub records: Vec<CheckinRecord>,

    /// Base64 blob bytes keyed by blob id.
    pub blobs_by_id: BTreeMap<BlobId, String>,
}

impl StoreSnapshot {
    /// Blob ids referenced by a record but absent from the mapping.
    pub fn missing_blobs(&self) -> Vec<&BlobId> {
        self.records
            .iter()
            .map(|r| &r.blob_id)
            .filter(|id| !self.blobs_by_id.contains_key(*id))
            .collect()
    }

    /// Whether every record's blob resolves within the snapshot.
    pub fn is_complete(&self) -> bool {
        self.missing_blobs().is_empty()
    }

    /// Decode one blob back to bytes.
    pub fn decode_blob(&self, id: &BlobId) -> CheckinResult<Vec<u8>> {
        let encoded = self
            .blobs_by_id
            .get(id)
            .ok_or_else(|| StoreError::BlobNotFound(id.clone()))?;
        BASE64
            .decode(encoded)
            .map_err(|e| CheckinError::Storage(StoreError::Deserialization(e.to_string())))
    }

    pub fn to_json(&self) -> CheckinResult<String> {
        serde_json::to_string(self).map_err(|e| CheckinError::Storage(e.into()))
    }

    pub fn from_json(json: &str) -> CheckinResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| CheckinError::Storage(StoreError::Deserialization(e.to_string())))
    }
}

impl CheckinStore {
    /// Snapshot every record together with its image.
    ///
    /// A record whose blob cannot be read aborts the whole export with
    /// [`CheckinError::NotFound`]; the record is not skipped.
    pub fn export_snapshot(&self) -> CheckinResult<StoreSnapshot> {
        let _lock = self.write_lock.lock();

        let records = self.list()?;
        let mut blobs_by_id = BTreeMap::new();

        for record in &records {
            if blobs_by_id.contains_key(&record.blob_id) {
                continue;
            }
            let bytes = self.blobs.get(&record.blob_id).map_err(|e| {
                tracing::warn!(
                    record_id = %record.id,
                    blob_id = %record.blob_id,
                    error = %e,
                    "export aborted on unreadable blob"
                );
                CheckinError::from(e)
            })?;
            blobs_by_id.insert(record.blob_id.clone(), BASE64.encode(bytes));
        }

        tracing::debug!(
            records = records.len(),
            blobs = blobs_by_id.len(),
            "exported snapshot"
        );
        Ok(StoreSnapshot {
            records,
            blobs_by_id,
        })
    }

    /// Export straight to a writer as JSON. Returns the number of records written.
    pub fn export_to_writer<W: Write>(&self, writer: W) -> CheckinResult<usize> {
        let snapshot = self.export_snapshot()?;
        serde_json::to_writer(writer, &snapshot).map_err(|e| CheckinError::Storage(e.into()))?;
        Ok(snapshot.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::types::LocationReading;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CheckinStore {
        CheckinStore::create(StoreConfig::at(dir.path().join("store"))).unwrap()
    }

    #[test]
    fn test_export_contains_every_blob() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let images: Vec<Vec<u8>> = (0..3u8).map(|i| vec![i; 100 + i as usize]).collect();
        for (i, image) in images.iter().enumerate() {
            store
                .store_complete_checkin(
                    "FIELD_01",
                    LocationReading::new(1.0, 2.0, 3.0),
                    image,
                    format!("VER-{i}").into(),
                )
                .unwrap();
        }

        let snapshot = store.export_snapshot().unwrap();
        assert_eq!(snapshot.records.len(), 3);
        assert!(snapshot.is_complete());
        for (record, image) in snapshot.records.iter().zip(&images) {
            assert_eq!(&snapshot.decode_blob(&record.blob_id).unwrap(), image);
        }
    }

    #[test]
    fn test_export_skips_orphans() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store
            .store_complete_checkin("U", LocationReading::new(0.0, 0.0, 1.0), b"img", "VER-1".into())
            .unwrap();
        let orphan = store.blobs.put(b"orphan").unwrap();

        let snapshot = store.export_snapshot().unwrap();
        assert_eq!(snapshot.blobs_by_id.len(), 1);
        assert!(!snapshot.blobs_by_id.contains_key(&orphan));
    }

    #[test]
    fn test_export_json_shape() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store
            .store_complete_checkin("U", LocationReading::new(0.0, 0.0, 1.0), b"img", "VER-1".into())
            .unwrap();

        let mut out = Vec::new();
        assert_eq!(store.export_to_writer(&mut out).unwrap(), 1);

        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert!(value["records"].is_array());
        assert!(value["blobsById"].is_object());
        assert_eq!(value["records"][0]["submission_id"], "VER-1");

        let parsed = StoreSnapshot::from_json(std::str::from_utf8(&out).unwrap()).unwrap();
        assert!(parsed.is_complete());
    }

    #[test]
    fn test_empty_export() {
        let dir = TempDir::new().unwrap();
        let snapshot = store(&dir).export_snapshot().unwrap();
        assert_eq!(snapshot, StoreSnapshot::default());
        assert!(snapshot.is_complete());
    }
}
