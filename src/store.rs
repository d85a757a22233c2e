//! Main store struct tying the blob storage and the record log together.

use crate::blobs::BlobStorage;
use crate::config::StoreConfig;
use crate::error::{CheckinError, CheckinResult, Result, StoreError, ValidationError};
use crate::records::{RecordIndex, RecordLog};
use crate::types::{BlobId, CheckinRecord, LocationReading, NewCheckin, RecordId, SubmissionId};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::path::Path;

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"CKS\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// A record whose blob cannot be read.
#[derive(Debug)]
pub struct BrokenReference {
    pub record_id: RecordId,
    pub blob_id: BlobId,
    pub error: StoreError,
}

/// Durable local check-in store.
///
/// One instance per user context, constructed by the application entry point
/// and passed to whatever needs it. Holds an exclusive lock on its directory
/// for its whole lifetime.
pub struct CheckinStore {
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    pub(crate) log: RecordLog,
    pub(crate) index: RecordIndex,
    pub(crate) blobs: BlobStorage,

    /// Serialises submit, clear and export.
    pub(crate) write_lock: Mutex<()>,
}

impl CheckinStore {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        fs::create_dir_all(config.path.join("blobs"))?;

        Self::write_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let store = Self::assemble(config, lock_file)?;
        tracing::info!(path = %store.path().display(), "created check-in store");
        Ok(store)
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let store = Self::assemble(config, lock_file)?;
        tracing::info!(
            path = %store.path().display(),
            records = store.index.count(),
            "opened check-in store"
        );
        Ok(store)
    }

    fn assemble(config: StoreConfig, lock_file: File) -> Result<Self> {
        let log = RecordLog::open_with_sync_interval(
            config.path.join("checkins.log"),
            config.sync_interval,
        )?;
        let blobs = BlobStorage::new(
            config.path.join("blobs"),
            config.blob_cache_size,
            config.capacity_bytes,
        )?;

        // The index is not persisted; rebuild it from the log.
        let index = RecordIndex::new();
        for result in log.iter_from(0) {
            let (offset, record) = result?;
            index.add(&record, offset);
        }

        Ok(Self {
            config,
            _lock_file: lock_file,
            log,
            index,
            blobs,
            write_lock: Mutex::new(()),
        })
    }

    // --- Submission ---

    /// Persist one complete check-in: one blob write, then one metadata append.
    ///
    /// Inputs are validated before anything is written. If the blob write
    /// succeeds and the append fails, the blob is left orphaned; nothing is
    /// rolled back. Uniqueness of `submission_id` is the caller's concern
    /// unless `enforce_unique_submission_ids` is configured.
    pub fn store_complete_checkin(
        &self,
        user_code: &str,
        location: LocationReading,
        image: &[u8],
        submission_id: SubmissionId,
    ) -> CheckinResult<CheckinRecord> {
        if user_code.trim().is_empty() {
            return Err(ValidationError::EmptyUserCode.into());
        }
        location.validate()?;
        if image.is_empty() {
            return Err(ValidationError::EmptyImage.into());
        }
        if submission_id.is_empty() {
            return Err(ValidationError::EmptySubmissionId.into());
        }

        let _lock = self.write_lock.lock();

        if self.index.contains_submission(&submission_id) {
            if self.config.enforce_unique_submission_ids {
                return Err(ValidationError::DuplicateSubmission(submission_id).into());
            }
            tracing::warn!(%submission_id, "submission id already recorded; storing anyway");
        }

        let blob_id = self.blobs.put(image).map_err(CheckinError::Storage)?;

        let input = NewCheckin {
            user_code: user_code.to_string(),
            location,
            blob_id: blob_id.clone(),
            submission_id,
        };
        let (record, offset) = match self.log.append(input) {
            Ok(appended) => appended,
            Err(e) => {
                tracing::warn!(%blob_id, error = %e, "record append failed; blob left orphaned");
                return Err(CheckinError::Storage(e));
            }
        };
        self.index.add(&record, offset);

        tracing::debug!(
            record_id = %record.id,
            %blob_id,
            submission_id = %record.submission_id,
            "stored check-in"
        );
        Ok(record)
    }

    // --- Reads ---

    /// All records in insertion order.
    pub fn list(&self) -> Result<Vec<CheckinRecord>> {
        self.index
            .offsets()
            .into_iter()
            .map(|offset| self.log.read_at(offset))
            .collect()
    }

    /// All records, newest first.
    pub fn list_recent(&self) -> Result<Vec<CheckinRecord>> {
        let mut records = self.list()?;
        records.reverse();
        Ok(records)
    }

    /// A user's records in insertion order.
    pub fn list_by_user(&self, user_code: &str) -> Result<Vec<CheckinRecord>> {
        self.index
            .get_by_user(user_code)
            .into_iter()
            .filter_map(|id| self.index.get_offset(id))
            .map(|offset| self.log.read_at(offset))
            .collect()
    }

    /// Get a record by ID.
    pub fn get_record(&self, id: RecordId) -> CheckinResult<CheckinRecord> {
        let offset = self
            .index
            .get_offset(id)
            .ok_or(StoreError::RecordNotFound(id))?;
        Ok(self.log.read_at(offset)?)
    }

    /// Look up the record that first used a submission id.
    pub fn find_by_submission_id(
        &self,
        submission_id: &SubmissionId,
    ) -> CheckinResult<Option<CheckinRecord>> {
        match self.index.find_submission(submission_id) {
            Some(id) => self.get_record(id).map(Some),
            None => Ok(None),
        }
    }

    /// Get a blob's bytes by id.
    pub fn get_blob(&self, id: &BlobId) -> CheckinResult<Vec<u8>> {
        Ok(self.blobs.get(id)?)
    }

    /// Check if a blob exists.
    pub fn blob_exists(&self, id: &BlobId) -> bool {
        self.blobs.exists(id)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.index.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // --- Integrity ---

    /// Blobs no record refers to.
    pub fn orphaned_blobs(&self) -> Result<Vec<BlobId>> {
        Ok(self
            .blobs
            .list()?
            .into_iter()
            .filter(|id| !self.index.references_blob(id))
            .collect())
    }

    /// Records whose blob is missing or unreadable. Nothing is repaired.
    pub fn broken_references(&self) -> Result<Vec<BrokenReference>> {
        let mut broken = Vec::new();
        for record in self.list()? {
            if let Err(error) = self.blobs.get(&record.blob_id) {
                broken.push(BrokenReference {
                    record_id: record.id,
                    blob_id: record.blob_id,
                    error,
                });
            }
        }
        Ok(broken)
    }

    // --- Store Operations ---

    /// Remove every record and every blob.
    pub fn clear(&self) -> Result<()> {
        let _lock = self.write_lock.lock();

        let records = self.index.count();
        self.log.clear()?;
        self.index.clear();
        self.blobs.clear()?;

        tracing::info!(path = %self.path().display(), records, "cleared check-in store");
        Ok(())
    }

    /// Sync all data to disk.
    pub fn sync(&self) -> Result<()> {
        self.log.sync()
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        let mut file = match File::open(manifest_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotInitialized);
            }
            Err(e) => return Err(e.into()),
        };

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for CheckinStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}
