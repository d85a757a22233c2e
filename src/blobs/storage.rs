//! Blob storage implementation.

use crate::error::{Result, StoreError};
use crate::types::BlobId;
use lru::LruCache;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Magic bytes for blob files.
const BLOB_MAGIC: &[u8; 4] = b"BLB\0";

/// Current blob format version.
const BLOB_VERSION: u8 = 1;

/// Bytes of framing around the content: magic + version + length + checksum.
const BLOB_OVERHEAD: u64 = 4 + 1 + 8 + 4;

/// Attempts at drawing an unused id before giving up.
const MAX_ID_ATTEMPTS: usize = 8;

/// Write-once blob storage.
pub struct BlobStorage {
    /// Base directory for blobs.
    path: PathBuf,

    /// LRU cache for recently accessed blobs.
    cache: Mutex<LruCache<BlobId, Vec<u8>>>,

    /// Upper bound on bytes on disk, if any.
    capacity_bytes: Option<u64>,

    /// Bytes currently on disk.
    used_bytes: Mutex<u64>,
}

impl BlobStorage {
    /// Open (or create) blob storage at the given path.
    pub fn new(
        path: impl AsRef<Path>,
        cache_size: usize,
        capacity_bytes: Option<u64>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let cache_size = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);

        let storage = Self {
            path,
            cache: Mutex::new(LruCache::new(cache_size)),
            capacity_bytes,
            used_bytes: Mutex::new(0),
        };
        *storage.used_bytes.lock() = storage.total_size()?;

        Ok(storage)
    }

    /// Store a blob, returning its freshly generated id.
    pub fn put(&self, content: &[u8]) -> Result<BlobId> {
        let file_len = content.len() as u64 + BLOB_OVERHEAD;

        let mut used = self.used_bytes.lock();
        if let Some(capacity) = self.capacity_bytes {
            if *used + file_len > capacity {
                return Err(StoreError::StorageFull(format!(
                    "blob of {} bytes exceeds remaining capacity ({} of {} bytes used)",
                    content.len(),
                    *used,
                    capacity
                )));
            }
        }

        let id = self.fresh_id()?;
        fs::create_dir_all(self.shard_path(&id))?;

        // Write to a temporary name so a crash never leaves a half-written blob
        // under a valid id.
        let blob_path = self.blob_path(&id);
        Self::write_atomically(&blob_path, content)?;

        *used += file_len;
        self.cache.lock().put(id.clone(), content.to_vec());

        tracing::debug!(blob_id = %id, bytes = content.len(), "stored blob");
        Ok(id)
    }

    /// Write a framed blob to `<blob_path>.tmp`, then rename it into place.
    /// The temporary file is removed if any step fails.
    fn write_atomically(blob_path: &Path, content: &[u8]) -> Result<()> {
        let tmp_path = blob_path.with_extension("tmp");
        let result = Self::write_framed(&tmp_path, content)
            .and_then(|()| fs::rename(&tmp_path, blob_path).map_err(StoreError::from));
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }

    fn write_framed(path: &Path, content: &[u8]) -> Result<()> {
        let mut file = File::create(path)?;

        file.write_all(BLOB_MAGIC)?;
        file.write_all(&[BLOB_VERSION])?;
        file.write_all(&(content.len() as u64).to_le_bytes())?;
        file.write_all(content)?;
        file.write_all(&crc32fast::hash(content).to_le_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Get a blob's bytes by id.
    pub fn get(&self, id: &BlobId) -> Result<Vec<u8>> {
        // Check cache first
        if let Some(cached) = self.cache.lock().get(id).cloned() {
            return Ok(cached);
        }

        let blob_path = self.blob_path(id);
        let mut file = match File::open(&blob_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::BlobNotFound(id.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        // Read and verify magic
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != BLOB_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid blob magic".into()));
        }

        // Read version
        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != BLOB_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported blob version: {}",
                version[0]
            )));
        }

        // Read content
        let mut content_len_bytes = [0u8; 8];
        file.read_exact(&mut content_len_bytes)?;
        let content_len = u64::from_le_bytes(content_len_bytes);

        let on_disk = file.metadata()?.len();
        if content_len.checked_add(BLOB_OVERHEAD) != Some(on_disk) {
            return Err(StoreError::Corruption(format!(
                "blob {} declares {} bytes but file holds {}",
                id, content_len, on_disk
            )));
        }

        let mut content = vec![0u8; content_len as usize];
        file.read_exact(&mut content)?;

        // Read and verify checksum
        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&content);

        if stored_checksum != computed_checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        self.cache.lock().put(id.clone(), content.clone());

        Ok(content)
    }

    /// Check if a blob exists.
    pub fn exists(&self, id: &BlobId) -> bool {
        if self.cache.lock().contains(id) {
            return true;
        }
        self.blob_path(id).exists()
    }

    /// List all blob ids.
    pub fn list(&self) -> Result<Vec<BlobId>> {
        let mut ids = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                for blob_entry in fs::read_dir(entry.path())? {
                    let blob_entry = blob_entry?;
                    let filename = blob_entry.file_name();
                    if let Some(id) = BlobId::parse(&filename.to_string_lossy()) {
                        ids.push(id);
                    }
                }
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Number of stored blobs.
    pub fn count(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    /// Get total size of all blob files.
    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0u64;

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                for blob_entry in fs::read_dir(entry.path())? {
                    let blob_entry = blob_entry?;
                    if BlobId::parse(&blob_entry.file_name().to_string_lossy()).is_some() {
                        total += blob_entry.metadata()?.len();
                    }
                }
            }
        }

        Ok(total)
    }

    /// Remove every blob.
    pub fn clear(&self) -> Result<()> {
        let mut used = self.used_bytes.lock();
        self.cache.lock().clear();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }
        *used = 0;

        Ok(())
    }

    /// Draw an id that is not already on disk.
    fn fresh_id(&self) -> Result<BlobId> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = BlobId::generate();
            if !self.blob_path(&id).exists() {
                return Ok(id);
            }
        }
        Err(StoreError::Corruption(
            "could not allocate an unused blob id".into(),
        ))
    }

    /// Get the shard directory for an id.
    fn shard_path(&self, id: &BlobId) -> PathBuf {
        self.path.join(id.shard_prefix())
    }

    /// Get the full path for a blob.
    fn blob_path(&self, id: &BlobId) -> PathBuf {
        self.shard_path(id).join(id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> BlobStorage {
        BlobStorage::new(dir.path().join("blobs"), 100, None).unwrap()
    }

    #[test]
    fn test_put_and_get() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        let content = b"\xFF\xD8\xFF\xE0 not really a jpeg";
        let id = storage.put(content).unwrap();

        assert_eq!(storage.get(&id).unwrap(), content);
    }

    #[test]
    fn test_get_uncached() {
        let dir = TempDir::new().unwrap();
        let id = storage(&dir).put(b"persisted").unwrap();

        // Fresh instance, empty cache
        let reopened = storage(&dir);
        assert_eq!(reopened.get(&id).unwrap(), b"persisted");
    }

    #[test]
    fn test_same_content_gets_distinct_ids() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        let id1 = storage.put(b"Same content").unwrap();
        let id2 = storage.put(b"Same content").unwrap();

        assert_ne!(id1, id2);
        assert_eq!(storage.count().unwrap(), 2);
    }

    #[test]
    fn test_missing_blob() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        let id = BlobId::generate();
        assert!(!storage.exists(&id));
        assert!(matches!(storage.get(&id), Err(StoreError::BlobNotFound(_))));
    }

    #[test]
    fn test_list_and_clear() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        let id1 = storage.put(b"content1").unwrap();
        let id2 = storage.put(b"content2").unwrap();

        let ids = storage.list().unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&id1));
        assert!(ids.contains(&id2));

        storage.clear().unwrap();
        assert_eq!(storage.count().unwrap(), 0);
        assert_eq!(storage.total_size().unwrap(), 0);
        assert!(!storage.exists(&id1));
    }

    #[test]
    fn test_capacity_limit() {
        let dir = TempDir::new().unwrap();
        let storage = BlobStorage::new(dir.path().join("blobs"), 10, Some(100)).unwrap();

        storage.put(&[0u8; 50]).unwrap();
        let result = storage.put(&[0u8; 50]);
        assert!(matches!(result, Err(StoreError::StorageFull(_))));
        assert_eq!(storage.count().unwrap(), 1);

        storage.clear().unwrap();
        storage.put(&[0u8; 50]).unwrap();
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let id = storage(&dir).put(b"pristine bytes").unwrap();

        let path = dir
            .path()
            .join("blobs")
            .join(id.shard_prefix())
            .join(id.as_str());
        let mut raw = fs::read(&path).unwrap();
        raw[14] ^= 0xFF;
        fs::write(&path, raw).unwrap();

        let reopened = storage(&dir);
        assert!(matches!(
            reopened.get(&id),
            Err(StoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_oversized_length_header_is_corruption() {
        let dir = TempDir::new().unwrap();
        let id = storage(&dir).put(b"pristine bytes").unwrap();

        let path = dir
            .path()
            .join("blobs")
            .join(id.shard_prefix())
            .join(id.as_str());
        let mut raw = fs::read(&path).unwrap();
        raw[5..13].copy_from_slice(&u64::MAX.to_le_bytes());
        fs::write(&path, raw).unwrap();

        let reopened = storage(&dir);
        assert!(matches!(reopened.get(&id), Err(StoreError::Corruption(_))));
    }

    #[test]
    fn test_failed_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let shard = dir.path().join("shard");
        fs::create_dir_all(&shard).unwrap();

        // A non-empty directory at the target makes the rename fail.
        let target = shard.join("0000000000000-00000000");
        fs::create_dir_all(target.join("occupied")).unwrap();

        assert!(BlobStorage::write_atomically(&target, b"image").is_err());
        assert!(!target.with_extension("tmp").exists());
        assert!(target.is_dir());
    }
}
