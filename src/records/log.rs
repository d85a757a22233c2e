//! Append-only check-in log.

use crate::error::{Result, StoreError};
use crate::types::{CheckinRecord, NewCheckin, RecordId, Timestamp};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for each log frame.
const LOG_MAGIC: &[u8; 4] = b"CHK\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Fixed frame header: magic + version + id + created_at + body length.
const FRAME_HEADER_SIZE: u64 = 4 + 1 + 8 + 8 + 4;

/// Open log file plus its write cursor.
struct LogFile {
    file: File,

    /// Next record ID to assign.
    next_id: u64,

    /// Current file size (for appending).
    size: u64,

    /// Number of writes since last sync.
    writes_since_sync: u64,
}

/// Append-only log of check-in records.
pub struct RecordLog {
    path: PathBuf,
    inner: Mutex<LogFile>,

    /// Sync every N writes (1 = every write).
    sync_interval: u64,
}

impl RecordLog {
    /// Every append reaches disk before it returns.
    const DEFAULT_SYNC_INTERVAL: u64 = 1;

    /// Open or create a record log with default sync interval.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_sync_interval(path, Self::DEFAULT_SYNC_INTERVAL)
    }

    /// Open or create a record log with custom sync interval.
    /// - sync_interval = 0 or 1: sync every write (safest)
    /// - sync_interval = 100: sync every 100 writes
    ///
    /// A frame cut short by a crash mid-append is truncated away; any other
    /// damage fails the open.
    pub fn open_with_sync_interval(path: impl AsRef<Path>, sync_interval: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let (max_id, valid_end) = Self::scan(&mut file, file_size)?;

        if valid_end < file_size {
            tracing::warn!(
                path = %path.display(),
                discarded = file_size - valid_end,
                "truncating incomplete trailing log frame"
            );
            file.set_len(valid_end)?;
            file.sync_all()?;
        }

        Ok(Self {
            path,
            inner: Mutex::new(LogFile {
                file,
                next_id: max_id + 1,
                size: valid_end,
                writes_since_sync: 0,
            }),
            sync_interval: sync_interval.max(1),
        })
    }

    /// Append a record to the log.
    ///
    /// Returns the record and the offset where it was written.
    pub fn append(&self, input: NewCheckin) -> Result<(CheckinRecord, u64)> {
        let mut inner = self.inner.lock();

        let record = CheckinRecord {
            id: RecordId(inner.next_id),
            user_code: input.user_code,
            created_at: Timestamp::now(),
            location: input.location,
            blob_id: input.blob_id,
            submission_id: input.submission_id,
        };
        let frame = encode_frame(&record)?;

        let offset = inner.size;
        let sync_due = inner.writes_since_sync + 1 >= self.sync_interval;
        if let Err(e) = write_frame_at(&mut inner.file, offset, &frame, sync_due) {
            // Nothing of a failed append may survive into the next open.
            if let Err(truncate_err) = inner.file.set_len(offset) {
                tracing::error!(
                    offset,
                    error = %truncate_err,
                    "could not roll back failed log append"
                );
            }
            return Err(e.into());
        }

        inner.size = offset + frame.len() as u64;
        inner.next_id += 1;
        inner.writes_since_sync = if sync_due { 0 } else { inner.writes_since_sync + 1 };

        Ok((record, offset))
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.sync_all()?;
        inner.writes_since_sync = 0;
        Ok(())
    }

    /// Read a record at a given offset.
    pub fn read_at(&self, offset: u64) -> Result<CheckinRecord> {
        let mut inner = self.inner.lock();
        inner.file.seek(SeekFrom::Start(offset))?;
        let end = inner.size;
        read_frame(&mut inner.file, end).map(|(record, _)| record)
    }

    /// Iterate all records from a given offset.
    pub fn iter_from(&self, offset: u64) -> RecordIterator<'_> {
        RecordIterator {
            log: self,
            offset,
            end: self.size(),
        }
    }

    /// Get current file size.
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    /// Drop every record. Ids restart at 1.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.set_len(0)?;
        inner.file.sync_all()?;
        inner.size = 0;
        inner.next_id = 1;
        inner.writes_since_sync = 0;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Walk the log, returning the maximum record id and the end of the last
    /// complete frame.
    fn scan(file: &mut File, file_size: u64) -> Result<(u64, u64)> {
        file.seek(SeekFrom::Start(0))?;

        let mut max_id = 0u64;
        let mut offset = 0u64;

        while offset < file_size {
            match read_frame(file, file_size) {
                Ok((record, len)) => {
                    max_id = max_id.max(record.id.0);
                    offset += len;
                }
                Err(StoreError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
        }

        Ok((max_id, offset))
    }

    fn read_frame_at(&self, offset: u64) -> Result<(CheckinRecord, u64)> {
        let mut inner = self.inner.lock();
        inner.file.seek(SeekFrom::Start(offset))?;
        let end = inner.size;
        read_frame(&mut inner.file, end)
    }
}

/// Record body as stored in a frame; id and timestamp live in the header.
#[derive(serde::Serialize, serde::Deserialize)]
struct FrameBody {
    user_code: String,
    location: crate::types::LocationReading,
    blob_id: crate::types::BlobId,
    submission_id: crate::types::SubmissionId,
}

fn encode_frame(record: &CheckinRecord) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec_named(&FrameBody {
        user_code: record.user_code.clone(),
        location: record.location,
        blob_id: record.blob_id.clone(),
        submission_id: record.submission_id.clone(),
    })?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE as usize + body.len() + 4);
    frame.extend_from_slice(LOG_MAGIC);
    frame.push(LOG_VERSION);
    frame.extend_from_slice(&record.id.0.to_le_bytes());
    frame.extend_from_slice(&record.created_at.0.to_le_bytes());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    Ok(frame)
}

fn write_frame_at(file: &mut File, offset: u64, frame: &[u8], sync: bool) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(frame)?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

/// Read one frame at the current position, returning it and its length.
///
/// A frame that would run past `end` reads as `UnexpectedEof`, the same as a
/// torn tail, and nothing is allocated for its body.
fn read_frame(file: &mut File, end: u64) -> Result<(CheckinRecord, u64)> {
    let mut header = [0u8; FRAME_HEADER_SIZE as usize];
    file.read_exact(&mut header).map_err(StoreError::Io)?;
    let remaining = end.saturating_sub(file.stream_position()?);

    if &header[0..4] != LOG_MAGIC {
        return Err(StoreError::InvalidFormat("Invalid record magic".into()));
    }
    if header[4] != LOG_VERSION {
        return Err(StoreError::InvalidFormat(format!(
            "Unsupported log version: {}",
            header[4]
        )));
    }

    let id = RecordId(u64::from_le_bytes(le_bytes(&header[5..13])));
    let created_at = Timestamp(i64::from_le_bytes(le_bytes(&header[13..21])));
    let body_len = u32::from_le_bytes(le_bytes(&header[21..25])) as usize;
    if body_len as u64 + 4 > remaining {
        return Err(StoreError::Io(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("frame body of {body_len} bytes runs past end of log"),
        )));
    }

    let mut body = vec![0u8; body_len];
    file.read_exact(&mut body).map_err(StoreError::Io)?;

    let mut checksum_bytes = [0u8; 4];
    file.read_exact(&mut checksum_bytes).map_err(StoreError::Io)?;
    let stored_checksum = u32::from_le_bytes(checksum_bytes);
    let computed_checksum = crc32fast::hash(&body);
    if stored_checksum != computed_checksum {
        return Err(StoreError::ChecksumMismatch {
            expected: stored_checksum,
            got: computed_checksum,
        });
    }

    let body: FrameBody = rmp_serde::from_slice(&body)?;
    let record = CheckinRecord {
        id,
        user_code: body.user_code,
        created_at,
        location: body.location,
        blob_id: body.blob_id,
        submission_id: body.submission_id,
    };

    Ok((record, FRAME_HEADER_SIZE + body_len as u64 + 4))
}

fn le_bytes<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

/// Iterator over records in the log.
pub struct RecordIterator<'a> {
    log: &'a RecordLog,
    offset: u64,
    end: u64,
}

impl Iterator for RecordIterator<'_> {
    type Item = Result<(u64, CheckinRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end {
            return None;
        }

        let current_offset = self.offset;
        match self.log.read_frame_at(current_offset) {
            Ok((record, len)) => {
                self.offset += len;
                Some(Ok((current_offset, record)))
            }
            Err(e) => {
                self.offset = self.end; // Stop iteration on error
                Some(Err(e))
            }
        }
    }
}
