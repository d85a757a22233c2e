//! Core types for the check-in store.

use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// Store-generated identifier for a check-in record.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-generated identifier for a blob: `<micros-hex>-<random-hex>`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(String);

impl BlobId {
    /// Generate a fresh id from the current time plus a random suffix.
    pub fn generate() -> Self {
        let micros = Timestamp::now().0.max(0) as u64;
        let suffix: u32 = rand::random();
        BlobId(format!("{:013x}-{:08x}", micros, suffix))
    }

    /// Parse an id, accepting only the shape [`BlobId::generate`] produces.
    ///
    /// Blob ids become file names, so anything else is refused.
    pub fn parse(s: &str) -> Option<Self> {
        let (time, suffix) = s.split_once('-')?;
        let is_hex = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_hexdigit());
        if is_hex(time) && suffix.len() == 8 && is_hex(suffix) {
            Some(BlobId(s.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shard directory name (first byte of the random suffix).
    pub fn shard_prefix(&self) -> &str {
        match self.0.split_once('-') {
            Some((_, suffix)) if suffix.len() >= 2 => &suffix[..2],
            _ => "00",
        }
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", self.0)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-supplied, human-correlatable token for one submission.
///
/// Distinct from [`RecordId`]: it is chosen before anything is persisted and
/// is what a field user reads back to an operator.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(String);

impl SubmissionId {
    const PREFIX: &'static str = "VER-";
    const CHARSET: &'static [u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    const SUFFIX_LEN: usize = 6;

    pub fn new(value: impl Into<String>) -> Self {
        SubmissionId(value.into())
    }

    /// Generate a `VER-XXXXXX` token.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let suffix: String = (0..Self::SUFFIX_LEN)
            .map(|_| Self::CHARSET[rng.random_range(0..Self::CHARSET.len())] as char)
            .collect();
        SubmissionId(format!("{}{}", Self::PREFIX, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubmissionId({})", self.0)
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubmissionId {
    fn from(s: &str) -> Self {
        SubmissionId(s.to_string())
    }
}

impl From<String> for SubmissionId {
    fn from(s: String) -> Self {
        SubmissionId(s)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        Timestamp(Utc::now().timestamp_micros())
    }

    pub fn from_datetime<Tz: TimeZone>(dt: &DateTime<Tz>) -> Self {
        Timestamp(dt.timestamp_micros())
    }

    /// Convert into a zoned date-time, `None` if out of chrono's range.
    pub fn to_datetime<Tz: TimeZone>(self, tz: &Tz) -> Option<DateTime<Tz>> {
        DateTime::<Utc>::from_timestamp_micros(self.0).map(|dt| dt.with_timezone(tz))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A GPS fix as handed over by the geolocation collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationReading {
    /// Degrees, [-90, 90].
    pub latitude: f64,

    /// Degrees, [-180, 180].
    pub longitude: f64,

    /// Horizontal accuracy radius in meters.
    pub accuracy: f64,

    /// When the fix was taken.
    pub captured_at: Timestamp,
}

impl LocationReading {
    /// Create a reading stamped with the current time.
    pub fn new(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            captured_at: Timestamp::now(),
        }
    }

    /// Check the range constraints. NaN is never in range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ValidationError::LatitudeOutOfRange(self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ValidationError::LongitudeOutOfRange(self.longitude));
        }
        if !(self.accuracy.is_finite() && self.accuracy >= 0.0) {
            return Err(ValidationError::InvalidAccuracy(self.accuracy));
        }
        Ok(())
    }
}

/// Input for appending a record (before id/created_at are assigned).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewCheckin {
    pub user_code: String,
    pub location: LocationReading,
    pub blob_id: BlobId,
    pub submission_id: SubmissionId,
}

/// One submission's persisted metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckinRecord {
    /// Unique identifier (assigned by store).
    pub id: RecordId,

    /// Opaque code produced by the authentication gate.
    pub user_code: String,

    /// When the record was appended.
    pub created_at: Timestamp,

    pub location: LocationReading,

    /// Reference to the image blob. The blob's lifetime is independent.
    pub blob_id: BlobId,

    pub submission_id: SubmissionId,
}

/// Derived store statistics. Never persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_checkins: u64,

    /// Counted independently of records; exceeds `total_checkins` when
    /// blobs are orphaned.
    pub total_images: u64,

    /// Heuristic estimate in bytes, not a measurement.
    pub storage_size: u64,
}
