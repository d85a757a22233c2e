//! Seams for the capture collaborators.
//!
//! The camera hands over already-encoded bytes and needs no trait. Geolocation
//! is the one operation with a bounded wait.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::ValidationError;
use crate::types::LocationReading;

/// How long to wait for a GPS fix before giving up.
pub const DEFAULT_LOCATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a location could not be obtained. Surfaced to the user as-is.
#[derive(Debug, Error)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("position unavailable: {0}")]
    PositionUnavailable(String),

    #[error("no position within {0:?}")]
    Timeout(Duration),

    #[error("position rejected: {0}")]
    Invalid(#[from] ValidationError),
}

/// Anything that can produce a GPS fix.
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn current_position(&self) -> Result<LocationReading, LocationError>;
}

/// Ask `source` for a fix, failing fast after `timeout`.
///
/// Never retries; a failure goes straight back to the caller.
pub async fn acquire_location<S>(
    source: &S,
    timeout: Duration,
) -> Result<LocationReading, LocationError>
where
    S: LocationSource + ?Sized,
{
    let reading = tokio::time::timeout(timeout, source.current_position())
        .await
        .map_err(|_| LocationError::Timeout(timeout))??;
    reading.validate()?;
    Ok(reading)
}
