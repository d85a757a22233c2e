//! # Check-in Store
//!
//! Durable, on-device storage for field check-ins (a photo plus a GPS
//! reading), with best-effort mirroring to one remote backend.
//!
//! ## Core Concepts
//!
//! - **Blobs**: write-once image payloads keyed by a generated id
//! - **Records**: append-only check-in metadata referencing a blob
//! - **Export**: one self-contained JSON snapshot of the whole store
//! - **Remote adapters**: interchangeable backends behind one trait
//! - **Sync**: commit locally first, then try the remote once
//!
//! ## Example
//!
//! ```ignore
//! use checkin_store::{CheckinStore, CheckinSubmission, LocationReading, StoreConfig,
//!     SubmissionId, SyncOrchestrator};
//! use std::sync::Arc;
//!
//! let store = Arc::new(CheckinStore::open_or_create(StoreConfig::at("./checkins"))?);
//! let sync = SyncOrchestrator::new(store.clone(), None);
//!
//! let report = sync.submit(CheckinSubmission {
//!     user_code: "FIELD_01".into(),
//!     location: LocationReading::new(40.7128, -74.0060, 5.0),
//!     image: jpeg_bytes,
//!     submission_id: SubmissionId::generate(),
//! }).await?;
//!
//! let stats = store.get_stats()?;
//! ```

pub mod blobs;
pub mod capture;
pub mod config;
pub mod error;
pub mod export;
pub mod records;
pub mod remote;
pub mod stats;
pub mod store;
pub mod sync;
pub mod types;

// Re-exports
pub use blobs::BlobStorage;
pub use capture::{acquire_location, LocationError, LocationSource, DEFAULT_LOCATION_TIMEOUT};
pub use config::{AppConfig, BackendConfig, ConfigError, HttpBackendConfig, StoreConfig, SyncConfig};
pub use error::{CheckinError, CheckinResult, Result, StoreError, ValidationError};
pub use export::StoreSnapshot;
pub use records::{RecordIndex, RecordLog};
pub use remote::{
    BlobLocator, HttpAdapter, InsertRequest, MemoryAdapter, RemoteError, RemoteId, RemoteRecord,
    RemoteStats, RemoteSyncAdapter, CONTENT_DIGEST_HEADER, CORRELATION_HEADER,
};
pub use store::{BrokenReference, CheckinStore};
pub use sync::{CheckinSubmission, SubmitReport, SyncOrchestrator, SyncOutcome};
pub use types::*;
