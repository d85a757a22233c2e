//! Image blob storage.
//!
//! Blobs are opaque, write-once byte payloads keyed by a store-generated id,
//! sharded into directories by the first byte of the id's random suffix.
//! There is no update or single-blob delete; only a full clear.

mod storage;

pub use storage::BlobStorage;
