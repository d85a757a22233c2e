//! Check-in metadata index.
//!
//! Records are stored in an append-only log; lookups go through an in-memory
//! index rebuilt from the log whenever the store is opened.

mod index;
mod log;

pub use index::RecordIndex;
pub use log::{RecordIterator, RecordLog};
