//! SQLite-backed recorders for the Chronicle event-sourcing library.
//!
//! A file-backed, single-writer store: many concurrent readers via
//! write-ahead logging, one writer at a time via `BEGIN IMMEDIATE`
//! transactions bounded by a configurable busy timeout. Notification ids
//! are the events table's `rowid`, which single-writer serialization keeps
//! equal to commit order.
//!
//! This store has no push mechanism, so [`SqliteApplicationRecorder`]
//! refuses subscriptions with `CapabilityError::NoSubscribe` at
//! construction time.

pub mod datastore;
mod error;
mod recorder;

pub use datastore::{SqliteConfig, SqliteDatastore};
pub use recorder::{
    SqliteAggregateRecorder, SqliteApplicationRecorder, SqliteProcessRecorder,
    SqliteTrackingRecorder,
};
