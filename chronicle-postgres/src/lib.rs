//! PostgreSQL-backed recorders for the Chronicle event-sourcing library.
//!
//! This crate implements the `chronicle-core` recorder traits over
//! `sqlx::PgPool`:
//!
//! - [`PostgresAggregateRecorder`] - per-aggregate event streams
//! - [`PostgresApplicationRecorder`] - the global notification sequence with
//!   LISTEN/NOTIFY live subscriptions
//! - [`PostgresTrackingRecorder`] - consumer cursors
//! - [`PostgresProcessRecorder`] - events + cursor in one transaction
//!
//! Writers are serialized with an `EXCLUSIVE` table lock held from the
//! start of each insert transaction to commit, which makes commit order
//! equal notification-id order: the property tailing readers depend on.

pub mod datastore;
mod error;
mod recorder;

pub use datastore::{PostgresConfig, PostgresDatastore};
pub use recorder::{
    PostgresAggregateRecorder, PostgresApplicationRecorder, PostgresProcessRecorder,
    PostgresTrackingRecorder,
};
