//! The recorder hierarchy.
//!
//! Recorders are the storage adapters of the persistence core. Four roles
//! share one substrate:
//!
//! - [`AggregateRecorder`] - per-aggregate event streams,
//! - [`ApplicationRecorder`] - adds the global notification sequence and
//!   live subscriptions,
//! - [`TrackingRecorder`] - durable consumer cursors,
//! - [`ProcessRecorder`] - application + tracking in one transaction.
//!
//! Every backend maps its failures onto the small [`RecorderError`] taxonomy
//! so callers can tell a retryable transport problem from a uniqueness
//! violation that demands a reload-and-retry at the application layer.

use std::{future::Future, pin::Pin, time::Duration};

use futures_core::Stream;
use thiserror::Error;
use uuid::Uuid;

pub mod memory;

/// The universal unit of recorded state.
///
/// Immutable once inserted. The pair `(originator_id, originator_version)`
/// is unique within a recorder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEvent {
    /// Aggregate identifier.
    pub originator_id: Uuid,
    /// Position in the aggregate's sequence.
    pub originator_version: i64,
    /// Wire name of the domain event type.
    pub topic: String,
    /// Mapper output: serialized, possibly compressed, possibly encrypted.
    pub state: Vec<u8>,
}

/// A stored event positioned in the application sequence.
///
/// `id` is strictly monotonic across the application, dense over committed
/// writes, and equal to commit order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// Position in the application sequence.
    pub id: i64,
    /// Aggregate identifier.
    pub originator_id: Uuid,
    /// Position in the aggregate's sequence.
    pub originator_version: i64,
    /// Wire name of the domain event type.
    pub topic: String,
    /// Mapper output.
    pub state: Vec<u8>,
}

impl From<Notification> for StoredEvent {
    fn from(notification: Notification) -> Self {
        Self {
            originator_id: notification.originator_id,
            originator_version: notification.originator_version,
            topic: notification.topic,
            state: notification.state,
        }
    }
}

/// A downstream processor's cursor: which notification of the named
/// upstream application has been consumed.
///
/// Inserted atomically with the side-effects derived from consuming that
/// notification; never updated.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Tracking {
    /// Name of the upstream application.
    pub application_name: String,
    /// Consumed notification id.
    pub notification_id: i64,
}

impl Tracking {
    /// A cursor for `application_name` at `notification_id`.
    #[must_use]
    pub fn new(application_name: impl Into<String>, notification_id: i64) -> Self {
        Self {
            application_name: application_name.into(),
            notification_id,
        }
    }
}

/// Per-event result of an insert, in input order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Recording {
    /// Aggregate identifier of the inserted event.
    pub originator_id: Uuid,
    /// Version of the inserted event.
    pub originator_version: i64,
    /// Assigned notification id, for recorder variants that have a
    /// notification sequence.
    pub notification_id: Option<i64>,
}

/// Bounds for [`AggregateRecorder::select_events`].
///
/// Bounds filter first, then direction is applied, then the limit: with
/// `desc` set, the limit keeps the *highest* versions within the bounds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventRange {
    /// Strict lower bound on `originator_version`.
    pub gt: Option<i64>,
    /// Inclusive upper bound on `originator_version`.
    pub lte: Option<i64>,
    /// Descending order when set.
    pub desc: bool,
    /// Cap on the number of returned events; `None` and zero are both
    /// unbounded.
    pub limit: Option<usize>,
}

impl EventRange {
    /// The unbounded, ascending range.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Keep only versions strictly greater than `version`.
    #[must_use]
    pub const fn after(mut self, version: i64) -> Self {
        self.gt = Some(version);
        self
    }

    /// Keep only versions less than or equal to `version`.
    #[must_use]
    pub const fn up_to(mut self, version: i64) -> Self {
        self.lte = Some(version);
        self
    }

    /// Return events in descending version order.
    #[must_use]
    pub const fn descending(mut self) -> Self {
        self.desc = true;
        self
    }

    /// Cap the number of returned events.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `version` falls within the bounds.
    #[must_use]
    pub fn contains(&self, version: i64) -> bool {
        self.gt.is_none_or(|gt| version > gt) && self.lte.is_none_or(|lte| version <= lte)
    }

    /// The effective cap, with zero normalised to unbounded.
    #[must_use]
    pub fn effective_limit(&self) -> Option<usize> {
        self.limit.filter(|limit| *limit > 0)
    }
}

/// Uniqueness violations. Recoverable by the caller: reload the aggregate
/// or reposition the consumer.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum IntegrityError {
    /// `(originator_id, originator_version)` was already recorded.
    #[error("originator version already recorded")]
    Version,
    /// `(application_name, notification_id)` was already tracked.
    #[error("notification already tracked")]
    Tracking,
}

/// Transient infrastructure failures. Retry with backoff.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The underlying storage was unavailable or the connection broke.
    #[error("transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    /// No connection could be acquired within the configured bounds.
    #[error("connection pool exhausted")]
    PoolExhausted,
    /// The storage operation exceeded a configured timeout, for example a
    /// write-lock acquisition bound.
    #[error("storage operation timed out")]
    Timeout,
}

/// The chosen backing store does not support an operation. Surfaced at
/// construction/open time, never deferred to first use.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    /// The store has no push or poll mechanism for live subscriptions.
    #[error("this store does not support subscriptions")]
    NoSubscribe,
    /// The store cannot create or manage its own schema.
    #[error("this store does not manage its schema")]
    NoSchema,
}

/// Everything a recorder operation can fail with.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Uniqueness violation.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    /// Transient infrastructure failure.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    /// Unsupported operation for this store.
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    /// A bounded wait elapsed before its condition held.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl RecorderError {
    /// Wrap an arbitrary transport-level failure.
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Persistence(PersistenceError::Transport(Box::new(error)))
    }
}

/// Boxed stream of notifications in strictly ascending id order.
///
/// The stream owns its resources; dropping it releases them.
pub type NotificationStream =
    Pin<Box<dyn Stream<Item = Result<Notification, RecorderError>> + Send + 'static>>;

/// Records and replays per-aggregate event sequences.
pub trait AggregateRecorder: Send + Sync {
    /// Atomically insert a batch of stored events.
    ///
    /// Either every event is committed or none is. An empty batch is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Version`] (wrapped) when any
    /// `(originator_id, originator_version)` pair is already recorded, with
    /// nothing inserted; [`PersistenceError`] variants for infrastructure
    /// failures.
    fn insert_events(
        &self,
        events: Vec<StoredEvent>,
    ) -> impl Future<Output = Result<Vec<Recording>, RecorderError>> + Send;

    /// Events of one aggregate within `range`, contiguous and monotonic in
    /// `originator_version` (modulo direction).
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] variants for infrastructure failures.
    fn select_events(
        &self,
        originator_id: Uuid,
        range: EventRange,
    ) -> impl Future<Output = Result<Vec<StoredEvent>, RecorderError>> + Send;
}

/// Adds the global notification sequence to an aggregate recorder.
pub trait ApplicationRecorder: AggregateRecorder {
    /// Notifications with ids in `[start, stop]`, strictly ascending,
    /// capped at `limit`, optionally filtered to a set of topics.
    ///
    /// Density: no committed notification with an id in the returned span
    /// is omitted (topic filtering aside), so tailers may resume from the
    /// last returned id.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] variants for infrastructure failures.
    fn select_notifications(
        &self,
        start: i64,
        limit: usize,
        stop: Option<i64>,
        topics: Option<&[String]>,
    ) -> impl Future<Output = Result<Vec<Notification>, RecorderError>> + Send;

    /// The highest committed notification id, or `None` when empty.
    ///
    /// Because commit order equals id order, this is a safe high-water mark
    /// for tailers.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] variants for infrastructure failures.
    fn max_notification_id(&self)
    -> impl Future<Output = Result<Option<i64>, RecorderError>> + Send;

    /// Open a live stream of notifications with ids strictly greater than
    /// `gt` (from the beginning when `None`), catching up on recorded
    /// events and then tailing new commits.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::NoSubscribe`] (wrapped) immediately when
    /// the store cannot tail; never defers the capability check to
    /// iteration.
    fn subscribe(
        &self,
        gt: Option<i64>,
        topics: Option<Vec<String>>,
    ) -> Result<NotificationStream, RecorderError>;
}

/// Records which notifications a named consumer has processed.
pub trait TrackingRecorder: Send + Sync {
    /// Insert a cursor.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Tracking`] (wrapped) when the cursor was
    /// already recorded.
    fn insert_tracking(
        &self,
        tracking: Tracking,
    ) -> impl Future<Output = Result<(), RecorderError>> + Send;

    /// The highest notification id recorded for `application_name`, or
    /// `None`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] variants for infrastructure failures.
    fn max_tracking_id(
        &self,
        application_name: &str,
    ) -> impl Future<Output = Result<Option<i64>, RecorderError>> + Send;

    /// Whether `(application_name, notification_id)` has been recorded.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] variants for infrastructure failures.
    fn has_tracking_id(
        &self,
        application_name: &str,
        notification_id: i64,
    ) -> impl Future<Output = Result<bool, RecorderError>> + Send;

    /// Block until `(application_name, notification_id)` is recorded.
    ///
    /// Bridges write-then-read flows: a caller that has seen a notification
    /// id can wait for a downstream processor to catch up to it.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Timeout`] when `timeout` elapses first.
    fn wait(
        &self,
        application_name: &str,
        notification_id: i64,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), RecorderError>> + Send;
}

/// The join of [`ApplicationRecorder`] and [`TrackingRecorder`]: one
/// transaction writes both tables.
pub trait ProcessRecorder: ApplicationRecorder + TrackingRecorder {
    /// Atomically insert events and, when given, a tracking cursor.
    ///
    /// On any failure nothing is visible: a duplicate cursor rolls back the
    /// events and a duplicate event version rolls back the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Version`] or [`IntegrityError::Tracking`]
    /// (wrapped) on uniqueness violations, [`PersistenceError`] variants
    /// otherwise.
    fn insert_events_with_tracking(
        &self,
        events: Vec<StoredEvent>,
        tracking: Option<Tracking>,
    ) -> impl Future<Output = Result<Vec<Recording>, RecorderError>> + Send;
}
