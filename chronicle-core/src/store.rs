//! The typed event store.
//!
//! [`EventStore`] is the narrow waist between domain code and a recorder:
//! it maps whole batches of domain events to stored events and delegates to
//! one atomic recorder call. It does not cache and does not batch across
//! calls.

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::{
    event::EventSet,
    mapper::{Mapper, MapperError},
    recorder::{
        AggregateRecorder, ApplicationRecorder, EventRange, ProcessRecorder, Recording,
        RecorderError, Tracking,
    },
    subscription::Subscription,
};

/// Everything an event store operation can fail with.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Mapping between domain and stored events failed.
    #[error(transparent)]
    Mapper(#[from] MapperError),
    /// The recorder failed.
    #[error(transparent)]
    Recorder(#[from] RecorderError),
}

impl StoreError {
    /// Whether this failure is the per-aggregate optimistic-concurrency
    /// signal: reload the aggregate and retry the command.
    #[must_use]
    pub fn is_version_conflict(&self) -> bool {
        matches!(
            self,
            Self::Recorder(RecorderError::Integrity(
                crate::recorder::IntegrityError::Version
            ))
        )
    }
}

/// A typed event store binding a [`Mapper`] to a recorder.
///
/// The `name` is the application name downstream consumers use in their
/// tracking cursors.
pub struct EventStore<R, E> {
    name: String,
    mapper: Arc<Mapper<E>>,
    recorder: R,
}

impl<R: Clone, E> Clone for EventStore<R, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            mapper: Arc::clone(&self.mapper),
            recorder: self.recorder.clone(),
        }
    }
}

impl<R, E> EventStore<R, E> {
    /// Bind `mapper` to `recorder` under an application name.
    pub fn new(name: impl Into<String>, mapper: Mapper<E>, recorder: R) -> Self {
        Self {
            name: name.into(),
            mapper: Arc::new(mapper),
            recorder,
        }
    }

    /// The application name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The recorder this store borrows.
    pub fn recorder(&self) -> &R {
        &self.recorder
    }
}

impl<R, E> EventStore<R, E>
where
    R: AggregateRecorder,
    E: EventSet,
{
    /// Map and atomically record a batch of domain events.
    ///
    /// The whole batch is mapped before the recorder is touched, so a
    /// mapping failure writes nothing.
    ///
    /// # Errors
    ///
    /// Returns the mapper's error for unencodable events, or the
    /// recorder's; on a version conflict the entire batch has failed and
    /// the caller should reload and retry.
    #[tracing::instrument(skip(self, events), fields(store = %self.name, events_len = events.len()))]
    pub async fn put(&self, events: &[E]) -> Result<Vec<Recording>, StoreError> {
        let stored = self.map_batch(events)?;
        Ok(self.recorder.insert_events(stored).await?)
    }

    /// Lazily demapped events of one aggregate.
    ///
    /// Events are fetched eagerly from the recorder in the recorder's
    /// guaranteed order, but each is converted back to its domain type only
    /// when the iterator reaches it.
    ///
    /// # Errors
    ///
    /// Returns the recorder's error; per-event mapping failures surface as
    /// the iterator's items.
    pub async fn get(
        &self,
        originator_id: Uuid,
        range: EventRange,
    ) -> Result<impl Iterator<Item = Result<E, MapperError>> + '_, StoreError> {
        let stored = self.recorder.select_events(originator_id, range).await?;
        Ok(stored
            .into_iter()
            .map(move |event| self.mapper.to_domain(&event)))
    }

    fn map_batch(&self, events: &[E]) -> Result<Vec<crate::recorder::StoredEvent>, StoreError> {
        events
            .iter()
            .map(|event| self.mapper.to_stored(event).map_err(StoreError::from))
            .collect()
    }
}

impl<R, E> EventStore<R, E>
where
    R: ProcessRecorder,
    E: EventSet,
{
    /// Map and atomically record a batch of domain events together with a
    /// consumer cursor.
    ///
    /// # Errors
    ///
    /// As [`EventStore::put`], plus a tracking conflict rolls the whole
    /// batch back.
    #[tracing::instrument(
        skip(self, events, tracking),
        fields(store = %self.name, events_len = events.len())
    )]
    pub async fn put_with_tracking(
        &self,
        events: &[E],
        tracking: Tracking,
    ) -> Result<Vec<Recording>, StoreError> {
        let stored = self.map_batch(events)?;
        Ok(self
            .recorder
            .insert_events_with_tracking(stored, Some(tracking))
            .await?)
    }
}

impl<R, E> EventStore<R, E>
where
    R: ApplicationRecorder,
    E: EventSet,
{
    /// Open a live subscription yielding `(event, tracking)` pairs with
    /// notification ids strictly greater than `gt`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::recorder::CapabilityError::NoSubscribe`] (wrapped)
    /// here, at construction, when the backing store cannot tail.
    pub fn subscribe(
        &self,
        gt: Option<i64>,
        topics: Option<Vec<String>>,
    ) -> Result<Subscription<E>, StoreError> {
        let stream = self.recorder.subscribe(gt, topics)?;
        Ok(Subscription::new(
            self.name.clone(),
            Arc::clone(&self.mapper),
            stream,
        ))
    }
}
