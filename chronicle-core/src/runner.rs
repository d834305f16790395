//! Driving projections over a subscription.
//!
//! A [`ProjectionRunner`] owns a worker task that feeds an application
//! subscription into a user [`Projection`], starting from the cursor the
//! projection last committed. The exactly-once recipe:
//!
//! 1. The projection persists its side-effects atomically with the
//!    [`Tracking`] cursor, through a tracking- or process-recorder it
//!    controls.
//! 2. After a crash between processing and commit, the event is
//!    re-delivered; the tracking uniqueness constraint makes the retry of
//!    an already-committed cursor fail fast, which the projection treats as
//!    "already done".
//!
//! At-least-once delivery plus at-most-once side-effects is effectively
//! exactly-once.

use std::{future::Future, time::Duration};

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::{
    event::EventSet,
    recorder::{ApplicationRecorder, Tracking, TrackingRecorder},
    store::{EventStore, StoreError},
    subscription::StopHandle,
};

/// A read-model or process-manager policy fed by a subscription.
pub trait Projection: Send + 'static {
    /// The upstream application's event set.
    type Event: EventSet + Send + 'static;

    /// The projection's own failure type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Optional name, used for log scoping and derived storage names.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Optional topic filter; `None` subscribes to every topic.
    fn topics(&self) -> Option<Vec<String>> {
        None
    }

    /// Consume one notification.
    ///
    /// Must be idempotent with respect to re-delivery of `tracking`, and
    /// must persist side-effects atomically with `tracking`.
    ///
    /// # Errors
    ///
    /// Any error stops the runner and surfaces from
    /// [`ProjectionRunner::run_forever`].
    fn process_event(
        &mut self,
        event: Self::Event,
        tracking: Tracking,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Errors surfaced by a [`ProjectionRunner`].
#[derive(Debug, Error)]
pub enum RunnerError<E>
where
    E: std::error::Error + 'static,
{
    /// The event store or its recorder failed.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
    /// The projection rejected an event.
    #[error("projection failed: {0}")]
    Projection(#[source] E),
    /// The worker task panicked.
    #[error("projection worker panicked")]
    TaskPanicked,
}

/// Handle to a running projection worker.
///
/// Dropping the handle signals the worker to stop. Call
/// [`ProjectionRunner::stop`] for graceful shutdown and to observe worker
/// errors.
pub struct ProjectionRunner<P>
where
    P: Projection,
{
    stop: StopHandle,
    task: Option<JoinHandle<Result<(), RunnerError<P::Error>>>>,
}

impl<P> ProjectionRunner<P>
where
    P: Projection,
{
    /// Recover the projection's cursor, open a subscription after it, and
    /// spawn the worker.
    ///
    /// `view` is the tracking recorder the projection commits its cursors
    /// to; the cursor read here is what makes restarts resume instead of
    /// reprocessing from the beginning.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Store`] when the cursor cannot be read or the
    /// store does not support subscriptions.
    pub async fn start<R, V>(
        upstream: &EventStore<R, P::Event>,
        view: &V,
        mut projection: P,
    ) -> Result<Self, RunnerError<P::Error>>
    where
        R: ApplicationRecorder,
        V: TrackingRecorder,
    {
        let cursor = view
            .max_tracking_id(upstream.name())
            .await
            .map_err(|error| RunnerError::Store(error.into()))?;

        let mut subscription = upstream
            .subscribe(cursor, projection.topics())
            .map_err(RunnerError::Store)?;
        let stop = subscription.stop_handle();

        let name = projection
            .name()
            .map_or_else(|| "projection".to_owned(), ToOwned::to_owned);
        tracing::debug!(projection = %name, ?cursor, "projection worker starting");

        let task = tokio::spawn(async move {
            while let Some(item) = subscription.next().await {
                let (event, tracking) = item.map_err(RunnerError::Store)?;
                let notification_id = tracking.notification_id;
                if let Err(error) = projection.process_event(event, tracking).await {
                    tracing::error!(
                        projection = %name,
                        notification_id,
                        error = %error,
                        "projection failed; stopping worker"
                    );
                    subscription.stop();
                    return Err(RunnerError::Projection(error));
                }
            }
            tracing::debug!(projection = %name, "projection worker finished");
            Ok(())
        });

        Ok(Self {
            stop,
            task: Some(task),
        })
    }

    /// Block until the worker errors, `timeout` elapses, or the runner is
    /// stopped.
    ///
    /// An elapsed timeout returns `Ok(())` with the worker still running.
    ///
    /// # Errors
    ///
    /// Returns the worker's error when it has failed.
    pub async fn run_forever(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<(), RunnerError<P::Error>> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };

        let joined = match timeout {
            Some(duration) => match tokio::time::timeout(duration, &mut *task).await {
                Err(_elapsed) => return Ok(()),
                Ok(joined) => joined,
            },
            None => task.await,
        };
        self.task = None;
        joined.map_err(|_| RunnerError::TaskPanicked)?
    }

    /// Stop the worker gracefully and observe its outcome.
    ///
    /// # Errors
    ///
    /// Returns the worker's error if it failed before being stopped.
    pub async fn stop(mut self) -> Result<(), RunnerError<P::Error>> {
        self.stop.stop();
        if let Some(task) = self.task.take() {
            return task.await.map_err(|_| RunnerError::TaskPanicked)?;
        }
        Ok(())
    }

    /// A handle for stopping the worker from another task.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Whether the worker task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl<P> Drop for ProjectionRunner<P>
where
    P: Projection,
{
    fn drop(&mut self) {
        if self.is_running() {
            tracing::warn!("projection runner dropped without stop(); signalling worker to stop");
            self.stop.stop();
        }
    }
}
