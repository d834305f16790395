//! Live subscriptions over the application sequence.
//!
//! A [`Subscription`] yields `(event, tracking)` pairs in strictly
//! ascending notification order: first the recorded backlog, then new
//! commits as they land. When nothing is available, [`Subscription::next`]
//! waits. Stopping is idempotent and can be signalled from another task via
//! a [`StopHandle`]; a waiting `next()` observes the signal within one poll
//! and returns end-of-stream.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_stream::StreamExt as _;

use crate::{
    event::EventSet,
    mapper::Mapper,
    recorder::{NotificationStream, StoredEvent, Tracking},
    store::StoreError,
};

/// Clonable handle that stops a [`Subscription`] from any task.
#[derive(Clone)]
pub struct StopHandle {
    stop: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Signal the subscription to stop. Idempotent.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }
}

/// A scoped, ordered, live iteration over an application's notifications.
///
/// Dropping the subscription releases the underlying stream and whatever
/// connections or listeners it holds, whether iteration finished normally,
/// failed, or was cancelled.
pub struct Subscription<E> {
    application_name: String,
    mapper: Arc<Mapper<E>>,
    stream: Option<NotificationStream>,
    stop: Arc<watch::Sender<bool>>,
    stopped: watch::Receiver<bool>,
}

impl<E: EventSet> Subscription<E> {
    pub(crate) fn new(
        application_name: String,
        mapper: Arc<Mapper<E>>,
        stream: NotificationStream,
    ) -> Self {
        let (stop, stopped) = watch::channel(false);
        Self {
            application_name,
            mapper,
            stream: Some(stream),
            stop: Arc::new(stop),
            stopped,
        }
    }

    /// The next `(event, tracking)` pair, or `None` after the subscription
    /// stopped or its stream ended.
    ///
    /// Blocks while no newer notification exists. A mapper failure on one
    /// notification is yielded as an error; iteration may continue past it.
    pub async fn next(&mut self) -> Option<Result<(E, Tracking), StoreError>> {
        if *self.stopped.borrow() {
            self.stream = None;
            return None;
        }
        let stream = self.stream.as_mut()?;
        let stopped = &mut self.stopped;

        let item = tokio::select! {
            biased;
            _ = stopped.changed() => {
                tracing::debug!("subscription stopped");
                None
            }
            item = stream.next() => {
                if item.is_none() {
                    tracing::debug!("subscription stream ended");
                }
                item
            }
        };

        match item {
            None => {
                self.stream = None;
                None
            }
            Some(Ok(notification)) => {
                let tracking = Tracking::new(&self.application_name, notification.id);
                let stored = StoredEvent::from(notification);
                Some(
                    self.mapper
                        .to_domain(&stored)
                        .map(|event| (event, tracking))
                        .map_err(StoreError::from),
                )
            }
            Some(Err(error)) => Some(Err(error.into())),
        }
    }

    /// Signal this subscription to stop. Idempotent and non-blocking.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// A handle for stopping this subscription from another task.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: Arc::clone(&self.stop),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    use super::*;
    use crate::{
        event::DomainEvent,
        recorder::{Notification, RecorderError},
    };

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ticked {
        originator_id: Uuid,
        originator_version: i64,
        timestamp: DateTime<Utc>,
    }

    impl DomainEvent for Ticked {
        const TOPIC: &'static str = "clock:Ticked";

        fn originator_id(&self) -> Uuid {
            self.originator_id
        }

        fn originator_version(&self) -> i64 {
            self.originator_version
        }

        fn timestamp(&self) -> DateTime<Utc> {
            self.timestamp
        }
    }

    fn notification_for(event: &Ticked, id: i64) -> Notification {
        let mapper: Mapper<Ticked> = Mapper::new();
        let stored = mapper.to_stored(event).unwrap();
        Notification {
            id,
            originator_id: stored.originator_id,
            originator_version: stored.originator_version,
            topic: stored.topic,
            state: stored.state,
        }
    }

    fn ticked() -> Ticked {
        Ticked {
            originator_id: Uuid::new_v4(),
            originator_version: 1,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn yields_events_paired_with_upstream_tracking() {
        let event = ticked();
        let items = vec![Ok(notification_for(&event, 5))];
        let stream: NotificationStream = Box::pin(tokio_stream::iter(items));
        let mut subscription =
            Subscription::new("clock".to_owned(), Arc::new(Mapper::new()), stream);

        let (yielded, tracking) = subscription.next().await.unwrap().unwrap();
        assert_eq!(yielded, event);
        assert_eq!(tracking, Tracking::new("clock", 5));
        assert!(subscription.next().await.is_none());
    }

    #[tokio::test]
    async fn stop_wakes_a_blocked_iterator() {
        let stream: NotificationStream = Box::pin(tokio_stream::pending());
        let mut subscription: Subscription<Ticked> =
            Subscription::new("clock".to_owned(), Arc::new(Mapper::new()), stream);
        let handle = subscription.stop_handle();

        let waiter = tokio::spawn(async move { subscription.next().await.is_none() });
        tokio::task::yield_now().await;
        handle.stop();
        handle.stop();

        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(200), waiter)
                .await
                .expect("stop must wake the iterator promptly")
                .unwrap()
        );
    }

    #[tokio::test]
    async fn next_after_stop_returns_none_without_polling() {
        let stream: NotificationStream = Box::pin(tokio_stream::pending());
        let mut subscription: Subscription<Ticked> =
            Subscription::new("clock".to_owned(), Arc::new(Mapper::new()), stream);
        subscription.stop();
        assert!(subscription.next().await.is_none());
    }

    #[tokio::test]
    async fn recorder_errors_pass_through() {
        let items: Vec<Result<Notification, RecorderError>> =
            vec![Err(RecorderError::transport(std::io::Error::other("down")))];
        let stream: NotificationStream = Box::pin(tokio_stream::iter(items));
        let mut subscription: Subscription<Ticked> =
            Subscription::new("clock".to_owned(), Arc::new(Mapper::new()), stream);

        let err = subscription.next().await.unwrap().unwrap_err();
        assert!(matches!(err, StoreError::Recorder(_)));
    }
}
