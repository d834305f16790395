//! Catch-up-then-live subscription streams.

use chronicle_core::recorder::{Notification, NotificationStream};
use tokio::sync::broadcast;

use super::{PostgresApplicationRecorder, live::LiveMessage, select};

const CATCHUP_BATCH: usize = 512;

fn topic_matches(topics: Option<&[String]>, notification: &Notification) -> bool {
    topics.is_none_or(|topics| topics.iter().any(|topic| *topic == notification.topic))
}

/// Build the stream backing [`PostgresApplicationRecorder::subscribe`].
///
/// The broadcast receiver is attached before catch-up so nothing committed
/// in between is missed; duplicates across the hand-off are dropped by the
/// ascending-id watermark.
pub(super) fn notification_stream(
    recorder: PostgresApplicationRecorder,
    gt: Option<i64>,
    topics: Option<Vec<String>>,
) -> NotificationStream {
    Box::pin(async_stream::stream! {
        let mut last = gt.unwrap_or(0);
        let mut live = recorder.pump().subscribe(Some(last)).await;
        let mut alive = recorder.pump().alive();

        // Historical catch-up.
        loop {
            let batch = match select::select_notifications(
                recorder.datastore().pool(),
                recorder.events_table(),
                last + 1,
                CATCHUP_BATCH,
                None,
                None,
            )
            .await
            {
                Ok(batch) => batch,
                Err(error) => {
                    yield Err(error);
                    return;
                }
            };
            if batch.is_empty() {
                break;
            }
            for notification in batch {
                last = notification.id;
                if topic_matches(topics.as_deref(), &notification) {
                    yield Ok(notification);
                }
            }
        }

        // Shared live stream.
        loop {
            if !*alive.borrow_and_update() {
                tracing::debug!("live pump stopped; ending subscription stream");
                return;
            }
            let received = tokio::select! {
                biased;
                received = live.recv() => received,
                _ = alive.changed() => continue,
            };
            let message = match received {
                Ok(message) => message,
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("live pump closed; ending subscription stream");
                    return;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscription lagged; recovering from the table");
                    loop {
                        let batch = match select::select_notifications(
                            recorder.datastore().pool(),
                            recorder.events_table(),
                            last + 1,
                            CATCHUP_BATCH,
                            None,
                            None,
                        )
                        .await
                        {
                            Ok(batch) => batch,
                            Err(error) => {
                                yield Err(error);
                                return;
                            }
                        };
                        if batch.is_empty() {
                            break;
                        }
                        for notification in batch {
                            last = notification.id;
                            if topic_matches(topics.as_deref(), &notification) {
                                yield Ok(notification);
                            }
                        }
                    }
                    continue;
                }
            };

            let LiveMessage::Event(notification) = message;
            if notification.id <= last {
                continue;
            }
            last = notification.id;
            if topic_matches(topics.as_deref(), &notification) {
                yield Ok((*notification).clone());
            }
        }
    })
}
