//! The shared live pump behind application-recorder subscriptions.
//!
//! One background task per recorder listens on the notify channel and
//! polls on a bounded interval, publishing committed notifications to a
//! broadcast channel in ascending id order. Because writers hold the
//! `EXCLUSIVE` table lock until commit, ids become visible in order; the
//! pump only ever advances its watermark.

use std::sync::Arc;

use chronicle_core::recorder::Notification;
use sqlx::postgres::PgListener;
use tokio::{
    sync::{Mutex, broadcast, watch},
    task::JoinHandle,
    time::{Duration, MissedTickBehavior},
};

use super::select;

/// Bounded poll fallback for missed or coalesced notifies.
const LIVE_POLL_INTERVAL: Duration = Duration::from_millis(200);
const LIVE_BUFFER_CAPACITY: usize = 8192;
const LIVE_FETCH_BATCH: usize = 1024;

pub(super) enum LiveMessage {
    Event(Arc<Notification>),
}

impl Clone for LiveMessage {
    fn clone(&self) -> Self {
        match self {
            Self::Event(event) => Self::Event(Arc::clone(event)),
        }
    }
}

#[derive(Clone)]
pub(crate) struct LivePump {
    inner: Arc<LivePumpInner>,
}

struct LivePumpInner {
    pool: sqlx::PgPool,
    events_table: String,
    channel: String,
    sender: broadcast::Sender<LiveMessage>,
    /// Flips to false when the pump task exits, so subscriptions blocked
    /// on the broadcast observe fatal pump failures.
    alive: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LivePump {
    pub(super) fn new(pool: sqlx::PgPool, events_table: String, channel: String) -> Self {
        let (sender, _) = broadcast::channel(LIVE_BUFFER_CAPACITY);
        let (alive, _) = watch::channel(true);
        Self {
            inner: Arc::new(LivePumpInner {
                pool,
                events_table,
                channel,
                sender,
                alive,
                task: Mutex::new(None),
            }),
        }
    }

    pub(super) async fn subscribe(
        &self,
        from_position: Option<i64>,
    ) -> broadcast::Receiver<LiveMessage> {
        self.ensure_running(from_position).await;
        self.inner.sender.subscribe()
    }

    pub(super) fn alive(&self) -> watch::Receiver<bool> {
        self.inner.alive.subscribe()
    }

    async fn ensure_running(&self, from_position: Option<i64>) {
        let mut task_guard = self.inner.task.lock().await;
        if task_guard.is_some() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let start_from = from_position.unwrap_or(0).max(0);

        *task_guard = Some(tokio::spawn(async move {
            run_live_pump(&inner, start_from).await;
            inner.alive.send_replace(false);
        }));
    }
}

async fn run_live_pump(inner: &LivePumpInner, mut watermark: i64) {
    let mut listener = match PgListener::connect_with(&inner.pool).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!("live pump failed to connect listener: {error}");
            return;
        }
    };

    if let Err(error) = listener.listen(&inner.channel).await {
        tracing::error!("live pump failed to listen on channel: {error}");
        return;
    }

    let mut poll_tick = tokio::time::interval(LIVE_POLL_INTERVAL);
    poll_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = poll_tick.tick() => {
                if let Err(error) = poll_and_publish(inner, &mut watermark).await {
                    tracing::error!("live pump polling failed: {error}");
                    return;
                }
            }
            recv = listener.recv() => {
                if let Err(error) = recv {
                    tracing::error!("live pump listener receive failed: {error}");
                    return;
                }
                // The payload is only a hint; any notify triggers a poll.
                if let Err(error) = poll_and_publish(inner, &mut watermark).await {
                    tracing::error!("live pump notification handling failed: {error}");
                    return;
                }
            }
        }
    }
}

/// Publish everything committed beyond the watermark, in id order.
async fn poll_and_publish(
    inner: &LivePumpInner,
    watermark: &mut i64,
) -> Result<(), chronicle_core::recorder::RecorderError> {
    loop {
        let batch = select::select_notifications(
            &inner.pool,
            &inner.events_table,
            *watermark + 1,
            LIVE_FETCH_BATCH,
            None,
            None,
        )
        .await?;
        if batch.is_empty() {
            return Ok(());
        }
        let full_page = batch.len() == LIVE_FETCH_BATCH;
        for notification in batch {
            *watermark = notification.id;
            let _ = inner.sender.send(LiveMessage::Event(Arc::new(notification)));
        }
        if !full_page {
            return Ok(());
        }
    }
}
