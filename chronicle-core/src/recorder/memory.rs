//! In-memory recorder implementations.
//!
//! Thread-safe, process-local recorders suitable for unit tests, examples
//! and ephemeral deployments. State lives behind a single writer lock; the
//! condition-variable role is played by `tokio::sync::watch` channels so
//! subscribers and waiters wake without polling.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, RwLock},
    time::Duration,
};

use tokio::sync::watch;
use uuid::Uuid;

use super::{
    AggregateRecorder, ApplicationRecorder, EventRange, IntegrityError, Notification,
    NotificationStream, ProcessRecorder, Recording, RecorderError, StoredEvent, Tracking,
    TrackingRecorder,
};

const SUBSCRIBE_BATCH: usize = 256;

/// Aggregate-only recorder: per-originator sequences, no notification ids.
#[derive(Clone, Default)]
pub struct MemoryAggregateRecorder {
    streams: Arc<RwLock<HashMap<Uuid, BTreeMap<i64, StoredEvent>>>>,
}

impl MemoryAggregateRecorder {
    /// An empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AggregateRecorder for MemoryAggregateRecorder {
    #[tracing::instrument(skip(self, events), fields(events_len = events.len()))]
    async fn insert_events(
        &self,
        events: Vec<StoredEvent>,
    ) -> Result<Vec<Recording>, RecorderError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut streams = self.streams.write().expect("in-memory recorder lock poisoned");

        let mut batch_keys = BTreeSet::new();
        for event in &events {
            let key = (event.originator_id, event.originator_version);
            let taken = streams
                .get(&event.originator_id)
                .is_some_and(|stream| stream.contains_key(&event.originator_version));
            if taken || !batch_keys.insert(key) {
                return Err(IntegrityError::Version.into());
            }
        }

        let mut recordings = Vec::with_capacity(events.len());
        for event in events {
            recordings.push(Recording {
                originator_id: event.originator_id,
                originator_version: event.originator_version,
                notification_id: None,
            });
            streams
                .entry(event.originator_id)
                .or_default()
                .insert(event.originator_version, event);
        }
        drop(streams);

        tracing::debug!(events_inserted = recordings.len(), "events recorded");
        Ok(recordings)
    }

    async fn select_events(
        &self,
        originator_id: Uuid,
        range: EventRange,
    ) -> Result<Vec<StoredEvent>, RecorderError> {
        let streams = self.streams.read().expect("in-memory recorder lock poisoned");
        let Some(stream) = streams.get(&originator_id) else {
            return Ok(Vec::new());
        };
        Ok(select_from_sorted(
            stream.values().map(|event| (event.originator_version, event.clone())),
            range,
        ))
    }
}

/// Apply bounds, direction and limit to an ascending `(version, event)`
/// iterator.
fn select_from_sorted<T>(
    ascending: impl Iterator<Item = (i64, T)>,
    range: EventRange,
) -> Vec<T> {
    let mut selected: Vec<T> = ascending
        .filter(|(version, _)| range.contains(*version))
        .map(|(_, event)| event)
        .collect();
    if range.desc {
        selected.reverse();
    }
    if let Some(limit) = range.effective_limit() {
        selected.truncate(limit);
    }
    selected
}

/// The application sequence: events in commit order plus a version index.
#[derive(Default)]
struct AppLog {
    /// Notification id `n` lives at index `n - 1`.
    events: Vec<Notification>,
    /// originator -> version -> index into `events`.
    versions: HashMap<Uuid, BTreeMap<i64, usize>>,
}

impl AppLog {
    fn check_batch(&self, events: &[StoredEvent]) -> Result<(), IntegrityError> {
        let mut batch_keys = BTreeSet::new();
        for event in events {
            let key = (event.originator_id, event.originator_version);
            let taken = self
                .versions
                .get(&event.originator_id)
                .is_some_and(|versions| versions.contains_key(&event.originator_version));
            if taken || !batch_keys.insert(key) {
                return Err(IntegrityError::Version);
            }
        }
        Ok(())
    }

    fn append_batch(&mut self, events: Vec<StoredEvent>) -> Vec<Recording> {
        let mut recordings = Vec::with_capacity(events.len());
        for event in events {
            let id = i64::try_from(self.events.len()).expect("sequence exceeds i64") + 1;
            let index = self.events.len();
            self.versions
                .entry(event.originator_id)
                .or_default()
                .insert(event.originator_version, index);
            recordings.push(Recording {
                originator_id: event.originator_id,
                originator_version: event.originator_version,
                notification_id: Some(id),
            });
            self.events.push(Notification {
                id,
                originator_id: event.originator_id,
                originator_version: event.originator_version,
                topic: event.topic,
                state: event.state,
            });
        }
        recordings
    }

    fn select_events(&self, originator_id: Uuid, range: EventRange) -> Vec<StoredEvent> {
        let Some(versions) = self.versions.get(&originator_id) else {
            return Vec::new();
        };
        select_from_sorted(
            versions
                .iter()
                .map(|(version, index)| (*version, StoredEvent::from(self.events[*index].clone()))),
            range,
        )
    }

    fn select_notifications(
        &self,
        start: i64,
        limit: usize,
        stop: Option<i64>,
        topics: Option<&[String]>,
    ) -> Vec<Notification> {
        let first = usize::try_from(start.max(1) - 1).unwrap_or(0);
        self.events
            .iter()
            .skip(first)
            .take_while(|notification| stop.is_none_or(|stop| notification.id <= stop))
            .filter(|notification| {
                topics.is_none_or(|topics| topics.iter().any(|topic| *topic == notification.topic))
            })
            .take(limit)
            .cloned()
            .collect()
    }

    fn max_notification_id(&self) -> Option<i64> {
        self.events.last().map(|notification| notification.id)
    }
}

/// Consumer cursors per upstream application.
#[derive(Default)]
struct TrackingLog {
    by_application: HashMap<String, BTreeSet<i64>>,
}

impl TrackingLog {
    fn check(&self, tracking: &Tracking) -> Result<(), IntegrityError> {
        let taken = self
            .by_application
            .get(&tracking.application_name)
            .is_some_and(|ids| ids.contains(&tracking.notification_id));
        if taken {
            return Err(IntegrityError::Tracking);
        }
        Ok(())
    }

    fn insert(&mut self, tracking: Tracking) {
        self.by_application
            .entry(tracking.application_name)
            .or_default()
            .insert(tracking.notification_id);
    }

    fn max_tracking_id(&self, application_name: &str) -> Option<i64> {
        self.by_application
            .get(application_name)
            .and_then(|ids| ids.last().copied())
    }

    fn has_tracking_id(&self, application_name: &str, notification_id: i64) -> bool {
        self.by_application
            .get(application_name)
            .is_some_and(|ids| ids.contains(&notification_id))
    }
}

/// Application recorder with a notification sequence and live
/// subscriptions.
#[derive(Clone)]
pub struct MemoryApplicationRecorder {
    log: Arc<RwLock<AppLog>>,
    watermark: Arc<watch::Sender<i64>>,
}

impl Default for MemoryApplicationRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryApplicationRecorder {
    /// An empty recorder.
    #[must_use]
    pub fn new() -> Self {
        let (watermark, _) = watch::channel(0);
        Self {
            log: Arc::new(RwLock::new(AppLog::default())),
            watermark: Arc::new(watermark),
        }
    }
}

impl AggregateRecorder for MemoryApplicationRecorder {
    #[tracing::instrument(skip(self, events), fields(events_len = events.len()))]
    async fn insert_events(
        &self,
        events: Vec<StoredEvent>,
    ) -> Result<Vec<Recording>, RecorderError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let recordings = {
            let mut log = self.log.write().expect("in-memory recorder lock poisoned");
            log.check_batch(&events)?;
            let recordings = log.append_batch(events);
            self.watermark
                .send_replace(log.max_notification_id().unwrap_or(0));
            recordings
        };

        tracing::debug!(events_inserted = recordings.len(), "events recorded");
        Ok(recordings)
    }

    async fn select_events(
        &self,
        originator_id: Uuid,
        range: EventRange,
    ) -> Result<Vec<StoredEvent>, RecorderError> {
        let log = self.log.read().expect("in-memory recorder lock poisoned");
        Ok(log.select_events(originator_id, range))
    }
}

impl ApplicationRecorder for MemoryApplicationRecorder {
    async fn select_notifications(
        &self,
        start: i64,
        limit: usize,
        stop: Option<i64>,
        topics: Option<&[String]>,
    ) -> Result<Vec<Notification>, RecorderError> {
        let log = self.log.read().expect("in-memory recorder lock poisoned");
        Ok(log.select_notifications(start, limit, stop, topics))
    }

    async fn max_notification_id(&self) -> Result<Option<i64>, RecorderError> {
        let log = self.log.read().expect("in-memory recorder lock poisoned");
        Ok(log.max_notification_id())
    }

    fn subscribe(
        &self,
        gt: Option<i64>,
        topics: Option<Vec<String>>,
    ) -> Result<NotificationStream, RecorderError> {
        Ok(subscribe_log(
            Arc::clone(&self.log),
            self.watermark.subscribe(),
            gt,
            topics,
        ))
    }
}

/// Live-tail a shared [`AppLog`], waking on watermark changes.
///
/// The stream ends when every recorder handle has been dropped.
fn subscribe_log(
    log: Arc<RwLock<AppLog>>,
    mut watermark: watch::Receiver<i64>,
    gt: Option<i64>,
    topics: Option<Vec<String>>,
) -> NotificationStream {
    Box::pin(async_stream::stream! {
        let mut last = gt.unwrap_or(0);
        loop {
            // Mark the watermark seen before reading state, so a commit
            // between the read and the wait still wakes us.
            watermark.borrow_and_update();
            let batch = {
                let log = log.read().expect("in-memory recorder lock poisoned");
                log.select_notifications(last + 1, SUBSCRIBE_BATCH, None, None)
            };
            if batch.is_empty() {
                if watermark.changed().await.is_err() {
                    tracing::debug!("recorder dropped; ending subscription stream");
                    break;
                }
                continue;
            }
            for notification in batch {
                last = notification.id;
                let matches = topics
                    .as_deref()
                    .is_none_or(|topics| topics.iter().any(|topic| *topic == notification.topic));
                if matches {
                    yield Ok(notification);
                }
            }
        }
    })
}

/// Tracking-only recorder.
#[derive(Clone)]
pub struct MemoryTrackingRecorder {
    log: Arc<RwLock<TrackingLog>>,
    pulse: Arc<watch::Sender<u64>>,
}

impl Default for MemoryTrackingRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTrackingRecorder {
    /// An empty recorder.
    #[must_use]
    pub fn new() -> Self {
        let (pulse, _) = watch::channel(0);
        Self {
            log: Arc::new(RwLock::new(TrackingLog::default())),
            pulse: Arc::new(pulse),
        }
    }
}

impl TrackingRecorder for MemoryTrackingRecorder {
    async fn insert_tracking(&self, tracking: Tracking) -> Result<(), RecorderError> {
        {
            let mut log = self.log.write().expect("in-memory recorder lock poisoned");
            log.check(&tracking)?;
            log.insert(tracking);
        }
        self.pulse.send_modify(|pulse| *pulse += 1);
        Ok(())
    }

    async fn max_tracking_id(&self, application_name: &str) -> Result<Option<i64>, RecorderError> {
        let log = self.log.read().expect("in-memory recorder lock poisoned");
        Ok(log.max_tracking_id(application_name))
    }

    async fn has_tracking_id(
        &self,
        application_name: &str,
        notification_id: i64,
    ) -> Result<bool, RecorderError> {
        let log = self.log.read().expect("in-memory recorder lock poisoned");
        Ok(log.has_tracking_id(application_name, notification_id))
    }

    async fn wait(
        &self,
        application_name: &str,
        notification_id: i64,
        timeout: Duration,
    ) -> Result<(), RecorderError> {
        let mut pulse = self.pulse.subscribe();
        tokio::time::timeout(timeout, async {
            loop {
                pulse.borrow_and_update();
                let present = {
                    let log = self.log.read().expect("in-memory recorder lock poisoned");
                    log.has_tracking_id(application_name, notification_id)
                };
                if present {
                    return;
                }
                pulse
                    .changed()
                    .await
                    .expect("watch sender held by recorder");
            }
        })
        .await
        .map_err(|_| RecorderError::Timeout(timeout))
    }
}

/// Process recorder: one lock covers the application sequence and the
/// tracking cursors, so an insert with tracking is atomic.
#[derive(Clone)]
pub struct MemoryProcessRecorder {
    state: Arc<RwLock<ProcessState>>,
    watermark: Arc<watch::Sender<i64>>,
    pulse: Arc<watch::Sender<u64>>,
}

#[derive(Default)]
struct ProcessState {
    log: AppLog,
    tracking: TrackingLog,
}

impl Default for MemoryProcessRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProcessRecorder {
    /// An empty recorder.
    #[must_use]
    pub fn new() -> Self {
        let (watermark, _) = watch::channel(0);
        let (pulse, _) = watch::channel(0);
        Self {
            state: Arc::new(RwLock::new(ProcessState::default())),
            watermark: Arc::new(watermark),
            pulse: Arc::new(pulse),
        }
    }
}

impl AggregateRecorder for MemoryProcessRecorder {
    async fn insert_events(
        &self,
        events: Vec<StoredEvent>,
    ) -> Result<Vec<Recording>, RecorderError> {
        self.insert_events_with_tracking(events, None).await
    }

    async fn select_events(
        &self,
        originator_id: Uuid,
        range: EventRange,
    ) -> Result<Vec<StoredEvent>, RecorderError> {
        let state = self.state.read().expect("in-memory recorder lock poisoned");
        Ok(state.log.select_events(originator_id, range))
    }
}

impl ApplicationRecorder for MemoryProcessRecorder {
    async fn select_notifications(
        &self,
        start: i64,
        limit: usize,
        stop: Option<i64>,
        topics: Option<&[String]>,
    ) -> Result<Vec<Notification>, RecorderError> {
        let state = self.state.read().expect("in-memory recorder lock poisoned");
        Ok(state.log.select_notifications(start, limit, stop, topics))
    }

    async fn max_notification_id(&self) -> Result<Option<i64>, RecorderError> {
        let state = self.state.read().expect("in-memory recorder lock poisoned");
        Ok(state.log.max_notification_id())
    }

    fn subscribe(
        &self,
        gt: Option<i64>,
        topics: Option<Vec<String>>,
    ) -> Result<NotificationStream, RecorderError> {
        let state = Arc::clone(&self.state);
        let mut watermark = self.watermark.subscribe();
        Ok(Box::pin(async_stream::stream! {
            let mut last = gt.unwrap_or(0);
            loop {
                watermark.borrow_and_update();
                let batch = {
                    let state = state.read().expect("in-memory recorder lock poisoned");
                    state.log.select_notifications(last + 1, SUBSCRIBE_BATCH, None, None)
                };
                if batch.is_empty() {
                    if watermark.changed().await.is_err() {
                        tracing::debug!("recorder dropped; ending subscription stream");
                        break;
                    }
                    continue;
                }
                for notification in batch {
                    last = notification.id;
                    let matches = topics.as_deref().is_none_or(|topics| {
                        topics.iter().any(|topic| *topic == notification.topic)
                    });
                    if matches {
                        yield Ok(notification);
                    }
                }
            }
        }))
    }
}

impl TrackingRecorder for MemoryProcessRecorder {
    async fn insert_tracking(&self, tracking: Tracking) -> Result<(), RecorderError> {
        {
            let mut state = self.state.write().expect("in-memory recorder lock poisoned");
            state.tracking.check(&tracking)?;
            state.tracking.insert(tracking);
        }
        self.pulse.send_modify(|pulse| *pulse += 1);
        Ok(())
    }

    async fn max_tracking_id(&self, application_name: &str) -> Result<Option<i64>, RecorderError> {
        let state = self.state.read().expect("in-memory recorder lock poisoned");
        Ok(state.tracking.max_tracking_id(application_name))
    }

    async fn has_tracking_id(
        &self,
        application_name: &str,
        notification_id: i64,
    ) -> Result<bool, RecorderError> {
        let state = self.state.read().expect("in-memory recorder lock poisoned");
        Ok(state.tracking.has_tracking_id(application_name, notification_id))
    }

    async fn wait(
        &self,
        application_name: &str,
        notification_id: i64,
        timeout: Duration,
    ) -> Result<(), RecorderError> {
        let mut pulse = self.pulse.subscribe();
        tokio::time::timeout(timeout, async {
            loop {
                pulse.borrow_and_update();
                let present = {
                    let state = self.state.read().expect("in-memory recorder lock poisoned");
                    state
                        .tracking
                        .has_tracking_id(application_name, notification_id)
                };
                if present {
                    return;
                }
                pulse
                    .changed()
                    .await
                    .expect("watch sender held by recorder");
            }
        })
        .await
        .map_err(|_| RecorderError::Timeout(timeout))
    }
}

impl ProcessRecorder for MemoryProcessRecorder {
    #[tracing::instrument(
        skip(self, events, tracking),
        fields(events_len = events.len(), has_tracking = tracking.is_some())
    )]
    async fn insert_events_with_tracking(
        &self,
        events: Vec<StoredEvent>,
        tracking: Option<Tracking>,
    ) -> Result<Vec<Recording>, RecorderError> {
        let had_tracking = tracking.is_some();
        let recordings = {
            let mut state = self.state.write().expect("in-memory recorder lock poisoned");
            state.log.check_batch(&events)?;
            if let Some(tracking) = &tracking {
                state.tracking.check(tracking)?;
            }
            let recordings = state.log.append_batch(events);
            if let Some(tracking) = tracking {
                state.tracking.insert(tracking);
            }
            self.watermark
                .send_replace(state.log.max_notification_id().unwrap_or(0));
            recordings
        };

        if had_tracking {
            self.pulse.send_modify(|pulse| *pulse += 1);
        }

        tracing::debug!(events_inserted = recordings.len(), "events recorded");
        Ok(recordings)
    }
}
