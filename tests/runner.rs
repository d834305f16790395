//! Projection runner: cursor recovery, exactly-once processing, error
//! surfacing.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use chronicle::{
    DomainEvent, Mapper, Projection, ProjectionRunner,
    recorder::{
        IntegrityError, ProcessRecorder, RecorderError, Tracking, TrackingRecorder,
        memory::{MemoryApplicationRecorder, MemoryProcessRecorder},
    },
    store::EventStore,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SeatBooked {
    originator_id: Uuid,
    originator_version: i64,
    timestamp: DateTime<Utc>,
}

impl DomainEvent for SeatBooked {
    const TOPIC: &'static str = "booking:SeatBooked";

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

fn booked() -> SeatBooked {
    SeatBooked {
        originator_id: Uuid::new_v4(),
        originator_version: 1,
        timestamp: Utc::now(),
    }
}

/// Counts bookings; the count bumps atomically with the tracking cursor
/// through the view's process recorder, and a duplicate cursor is treated
/// as already done.
struct BookingCount {
    view: MemoryProcessRecorder,
    count: Arc<AtomicU32>,
}

impl BookingCount {
    async fn apply(&mut self, tracking: Tracking) -> Result<(), RecorderError> {
        match self
            .view
            .insert_events_with_tracking(Vec::new(), Some(tracking))
            .await
        {
            Ok(_) => {
                self.count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            // Redelivered cursor: the side-effects are already committed.
            Err(RecorderError::Integrity(IntegrityError::Tracking)) => Ok(()),
            Err(error) => Err(error),
        }
    }
}

impl Projection for BookingCount {
    type Event = SeatBooked;
    type Error = RecorderError;

    fn name(&self) -> Option<&str> {
        Some("booking-count")
    }

    async fn process_event(
        &mut self,
        _event: SeatBooked,
        tracking: Tracking,
    ) -> Result<(), Self::Error> {
        self.apply(tracking).await
    }
}

#[tokio::test]
async fn counts_backlog_and_live_events_exactly_once() {
    let upstream = EventStore::new("booking", Mapper::new(), MemoryApplicationRecorder::new());
    let view = MemoryProcessRecorder::new();
    let count = Arc::new(AtomicU32::new(0));

    upstream.put(&[booked()]).await.unwrap();
    upstream.put(&[booked()]).await.unwrap();

    let runner = ProjectionRunner::start(
        &upstream,
        &view,
        BookingCount {
            view: view.clone(),
            count: Arc::clone(&count),
        },
    )
    .await
    .unwrap();

    upstream.put(&[booked()]).await.unwrap();

    view.wait("booking", 3, Duration::from_secs(5)).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 3);
    runner.stop().await.unwrap();
}

#[tokio::test]
async fn redelivered_tracking_is_skipped_not_doubled() {
    let view = MemoryProcessRecorder::new();
    let count = Arc::new(AtomicU32::new(0));
    let mut projection = BookingCount {
        view: view.clone(),
        count: Arc::clone(&count),
    };

    // First delivery commits; the crash-replay delivery of the same
    // notification must be a no-op.
    projection.apply(Tracking::new("booking", 1)).await.unwrap();
    projection.apply(Tracking::new("booking", 1)).await.unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(view.max_tracking_id("booking").await.unwrap(), Some(1));
}

#[tokio::test]
async fn restart_resumes_after_the_last_committed_cursor() {
    let upstream = EventStore::new("booking", Mapper::new(), MemoryApplicationRecorder::new());
    let view = MemoryProcessRecorder::new();
    let count = Arc::new(AtomicU32::new(0));

    upstream.put(&[booked()]).await.unwrap();
    upstream.put(&[booked()]).await.unwrap();

    let first = ProjectionRunner::start(
        &upstream,
        &view,
        BookingCount {
            view: view.clone(),
            count: Arc::clone(&count),
        },
    )
    .await
    .unwrap();
    view.wait("booking", 2, Duration::from_secs(5)).await.unwrap();
    first.stop().await.unwrap();

    let second = ProjectionRunner::start(
        &upstream,
        &view,
        BookingCount {
            view: view.clone(),
            count: Arc::clone(&count),
        },
    )
    .await
    .unwrap();
    upstream.put(&[booked()]).await.unwrap();
    view.wait("booking", 3, Duration::from_secs(5)).await.unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 3);
    second.stop().await.unwrap();
}

/// A projection that rejects everything, to drive the error path.
struct Rejecting;

impl Projection for Rejecting {
    type Event = SeatBooked;
    type Error = std::io::Error;

    async fn process_event(
        &mut self,
        _event: SeatBooked,
        _tracking: Tracking,
    ) -> Result<(), Self::Error> {
        Err(std::io::Error::other("read model unavailable"))
    }
}

#[tokio::test]
async fn worker_errors_surface_from_run_forever() {
    let upstream = EventStore::new("booking", Mapper::new(), MemoryApplicationRecorder::new());
    let view = MemoryProcessRecorder::new();

    let mut runner = ProjectionRunner::start(&upstream, &view, Rejecting).await.unwrap();
    upstream.put(&[booked()]).await.unwrap();

    let err = runner.run_forever(None).await.unwrap_err();
    assert!(matches!(
        err,
        chronicle::runner::RunnerError::Projection(_)
    ));
}
