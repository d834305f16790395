//! Process-recorder atomicity across the events and tracking tables.

use chronicle::{
    DomainEvent, Mapper,
    recorder::{
        ApplicationRecorder, EventRange, IntegrityError, ProcessRecorder, RecorderError, Tracking,
        TrackingRecorder, memory::MemoryProcessRecorder,
    },
    store::{EventStore, StoreError},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderPlaced {
    originator_id: Uuid,
    originator_version: i64,
    timestamp: DateTime<Utc>,
}

impl DomainEvent for OrderPlaced {
    const TOPIC: &'static str = "shop:OrderPlaced";

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

fn placed(id: Uuid, version: i64) -> OrderPlaced {
    OrderPlaced {
        originator_id: id,
        originator_version: version,
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn events_and_tracking_commit_together() {
    let store = EventStore::new("orders", Mapper::new(), MemoryProcessRecorder::new());
    let id = Uuid::new_v4();

    store
        .put_with_tracking(&[placed(id, 1)], Tracking::new("upstream", 21))
        .await
        .unwrap();

    assert!(store.recorder().has_tracking_id("upstream", 21).await.unwrap());
    let events: Vec<OrderPlaced> = store
        .get(id, EventRange::all())
        .await
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn duplicate_tracking_rolls_back_the_events() {
    let store = EventStore::new("orders", Mapper::new(), MemoryProcessRecorder::new());
    let id = Uuid::new_v4();

    store
        .put_with_tracking(&[placed(id, 1)], Tracking::new("upstream", 21))
        .await
        .unwrap();

    let err = store
        .put_with_tracking(&[placed(id, 2)], Tracking::new("upstream", 21))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Recorder(RecorderError::Integrity(IntegrityError::Tracking))
    ));

    // The version-2 event is not visible and no notification id leaked.
    let events: Vec<OrderPlaced> = store
        .get(id, EventRange::all())
        .await
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(store.recorder().max_notification_id().await.unwrap(), Some(1));

    // Retrying with the next tracking id succeeds, and ids stay dense.
    let recordings = store
        .put_with_tracking(&[placed(id, 2)], Tracking::new("upstream", 22))
        .await
        .unwrap();
    assert_eq!(recordings[0].notification_id, Some(2));
}

#[tokio::test]
async fn tracking_is_recorded_at_most_once_per_consumer() {
    let recorder = MemoryProcessRecorder::new();

    recorder.insert_tracking(Tracking::new("upstream", 1)).await.unwrap();
    let err = recorder
        .insert_tracking(Tracking::new("upstream", 1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RecorderError::Integrity(IntegrityError::Tracking)
    ));

    // A different consumer may record the same notification id.
    recorder.insert_tracking(Tracking::new("other", 1)).await.unwrap();
    assert_eq!(recorder.max_tracking_id("upstream").await.unwrap(), Some(1));
    assert_eq!(recorder.max_tracking_id("other").await.unwrap(), Some(1));
}

#[tokio::test]
async fn wait_bridges_write_then_read() {
    let recorder = MemoryProcessRecorder::new();
    let waiter = recorder.clone();

    let task = tokio::spawn(async move {
        waiter
            .wait("upstream", 7, std::time::Duration::from_secs(5))
            .await
    });

    tokio::task::yield_now().await;
    recorder
        .insert_events_with_tracking(Vec::new(), Some(Tracking::new("upstream", 7)))
        .await
        .unwrap();

    task.await.unwrap().unwrap();
}
