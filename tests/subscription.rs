//! Subscription catch-up, live-tail, liveness and cancellation bounds.

use std::time::Duration;

use chronicle::{
    DomainEvent, Mapper,
    recorder::{Tracking, memory::MemoryApplicationRecorder},
    store::EventStore,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Logged {
    originator_id: Uuid,
    originator_version: i64,
    timestamp: DateTime<Utc>,
    line: u32,
}

impl DomainEvent for Logged {
    const TOPIC: &'static str = "journal:Logged";

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

fn logged(line: u32) -> Logged {
    Logged {
        originator_id: Uuid::new_v4(),
        originator_version: 1,
        timestamp: Utc::now(),
        line,
    }
}

fn store() -> EventStore<MemoryApplicationRecorder, Logged> {
    EventStore::new("journal", Mapper::new(), MemoryApplicationRecorder::new())
}

#[tokio::test]
async fn catches_up_blocks_then_tails() {
    let store = store();
    for line in 1..=3 {
        store.put(&[logged(line)]).await.unwrap();
    }

    let mut subscription = store.subscribe(None, None).unwrap();
    for expected in 1..=3 {
        let (event, tracking) = subscription.next().await.unwrap().unwrap();
        assert_eq!(event.line, expected);
        assert_eq!(tracking, Tracking::new("journal", i64::from(expected)));
    }

    // Nothing further recorded: the next call must block until a commit.
    let tail = tokio::spawn(async move {
        let item = subscription.next().await;
        (item, subscription)
    });
    store.put(&[logged(4)]).await.unwrap();
    let (item, subscription) = tail.await.unwrap();
    let (event, tracking) = item.unwrap().unwrap();
    assert_eq!(event.line, 4);
    assert_eq!(tracking.notification_id, 4);

    subscription.stop();
}

#[tokio::test]
async fn starts_strictly_after_gt() {
    let store = store();
    for line in 1..=3 {
        store.put(&[logged(line)]).await.unwrap();
    }

    let mut subscription = store.subscribe(Some(2), None).unwrap();
    let (event, tracking) = subscription.next().await.unwrap().unwrap();
    assert_eq!(event.line, 3);
    assert_eq!(tracking.notification_id, 3);
    subscription.stop();
}

#[tokio::test]
async fn new_commit_is_delivered_within_the_liveness_bound() {
    let store = store();
    store.put(&[logged(1)]).await.unwrap();

    let mut subscription = store.subscribe(None, None).unwrap();
    subscription.next().await.unwrap().unwrap();

    let tail = tokio::spawn(async move { subscription.next().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    store.put(&[logged(2)]).await.unwrap();

    let item = tokio::time::timeout(Duration::from_millis(200), tail)
        .await
        .expect("a new commit must wake the subscription within 200ms")
        .unwrap();
    assert_eq!(item.unwrap().unwrap().0.line, 2);
}

#[tokio::test]
async fn stop_terminates_a_blocked_iterator_within_the_bound() {
    let store = store();
    let mut subscription = store.subscribe(None, None).unwrap();
    let handle = subscription.stop_handle();

    let blocked = tokio::spawn(async move { subscription.next().await.is_none() });
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.stop();

    let finished = tokio::time::timeout(Duration::from_millis(200), blocked)
        .await
        .expect("stop must terminate the iterator within 200ms")
        .unwrap();
    assert!(finished);
}

#[tokio::test]
async fn topic_filter_skips_but_never_stalls() {
    let store = store();

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Noise {
        originator_id: Uuid,
        originator_version: i64,
        timestamp: DateTime<Utc>,
    }

    impl DomainEvent for Noise {
        const TOPIC: &'static str = "journal:Noise";

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

    // Interleave events this subscription filters out.
    let noise_store: EventStore<MemoryApplicationRecorder, Noise> = EventStore::new(
        "journal",
        Mapper::new(),
        store.recorder().clone(),
    );
    noise_store
        .put(&[Noise {
            originator_id: Uuid::new_v4(),
            originator_version: 1,
            timestamp: Utc::now(),
        }])
        .await
        .unwrap();
    store.put(&[logged(1)]).await.unwrap();

    let mut subscription = store
        .subscribe(None, Some(vec!["journal:Logged".to_owned()]))
        .unwrap();
    let (event, tracking) = subscription.next().await.unwrap().unwrap();
    assert_eq!(event.line, 1);
    assert_eq!(tracking.notification_id, 2);
    subscription.stop();
}

#[tokio::test]
async fn each_id_is_yielded_exactly_once_in_order() {
    let store = store();
    let mut subscription = store.subscribe(None, None).unwrap();

    for line in 1..=50 {
        store.put(&[logged(line)]).await.unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..50 {
        let (_, tracking) = subscription.next().await.unwrap().unwrap();
        seen.push(tracking.notification_id);
    }
    let expected: Vec<i64> = (1..=50).collect();
    assert_eq!(seen, expected);
    subscription.stop();
}
