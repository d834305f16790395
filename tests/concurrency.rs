//! Concurrent writers: dense ids, and a tailer's observed maximum is a
//! safe high-water mark.

use std::collections::HashSet;

use chronicle::{
    DomainEvent, Mapper,
    recorder::{ApplicationRecorder, memory::MemoryApplicationRecorder},
    store::EventStore,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Moved {
    originator_id: Uuid,
    originator_version: i64,
    timestamp: DateTime<Utc>,
}

impl DomainEvent for Moved {
    const TOPIC: &'static str = "fleet:Moved";

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

fn moved() -> Moved {
    Moved {
        originator_id: Uuid::new_v4(),
        originator_version: 1,
        timestamp: Utc::now(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_produce_a_dense_ordered_sequence() {
    let store = EventStore::new("fleet", Mapper::new(), MemoryApplicationRecorder::new());

    let writers: Vec<_> = (0..2)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                let mut assigned = Vec::with_capacity(100);
                for _ in 0..100 {
                    let recordings = store.put(&[moved()]).await.unwrap();
                    assigned.push(recordings[0].notification_id.unwrap());
                }
                assigned
            })
        })
        .collect();

    let mut all_assigned = Vec::new();
    for writer in writers {
        let assigned = writer.await.unwrap();
        // Each writer sees its own ids strictly increase: later commits
        // never receive earlier ids.
        assert!(assigned.windows(2).all(|pair| pair[0] < pair[1]));
        all_assigned.extend(assigned);
    }

    let distinct: HashSet<i64> = all_assigned.iter().copied().collect();
    assert_eq!(distinct.len(), 200);

    let notifications = store
        .recorder()
        .select_notifications(1, 1000, None, None)
        .await
        .unwrap();
    let ids: Vec<i64> = notifications.iter().map(|n| n.id).collect();
    let expected: Vec<i64> = (1..=200).collect();
    assert_eq!(ids, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn observed_max_is_always_fully_readable() {
    let store = EventStore::new("fleet", Mapper::new(), MemoryApplicationRecorder::new());

    let writer = {
        let store = store.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                store.put(&[moved()]).await.unwrap();
            }
        })
    };

    // A tailer that samples the high-water mark mid-write must find every
    // id at or below its observed maximum.
    let reader = {
        let recorder = store.recorder().clone();
        tokio::spawn(async move {
            loop {
                let Some(max) = recorder.max_notification_id().await.unwrap() else {
                    tokio::task::yield_now().await;
                    continue;
                };
                let limit = usize::try_from(max).unwrap();
                let notifications = recorder
                    .select_notifications(1, limit, Some(max), None)
                    .await
                    .unwrap();
                assert_eq!(notifications.len(), limit);
                assert!(
                    notifications
                        .iter()
                        .enumerate()
                        .all(|(index, n)| n.id == i64::try_from(index).unwrap() + 1)
                );
                if max == 200 {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
    };

    writer.await.unwrap();
    reader.await.unwrap();
}
