//! Domain event contracts.
//!
//! The persistence core never inspects a domain event beyond three fields:
//! the originator (aggregate) identifier, the originator version, and a
//! timestamp. Everything else is opaque payload handled by the
//! [`mapper`](crate::mapper).

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use uuid::Uuid;

/// Error returned when rebuilding a domain event from a decoded payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The topic was not recognized by this event set.
    #[error("unknown topic `{topic}`, expected one of {expected:?}")]
    UnknownTopic {
        /// The unrecognized topic string.
        topic: String,
        /// The topics this event set can rebuild.
        expected: &'static [&'static str],
    },
    /// The payload did not match the shape of the event type named by the
    /// topic.
    #[error("payload incompatible with topic: {0}")]
    Incompatible(#[source] serde_json::Error),
}

/// Marker trait for a concrete domain event type.
///
/// Each event type carries a unique [`Self::TOPIC`] which names it on the
/// wire ("module:Class" style strings work well), plus accessors for the
/// three fields the core needs to position the event in its aggregate
/// sequence.
pub trait DomainEvent {
    /// Unique wire name of this event type.
    const TOPIC: &'static str;

    /// Identifier of the aggregate this event belongs to.
    fn originator_id(&self) -> Uuid;

    /// Position of this event in its aggregate's sequence.
    fn originator_version(&self) -> i64;

    /// When the event occurred.
    fn timestamp(&self) -> DateTime<Utc>;
}

/// The set of domain event types an application records and replays.
///
/// This is the compile-time topic registry: `TOPICS` enumerates every topic
/// the set can rebuild, and [`Self::from_payload`] dispatches a decoded
/// payload to the matching constructor. Applications implement it on an enum
/// with one variant per event type; a single event type is its own set via
/// the blanket implementation.
///
/// ```ignore
/// enum AccountEvent {
///     Opened(AccountOpened),
///     Credited(AccountCredited),
/// }
///
/// impl EventSet for AccountEvent {
///     const TOPICS: &'static [&'static str] =
///         &[AccountOpened::TOPIC, AccountCredited::TOPIC];
///     // dispatch on `topic` in `from_payload`, on `self` elsewhere
/// }
/// ```
pub trait EventSet: Sized + Send + Sync {
    /// Every topic this set can rebuild.
    const TOPICS: &'static [&'static str];

    /// The topic of this particular event.
    fn topic(&self) -> &'static str;

    /// Identifier of the aggregate this event belongs to.
    fn originator_id(&self) -> Uuid;

    /// Position of this event in its aggregate's sequence.
    fn originator_version(&self) -> i64;

    /// When the event occurred.
    fn timestamp(&self) -> DateTime<Utc>;

    /// Serialize the event's payload to a structured value.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json::Error` if the payload cannot be represented.
    fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error>;

    /// Rebuild the event named by `topic` from a decoded payload.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::UnknownTopic`] if the topic is not in
    /// [`Self::TOPICS`], or [`PayloadError::Incompatible`] if the payload
    /// does not deserialize into the matching type.
    fn from_payload(topic: &str, payload: serde_json::Value) -> Result<Self, PayloadError>;
}

impl<T> EventSet for T
where
    T: DomainEvent + Serialize + DeserializeOwned + Send + Sync,
{
    const TOPICS: &'static [&'static str] = &[T::TOPIC];

    fn topic(&self) -> &'static str {
        T::TOPIC
    }

    fn originator_id(&self) -> Uuid {
        DomainEvent::originator_id(self)
    }

    fn originator_version(&self) -> i64 {
        DomainEvent::originator_version(self)
    }

    fn timestamp(&self) -> DateTime<Utc> {
        DomainEvent::timestamp(self)
    }

    fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn from_payload(topic: &str, payload: serde_json::Value) -> Result<Self, PayloadError> {
        if topic != T::TOPIC {
            return Err(PayloadError::UnknownTopic {
                topic: topic.to_string(),
                expected: Self::TOPICS,
            });
        }
        serde_json::from_value(payload).map_err(PayloadError::Incompatible)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Opened {
        originator_id: Uuid,
        originator_version: i64,
        timestamp: DateTime<Utc>,
        owner: String,
    }

    impl DomainEvent for Opened {
        const TOPIC: &'static str = "account:Opened";

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

    fn opened() -> Opened {
        Opened {
            originator_id: Uuid::new_v4(),
            originator_version: 1,
            timestamp: Utc::now(),
            owner: "Alice".to_owned(),
        }
    }

    #[test]
    fn single_event_type_is_its_own_set() {
        assert_eq!(<Opened as EventSet>::TOPICS, &["account:Opened"]);
        let event = opened();
        assert_eq!(EventSet::topic(&event), "account:Opened");
    }

    #[test]
    fn payload_round_trips_through_the_set() {
        let event = opened();
        let payload = event.to_payload().unwrap();
        let rebuilt = Opened::from_payload("account:Opened", payload).unwrap();
        assert_eq!(rebuilt, event);
    }

    #[test]
    fn unknown_topic_is_rejected() {
        let payload = opened().to_payload().unwrap();
        let err = Opened::from_payload("account:Closed", payload).unwrap_err();
        assert!(matches!(err, PayloadError::UnknownTopic { .. }));
        assert!(err.to_string().contains("account:Closed"));
    }

    #[test]
    fn incompatible_payload_is_rejected() {
        let err =
            Opened::from_payload("account:Opened", serde_json::json!({"owner": 1})).unwrap_err();
        assert!(matches!(err, PayloadError::Incompatible(_)));
    }
}
