#![doc = include_str!("../README.md")]

pub use chronicle_core::{
    cipher, compressor, env, event,
    event::{DomainEvent, EventSet},
    mapper,
    mapper::Mapper,
    runner,
    runner::{Projection, ProjectionRunner},
    subscription,
    subscription::Subscription,
    transcoder,
};

pub mod store {
    pub use chronicle_core::store::{EventStore, StoreError};
}

pub mod recorder {
    pub use chronicle_core::recorder::{
        AggregateRecorder, ApplicationRecorder, CapabilityError, EventRange, IntegrityError,
        Notification, NotificationStream, PersistenceError, ProcessRecorder, Recording,
        RecorderError, StoredEvent, Tracking, TrackingRecorder, memory,
    };

    #[cfg(feature = "postgres")]
    #[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
    pub mod postgres {
        pub use chronicle_postgres::{
            PostgresAggregateRecorder, PostgresApplicationRecorder, PostgresConfig,
            PostgresDatastore, PostgresProcessRecorder, PostgresTrackingRecorder,
        };
    }

    #[cfg(feature = "sqlite")]
    #[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
    pub mod sqlite {
        pub use chronicle_sqlite::{
            SqliteAggregateRecorder, SqliteApplicationRecorder, SqliteConfig, SqliteDatastore,
            SqliteProcessRecorder, SqliteTrackingRecorder,
        };
    }
}
