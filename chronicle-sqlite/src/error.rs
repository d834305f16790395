//! Mapping `sqlx` failures onto the recorder error taxonomy.

use chronicle_core::recorder::{IntegrityError, PersistenceError, RecorderError};

enum Class {
    Version,
    Tracking,
    Timeout,
    PoolExhausted,
    Transport,
}

/// Classify a `sqlx` failure.
///
/// SQLite reports a busy database when a writer could not acquire the lock
/// within the busy timeout; that maps to [`PersistenceError::Timeout`].
/// Unique violations name the offending table in their message, which is
/// how events and tracking conflicts are told apart.
pub(crate) fn map_sqlx_error(error: sqlx::Error, tracking_table: Option<&str>) -> RecorderError {
    let class = match &error {
        sqlx::Error::Database(db) => {
            if db.is_unique_violation() {
                let from_tracking =
                    tracking_table.is_some_and(|table| db.message().contains(table));
                if from_tracking {
                    Class::Tracking
                } else {
                    Class::Version
                }
            } else if db.message().contains("database is locked")
                || db.message().contains("database table is locked")
            {
                Class::Timeout
            } else {
                Class::Transport
            }
        }
        sqlx::Error::PoolTimedOut => Class::PoolExhausted,
        _ => Class::Transport,
    };

    match class {
        Class::Version => IntegrityError::Version.into(),
        Class::Tracking => IntegrityError::Tracking.into(),
        Class::Timeout => PersistenceError::Timeout.into(),
        Class::PoolExhausted => PersistenceError::PoolExhausted.into(),
        Class::Transport => RecorderError::transport(error),
    }
}
