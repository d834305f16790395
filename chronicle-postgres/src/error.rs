//! Mapping `sqlx` failures onto the recorder error taxonomy.

use chronicle_core::recorder::{IntegrityError, PersistenceError, RecorderError};

/// PostgreSQL `lock_not_available`: a `SET LOCAL lock_timeout` bound was
/// exceeded while acquiring the writer lock.
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// PostgreSQL `query_canceled`, raised for statement timeouts.
const QUERY_CANCELED: &str = "57014";

enum Class {
    Version,
    Tracking,
    Timeout,
    PoolExhausted,
    Transport,
}

/// Classify a `sqlx` failure.
///
/// Unique violations become integrity errors: against the tracking table's
/// constraints they are [`IntegrityError::Tracking`], otherwise
/// [`IntegrityError::Version`]. Lock and statement timeouts become
/// [`PersistenceError::Timeout`], pool exhaustion becomes
/// [`PersistenceError::PoolExhausted`], and everything else is transport.
pub(crate) fn map_sqlx_error(error: sqlx::Error, tracking_table: Option<&str>) -> RecorderError {
    let class = match &error {
        sqlx::Error::Database(db) => {
            if db.is_unique_violation() {
                let from_tracking = tracking_table.is_some_and(|table| {
                    let table = table.rsplit('.').next().unwrap_or(table);
                    db.constraint().is_some_and(|name| name.starts_with(table))
                        || db.message().contains(table)
                });
                if from_tracking {
                    Class::Tracking
                } else {
                    Class::Version
                }
            } else {
                match db.code().as_deref() {
                    Some(LOCK_NOT_AVAILABLE | QUERY_CANCELED) => Class::Timeout,
                    _ => Class::Transport,
                }
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
