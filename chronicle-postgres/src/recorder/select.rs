//! Read-path helpers shared by the recorder variants.

use chronicle_core::recorder::{EventRange, Notification, RecorderError, StoredEvent};
use sqlx::{PgPool, Postgres, QueryBuilder, Row as _, postgres::PgRow};
use uuid::Uuid;

use crate::error::map_sqlx_error;

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Events of one aggregate within `range`: bounds, then direction, then
/// limit.
pub(super) async fn select_events(
    pool: &PgPool,
    table: &str,
    originator_id: Uuid,
    range: EventRange,
) -> Result<Vec<StoredEvent>, RecorderError> {
    let mut qb = QueryBuilder::<Postgres>::new(format!(
        "SELECT originator_id, originator_version, topic, state FROM {table} \
         WHERE originator_id = "
    ));
    qb.push_bind(originator_id);
    if let Some(gt) = range.gt {
        qb.push(" AND originator_version > ").push_bind(gt);
    }
    if let Some(lte) = range.lte {
        qb.push(" AND originator_version <= ").push_bind(lte);
    }
    qb.push(" ORDER BY originator_version ");
    qb.push(if range.desc { "DESC" } else { "ASC" });
    if let Some(limit) = range.effective_limit() {
        qb.push(" LIMIT ").push_bind(sql_limit(limit));
    }

    let rows = qb
        .build()
        .fetch_all(pool)
        .await
        .map_err(|error| map_sqlx_error(error, None))?;
    rows.into_iter().map(decode_event_row).collect()
}

/// Notifications in `[start, stop]`, ascending, capped at `limit`.
pub(super) async fn select_notifications(
    pool: &PgPool,
    table: &str,
    start: i64,
    limit: usize,
    stop: Option<i64>,
    topics: Option<&[String]>,
) -> Result<Vec<Notification>, RecorderError> {
    let mut qb = QueryBuilder::<Postgres>::new(format!(
        "SELECT notification_id, originator_id, originator_version, topic, state \
         FROM {table} WHERE notification_id >= "
    ));
    qb.push_bind(start);
    if let Some(stop) = stop {
        qb.push(" AND notification_id <= ").push_bind(stop);
    }
    if let Some(topics) = topics {
        qb.push(" AND topic = ANY(").push_bind(topics.to_vec()).push(")");
    }
    qb.push(" ORDER BY notification_id ASC LIMIT ");
    qb.push_bind(sql_limit(limit));

    let rows = qb
        .build()
        .fetch_all(pool)
        .await
        .map_err(|error| map_sqlx_error(error, None))?;
    rows.into_iter().map(decode_notification_row).collect()
}

/// The highest committed notification id.
pub(super) async fn max_notification_id(
    pool: &PgPool,
    table: &str,
) -> Result<Option<i64>, RecorderError> {
    let max: Option<i64> =
        sqlx::query_scalar(&format!("SELECT MAX(notification_id) FROM {table}"))
            .fetch_one(pool)
            .await
            .map_err(|error| map_sqlx_error(error, None))?;
    Ok(max)
}

fn decode_event_row(row: PgRow) -> Result<StoredEvent, RecorderError> {
    Ok(StoredEvent {
        originator_id: row
            .try_get("originator_id")
            .map_err(|error| map_sqlx_error(error, None))?,
        originator_version: row
            .try_get("originator_version")
            .map_err(|error| map_sqlx_error(error, None))?,
        topic: row
            .try_get("topic")
            .map_err(|error| map_sqlx_error(error, None))?,
        state: row
            .try_get("state")
            .map_err(|error| map_sqlx_error(error, None))?,
    })
}

fn decode_notification_row(row: PgRow) -> Result<Notification, RecorderError> {
    Ok(Notification {
        id: row
            .try_get("notification_id")
            .map_err(|error| map_sqlx_error(error, None))?,
        originator_id: row
            .try_get("originator_id")
            .map_err(|error| map_sqlx_error(error, None))?,
        originator_version: row
            .try_get("originator_version")
            .map_err(|error| map_sqlx_error(error, None))?,
        topic: row
            .try_get("topic")
            .map_err(|error| map_sqlx_error(error, None))?,
        state: row
            .try_get("state")
            .map_err(|error| map_sqlx_error(error, None))?,
    })
}
