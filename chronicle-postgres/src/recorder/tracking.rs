//! Tracking-table helpers shared by the tracking and process recorders.

use std::time::Duration;

use chronicle_core::recorder::{RecorderError, Tracking};
use sqlx::PgPool;

use crate::error::map_sqlx_error;

/// How often `wait` re-checks the table between pushes of the timeout.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub(super) fn create_table_statement(tracking_table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {tracking_table} (\
         application_name TEXT NOT NULL, \
         notification_id BIGINT NOT NULL, \
         PRIMARY KEY (application_name, notification_id))"
    )
}

pub(super) async fn insert_tracking(
    pool: &PgPool,
    tracking_table: &str,
    tracking: &Tracking,
) -> Result<(), RecorderError> {
    sqlx::query(&format!(
        "INSERT INTO {tracking_table} (application_name, notification_id) VALUES ($1, $2)"
    ))
    .bind(&tracking.application_name)
    .bind(tracking.notification_id)
    .execute(pool)
    .await
    .map_err(|error| map_sqlx_error(error, Some(tracking_table)))?;
    Ok(())
}

pub(super) async fn max_tracking_id(
    pool: &PgPool,
    tracking_table: &str,
    application_name: &str,
) -> Result<Option<i64>, RecorderError> {
    let max: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT MAX(notification_id) FROM {tracking_table} WHERE application_name = $1"
    ))
    .bind(application_name)
    .fetch_one(pool)
    .await
    .map_err(|error| map_sqlx_error(error, None))?;
    Ok(max)
}

pub(super) async fn has_tracking_id(
    pool: &PgPool,
    tracking_table: &str,
    application_name: &str,
    notification_id: i64,
) -> Result<bool, RecorderError> {
    let present: bool = sqlx::query_scalar(&format!(
        "SELECT EXISTS(SELECT 1 FROM {tracking_table} \
         WHERE application_name = $1 AND notification_id = $2)"
    ))
    .bind(application_name)
    .bind(notification_id)
    .fetch_one(pool)
    .await
    .map_err(|error| map_sqlx_error(error, None))?;
    Ok(present)
}

/// Poll until the cursor exists or `timeout` elapses.
///
/// Transport errors end the wait immediately; a processor that cannot be
/// observed is not one worth waiting for.
pub(super) async fn wait(
    pool: &PgPool,
    tracking_table: &str,
    application_name: &str,
    notification_id: i64,
    timeout: Duration,
) -> Result<(), RecorderError> {
    let outcome = tokio::time::timeout(timeout, async {
        let mut tick = tokio::time::interval(WAIT_POLL_INTERVAL);
        loop {
            tick.tick().await;
            if has_tracking_id(pool, tracking_table, application_name, notification_id).await? {
                return Ok(());
            }
        }
    })
    .await;

    match outcome {
        Ok(result) => result,
        Err(_elapsed) => Err(RecorderError::Timeout(timeout)),
    }
}
