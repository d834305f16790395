//! Write-path helpers shared by the recorder variants.

use std::time::Duration;

use chronicle_core::recorder::{Recording, RecorderError, StoredEvent, Tracking};
use nonempty::NonEmpty;
use sqlx::{Postgres, QueryBuilder, Transaction};

use crate::error::map_sqlx_error;

/// Serialize writers on the events table.
///
/// The `EXCLUSIVE` lock, held from here to commit, forces concurrent
/// insert transactions to commit in the order their serial notification
/// ids were assigned. Without it, a tailer that reads "up to the current
/// max id" can miss a row that commits later with a lower id. `EXCLUSIVE`
/// does not block the `ACCESS SHARE` lock taken by reads, so selects run
/// concurrently.
pub(super) async fn lock_table(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    lock_timeout: Duration,
) -> Result<(), RecorderError> {
    sqlx::query(&format!(
        "SET LOCAL lock_timeout = '{}ms'",
        lock_timeout.as_millis()
    ))
    .execute(&mut **tx)
    .await
    .map_err(|error| map_sqlx_error(error, None))?;

    sqlx::query(&format!("LOCK TABLE {table} IN EXCLUSIVE MODE"))
        .execute(&mut **tx)
        .await
        .map_err(|error| map_sqlx_error(error, None))?;
    Ok(())
}

/// Bulk-insert a batch inside an open transaction.
///
/// With `with_notification_ids`, the assigned serial ids are read back via
/// `RETURNING` and paired with the inputs, in input order.
pub(super) async fn insert_events(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    events: NonEmpty<StoredEvent>,
    with_notification_ids: bool,
    tracking_table: Option<&str>,
) -> Result<Vec<Recording>, RecorderError> {
    let keys: Vec<(uuid::Uuid, i64)> = events
        .iter()
        .map(|event| (event.originator_id, event.originator_version))
        .collect();

    let mut qb = QueryBuilder::<Postgres>::new(format!(
        "INSERT INTO {table} (originator_id, originator_version, topic, state) "
    ));
    qb.push_values(events.into_iter(), |mut b, event| {
        b.push_bind(event.originator_id);
        b.push_bind(event.originator_version);
        b.push_bind(event.topic);
        b.push_bind(event.state);
    });

    if with_notification_ids {
        qb.push(" RETURNING notification_id");
        let ids: Vec<i64> = qb
            .build_query_scalar()
            .fetch_all(&mut **tx)
            .await
            .map_err(|error| map_sqlx_error(error, tracking_table))?;
        Ok(keys
            .into_iter()
            .zip(ids)
            .map(|((originator_id, originator_version), id)| Recording {
                originator_id,
                originator_version,
                notification_id: Some(id),
            })
            .collect())
    } else {
        qb.build()
            .execute(&mut **tx)
            .await
            .map_err(|error| map_sqlx_error(error, tracking_table))?;
        Ok(keys
            .into_iter()
            .map(|(originator_id, originator_version)| Recording {
                originator_id,
                originator_version,
                notification_id: None,
            })
            .collect())
    }
}

/// Insert a consumer cursor inside an open transaction.
pub(super) async fn insert_tracking_row(
    tx: &mut Transaction<'_, Postgres>,
    tracking_table: &str,
    tracking: &Tracking,
) -> Result<(), RecorderError> {
    sqlx::query(&format!(
        "INSERT INTO {tracking_table} (application_name, notification_id) VALUES ($1, $2)"
    ))
    .bind(&tracking.application_name)
    .bind(tracking.notification_id)
    .execute(&mut **tx)
    .await
    .map_err(|error| map_sqlx_error(error, Some(tracking_table)))?;
    Ok(())
}

/// Emit a `pg_notify` for the batch so live pumps poll without delay.
///
/// The payload carries the batch's first notification id; pumps treat any
/// notification as a poll trigger.
pub(super) async fn notify_batch(
    tx: &mut Transaction<'_, Postgres>,
    channel: &str,
    recordings: &[Recording],
) -> Result<(), RecorderError> {
    let Some(first) = recordings.iter().find_map(|recording| recording.notification_id) else {
        return Ok(());
    };
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(channel)
        .bind(first.to_string())
        .execute(&mut **tx)
        .await
        .map_err(|error| map_sqlx_error(error, None))?;
    Ok(())
}
