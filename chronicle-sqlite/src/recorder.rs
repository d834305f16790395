//! SQLite recorder implementations.
//!
//! Table names derive from the application name as `{name}_events` and
//! `{name}_tracking`, lowercased. Aggregate identifiers are stored as
//! 32-character hex text; notification ids are the events table's `rowid`.

use std::time::Duration;

use chronicle_core::recorder::{
    AggregateRecorder, ApplicationRecorder, CapabilityError, EventRange, Notification,
    NotificationStream, ProcessRecorder, Recording, RecorderError, StoredEvent, Tracking,
    TrackingRecorder,
};
use sqlx::{
    Row as _, Sqlite, SqliteConnection, SqlitePool, QueryBuilder, pool::PoolConnection,
    sqlite::SqliteRow,
};
use uuid::Uuid;

use crate::{SqliteDatastore, error::map_sqlx_error};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn parse_originator_id(text: &str) -> Result<Uuid, RecorderError> {
    Uuid::try_parse(text).map_err(RecorderError::transport)
}

async fn acquire(pool: &SqlitePool) -> Result<PoolConnection<Sqlite>, RecorderError> {
    pool.acquire().await.map_err(|error| map_sqlx_error(error, None))
}

/// Start a write transaction, taking the database write lock now rather
/// than at the first write. This is what serializes writers and keeps
/// rowid assignment equal to commit order.
async fn begin_immediate(conn: &mut SqliteConnection) -> Result<(), RecorderError> {
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *conn)
        .await
        .map_err(|error| map_sqlx_error(error, None))?;
    Ok(())
}

async fn commit(conn: &mut SqliteConnection) -> Result<(), RecorderError> {
    sqlx::query("COMMIT")
        .execute(&mut *conn)
        .await
        .map_err(|error| map_sqlx_error(error, None))?;
    Ok(())
}

async fn rollback_best_effort(conn: &mut SqliteConnection) {
    if let Err(error) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
        tracing::warn!("rollback failed: {error}");
    }
}

/// Bulk-insert a batch inside an open transaction, returning assigned
/// rowids in input order.
async fn insert_batch(
    conn: &mut SqliteConnection,
    table: &str,
    events: &[StoredEvent],
    tracking_table: Option<&str>,
) -> Result<Vec<i64>, RecorderError> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "INSERT INTO {table} (originator_id, originator_version, topic, state) "
    ));
    qb.push_values(events.iter(), |mut b, event| {
        b.push_bind(event.originator_id.simple().to_string());
        b.push_bind(event.originator_version);
        b.push_bind(event.topic.clone());
        b.push_bind(event.state.clone());
    });
    qb.push(" RETURNING rowid");

    qb.build_query_scalar()
        .fetch_all(&mut *conn)
        .await
        .map_err(|error| map_sqlx_error(error, tracking_table))
}

async fn insert_tracking_row(
    conn: &mut SqliteConnection,
    tracking_table: &str,
    tracking: &Tracking,
) -> Result<(), RecorderError> {
    sqlx::query(&format!(
        "INSERT INTO {tracking_table} (application_name, notification_id) VALUES (?, ?)"
    ))
    .bind(&tracking.application_name)
    .bind(tracking.notification_id)
    .execute(&mut *conn)
    .await
    .map_err(|error| map_sqlx_error(error, Some(tracking_table)))?;
    Ok(())
}

async fn select_events(
    pool: &SqlitePool,
    table: &str,
    originator_id: Uuid,
    range: EventRange,
) -> Result<Vec<StoredEvent>, RecorderError> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT originator_id, originator_version, topic, state FROM {table} \
         WHERE originator_id = "
    ));
    qb.push_bind(originator_id.simple().to_string());
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

async fn select_notifications(
    pool: &SqlitePool,
    table: &str,
    start: i64,
    limit: usize,
    stop: Option<i64>,
    topics: Option<&[String]>,
) -> Result<Vec<Notification>, RecorderError> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT rowid AS notification_id, originator_id, originator_version, topic, state \
         FROM {table} WHERE rowid >= "
    ));
    qb.push_bind(start);
    if let Some(stop) = stop {
        qb.push(" AND rowid <= ").push_bind(stop);
    }
    if let Some(topics) = topics {
        qb.push(" AND topic IN (");
        let mut separated = qb.separated(", ");
        for topic in topics {
            separated.push_bind(topic.clone());
        }
        qb.push(")");
    }
    qb.push(" ORDER BY rowid ASC LIMIT ");
    qb.push_bind(sql_limit(limit));

    let rows = qb
        .build()
        .fetch_all(pool)
        .await
        .map_err(|error| map_sqlx_error(error, None))?;
    rows.into_iter().map(decode_notification_row).collect()
}

fn decode_event_row(row: SqliteRow) -> Result<StoredEvent, RecorderError> {
    let originator_id: String = row
        .try_get("originator_id")
        .map_err(|error| map_sqlx_error(error, None))?;
    Ok(StoredEvent {
        originator_id: parse_originator_id(&originator_id)?,
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

fn decode_notification_row(row: SqliteRow) -> Result<Notification, RecorderError> {
    let originator_id: String = row
        .try_get("originator_id")
        .map_err(|error| map_sqlx_error(error, None))?;
    Ok(Notification {
        id: row
            .try_get("notification_id")
            .map_err(|error| map_sqlx_error(error, None))?,
        originator_id: parse_originator_id(&originator_id)?,
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

fn events_table_statement(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         originator_id TEXT NOT NULL, \
         originator_version INTEGER NOT NULL, \
         topic TEXT NOT NULL, \
         state BLOB NOT NULL, \
         PRIMARY KEY (originator_id, originator_version))"
    )
}

fn tracking_table_statement(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         application_name TEXT NOT NULL, \
         notification_id INTEGER NOT NULL, \
         PRIMARY KEY (application_name, notification_id))"
    )
}

async fn insert_events_in_immediate_txn(
    datastore: &SqliteDatastore,
    events_table: &str,
    events: Vec<StoredEvent>,
    tracking_table: Option<&str>,
    tracking: Option<&Tracking>,
    with_notification_ids: bool,
) -> Result<Vec<Recording>, RecorderError> {
    if events.is_empty() && tracking.is_none() {
        return Ok(Vec::new());
    }

    let mut conn = acquire(datastore.pool()).await?;
    begin_immediate(&mut conn).await?;

    let outcome = async {
        let ids = if events.is_empty() {
            Vec::new()
        } else {
            insert_batch(&mut conn, events_table, &events, tracking_table).await?
        };
        if let (Some(table), Some(tracking)) = (tracking_table, tracking) {
            insert_tracking_row(&mut conn, table, tracking).await?;
        }
        Ok::<_, RecorderError>(ids)
    }
    .await;

    let ids = match outcome {
        Ok(ids) => ids,
        Err(error) => {
            rollback_best_effort(&mut conn).await;
            return Err(error);
        }
    };

    if let Err(error) = commit(&mut conn).await {
        rollback_best_effort(&mut conn).await;
        return Err(error);
    }

    Ok(events
        .iter()
        .zip(ids)
        .map(|(event, id)| Recording {
            originator_id: event.originator_id,
            originator_version: event.originator_version,
            notification_id: with_notification_ids.then_some(id),
        })
        .collect())
}

async fn max_tracking_id(
    pool: &SqlitePool,
    tracking_table: &str,
    application_name: &str,
) -> Result<Option<i64>, RecorderError> {
    let max: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT MAX(notification_id) FROM {tracking_table} WHERE application_name = ?"
    ))
    .bind(application_name)
    .fetch_one(pool)
    .await
    .map_err(|error| map_sqlx_error(error, None))?;
    Ok(max)
}

async fn has_tracking_id(
    pool: &SqlitePool,
    tracking_table: &str,
    application_name: &str,
    notification_id: i64,
) -> Result<bool, RecorderError> {
    let present: bool = sqlx::query_scalar(&format!(
        "SELECT EXISTS(SELECT 1 FROM {tracking_table} \
         WHERE application_name = ? AND notification_id = ?)"
    ))
    .bind(application_name)
    .bind(notification_id)
    .fetch_one(pool)
    .await
    .map_err(|error| map_sqlx_error(error, None))?;
    Ok(present)
}

async fn wait_for_tracking(
    pool: &SqlitePool,
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

/// Per-aggregate event streams without exposed notification ids.
#[derive(Clone)]
pub struct SqliteAggregateRecorder {
    datastore: SqliteDatastore,
    events_table: String,
}

impl SqliteAggregateRecorder {
    /// A recorder for `application_name`, writing to
    /// `{application_name}_events`.
    #[must_use]
    pub fn new(datastore: SqliteDatastore, application_name: &str) -> Self {
        let events_table = format!("{}_events", application_name.to_lowercase());
        Self {
            datastore,
            events_table,
        }
    }

    /// Apply the recorder's schema (idempotent).
    ///
    /// # Errors
    ///
    /// Returns a transport error when the DDL fails.
    pub async fn create_tables(&self) -> Result<(), RecorderError> {
        sqlx::query(&events_table_statement(&self.events_table))
            .execute(self.datastore.pool())
            .await
            .map_err(|error| map_sqlx_error(error, None))?;
        Ok(())
    }
}

impl AggregateRecorder for SqliteAggregateRecorder {
    #[tracing::instrument(skip(self, events), fields(table = %self.events_table, events_len = events.len()))]
    async fn insert_events(
        &self,
        events: Vec<StoredEvent>,
    ) -> Result<Vec<Recording>, RecorderError> {
        insert_events_in_immediate_txn(
            &self.datastore,
            &self.events_table,
            events,
            None,
            None,
            false,
        )
        .await
    }

    async fn select_events(
        &self,
        originator_id: Uuid,
        range: EventRange,
    ) -> Result<Vec<StoredEvent>, RecorderError> {
        select_events(
            self.datastore.pool(),
            &self.events_table,
            originator_id,
            range,
        )
        .await
    }
}

/// The application sequence over `rowid`. Subscriptions are refused: the
/// store has no push mechanism.
#[derive(Clone)]
pub struct SqliteApplicationRecorder {
    datastore: SqliteDatastore,
    events_table: String,
}

impl SqliteApplicationRecorder {
    /// A recorder for `application_name`, writing to
    /// `{application_name}_events`.
    #[must_use]
    pub fn new(datastore: SqliteDatastore, application_name: &str) -> Self {
        let events_table = format!("{}_events", application_name.to_lowercase());
        Self {
            datastore,
            events_table,
        }
    }

    /// Apply the recorder's schema (idempotent).
    ///
    /// # Errors
    ///
    /// Returns a transport error when the DDL fails.
    pub async fn create_tables(&self) -> Result<(), RecorderError> {
        sqlx::query(&events_table_statement(&self.events_table))
            .execute(self.datastore.pool())
            .await
            .map_err(|error| map_sqlx_error(error, None))?;
        Ok(())
    }

    pub(crate) fn datastore(&self) -> &SqliteDatastore {
        &self.datastore
    }

    pub(crate) fn events_table(&self) -> &str {
        &self.events_table
    }
}

impl AggregateRecorder for SqliteApplicationRecorder {
    #[tracing::instrument(skip(self, events), fields(table = %self.events_table, events_len = events.len()))]
    async fn insert_events(
        &self,
        events: Vec<StoredEvent>,
    ) -> Result<Vec<Recording>, RecorderError> {
        insert_events_in_immediate_txn(
            &self.datastore,
            &self.events_table,
            events,
            None,
            None,
            true,
        )
        .await
    }

    async fn select_events(
        &self,
        originator_id: Uuid,
        range: EventRange,
    ) -> Result<Vec<StoredEvent>, RecorderError> {
        select_events(
            self.datastore.pool(),
            &self.events_table,
            originator_id,
            range,
        )
        .await
    }
}

impl ApplicationRecorder for SqliteApplicationRecorder {
    async fn select_notifications(
        &self,
        start: i64,
        limit: usize,
        stop: Option<i64>,
        topics: Option<&[String]>,
    ) -> Result<Vec<Notification>, RecorderError> {
        select_notifications(
            self.datastore.pool(),
            &self.events_table,
            start,
            limit,
            stop,
            topics,
        )
        .await
    }

    async fn max_notification_id(&self) -> Result<Option<i64>, RecorderError> {
        let max: Option<i64> =
            sqlx::query_scalar(&format!("SELECT MAX(rowid) FROM {}", self.events_table))
                .fetch_one(self.datastore.pool())
                .await
                .map_err(|error| map_sqlx_error(error, None))?;
        Ok(max)
    }

    fn subscribe(
        &self,
        _gt: Option<i64>,
        _topics: Option<Vec<String>>,
    ) -> Result<NotificationStream, RecorderError> {
        Err(CapabilityError::NoSubscribe.into())
    }
}

/// Consumer cursors in a dedicated tracking table.
#[derive(Clone)]
pub struct SqliteTrackingRecorder {
    datastore: SqliteDatastore,
    tracking_table: String,
}

impl SqliteTrackingRecorder {
    /// A recorder for `application_name`, writing to
    /// `{application_name}_tracking`.
    #[must_use]
    pub fn new(datastore: SqliteDatastore, application_name: &str) -> Self {
        let tracking_table = format!("{}_tracking", application_name.to_lowercase());
        Self {
            datastore,
            tracking_table,
        }
    }

    /// Apply the recorder's schema (idempotent).
    ///
    /// # Errors
    ///
    /// Returns a transport error when the DDL fails.
    pub async fn create_tables(&self) -> Result<(), RecorderError> {
        sqlx::query(&tracking_table_statement(&self.tracking_table))
            .execute(self.datastore.pool())
            .await
            .map_err(|error| map_sqlx_error(error, None))?;
        Ok(())
    }
}

impl TrackingRecorder for SqliteTrackingRecorder {
    async fn insert_tracking(&self, tracking: Tracking) -> Result<(), RecorderError> {
        sqlx::query(&format!(
            "INSERT INTO {} (application_name, notification_id) VALUES (?, ?)",
            self.tracking_table
        ))
        .bind(&tracking.application_name)
        .bind(tracking.notification_id)
        .execute(self.datastore.pool())
        .await
        .map_err(|error| map_sqlx_error(error, Some(&self.tracking_table)))?;
        Ok(())
    }

    async fn max_tracking_id(&self, application_name: &str) -> Result<Option<i64>, RecorderError> {
        max_tracking_id(self.datastore.pool(), &self.tracking_table, application_name).await
    }

    async fn has_tracking_id(
        &self,
        application_name: &str,
        notification_id: i64,
    ) -> Result<bool, RecorderError> {
        has_tracking_id(
            self.datastore.pool(),
            &self.tracking_table,
            application_name,
            notification_id,
        )
        .await
    }

    async fn wait(
        &self,
        application_name: &str,
        notification_id: i64,
        timeout: Duration,
    ) -> Result<(), RecorderError> {
        wait_for_tracking(
            self.datastore.pool(),
            &self.tracking_table,
            application_name,
            notification_id,
            timeout,
        )
        .await
    }
}

/// Application recorder joined with a tracking table in one write
/// transaction.
#[derive(Clone)]
pub struct SqliteProcessRecorder {
    application: SqliteApplicationRecorder,
    tracking_table: String,
}

impl SqliteProcessRecorder {
    /// A recorder for `application_name`, writing to
    /// `{application_name}_events` and `{application_name}_tracking`.
    #[must_use]
    pub fn new(datastore: SqliteDatastore, application_name: &str) -> Self {
        let tracking_table = format!("{}_tracking", application_name.to_lowercase());
        Self {
            application: SqliteApplicationRecorder::new(datastore, application_name),
            tracking_table,
        }
    }

    /// Apply the recorder's schema (idempotent).
    ///
    /// # Errors
    ///
    /// Returns a transport error when the DDL fails.
    pub async fn create_tables(&self) -> Result<(), RecorderError> {
        self.application.create_tables().await?;
        sqlx::query(&tracking_table_statement(&self.tracking_table))
            .execute(self.application.datastore().pool())
            .await
            .map_err(|error| map_sqlx_error(error, None))?;
        Ok(())
    }
}

impl AggregateRecorder for SqliteProcessRecorder {
    async fn insert_events(
        &self,
        events: Vec<StoredEvent>,
    ) -> Result<Vec<Recording>, RecorderError> {
        self.insert_events_with_tracking(events, None).await
    }

    async fn select_events(
        &self,
        originator_id: Uuid,
        range: EventRange,
    ) -> Result<Vec<StoredEvent>, RecorderError> {
        self.application.select_events(originator_id, range).await
    }
}

impl ApplicationRecorder for SqliteProcessRecorder {
    async fn select_notifications(
        &self,
        start: i64,
        limit: usize,
        stop: Option<i64>,
        topics: Option<&[String]>,
    ) -> Result<Vec<Notification>, RecorderError> {
        self.application
            .select_notifications(start, limit, stop, topics)
            .await
    }

    async fn max_notification_id(&self) -> Result<Option<i64>, RecorderError> {
        self.application.max_notification_id().await
    }

    fn subscribe(
        &self,
        gt: Option<i64>,
        topics: Option<Vec<String>>,
    ) -> Result<NotificationStream, RecorderError> {
        self.application.subscribe(gt, topics)
    }
}

impl TrackingRecorder for SqliteProcessRecorder {
    async fn insert_tracking(&self, tracking: Tracking) -> Result<(), RecorderError> {
        sqlx::query(&format!(
            "INSERT INTO {} (application_name, notification_id) VALUES (?, ?)",
            self.tracking_table
        ))
        .bind(&tracking.application_name)
        .bind(tracking.notification_id)
        .execute(self.application.datastore().pool())
        .await
        .map_err(|error| map_sqlx_error(error, Some(&self.tracking_table)))?;
        Ok(())
    }

    async fn max_tracking_id(&self, application_name: &str) -> Result<Option<i64>, RecorderError> {
        max_tracking_id(
            self.application.datastore().pool(),
            &self.tracking_table,
            application_name,
        )
        .await
    }

    async fn has_tracking_id(
        &self,
        application_name: &str,
        notification_id: i64,
    ) -> Result<bool, RecorderError> {
        has_tracking_id(
            self.application.datastore().pool(),
            &self.tracking_table,
            application_name,
            notification_id,
        )
        .await
    }

    async fn wait(
        &self,
        application_name: &str,
        notification_id: i64,
        timeout: Duration,
    ) -> Result<(), RecorderError> {
        wait_for_tracking(
            self.application.datastore().pool(),
            &self.tracking_table,
            application_name,
            notification_id,
            timeout,
        )
        .await
    }
}

impl ProcessRecorder for SqliteProcessRecorder {
    #[tracing::instrument(
        skip(self, events, tracking),
        fields(
            table = %self.application.events_table(),
            events_len = events.len(),
            has_tracking = tracking.is_some()
        )
    )]
    async fn insert_events_with_tracking(
        &self,
        events: Vec<StoredEvent>,
        tracking: Option<Tracking>,
    ) -> Result<Vec<Recording>, RecorderError> {
        insert_events_in_immediate_txn(
            self.application.datastore(),
            self.application.events_table(),
            events,
            Some(&self.tracking_table),
            tracking.as_ref(),
            true,
        )
        .await
    }
}
