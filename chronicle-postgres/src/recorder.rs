//! PostgreSQL recorder implementations.
//!
//! Table names derive from the application name: `{name}_events` and
//! `{name}_tracking`, lowercased and optionally schema-qualified. The name
//! must be a plain SQL identifier; it is interpolated into DDL and DML.

use std::time::Duration;

use chronicle_core::recorder::{
    AggregateRecorder, ApplicationRecorder, EventRange, Notification, NotificationStream,
    ProcessRecorder, Recording, RecorderError, StoredEvent, Tracking, TrackingRecorder,
};
use nonempty::NonEmpty;
use uuid::Uuid;

use crate::{PostgresDatastore, error::map_sqlx_error};

mod insert;
mod live;
mod select;
mod subscribe;
mod tracking;

use live::LivePump;

/// Strip the schema qualifier for use in index names.
fn base_name(table: &str) -> &str {
    table.rsplit('.').next().unwrap_or(table)
}

/// Per-aggregate event streams without a notification sequence.
#[derive(Clone)]
pub struct PostgresAggregateRecorder {
    datastore: PostgresDatastore,
    events_table: String,
}

impl PostgresAggregateRecorder {
    /// A recorder for `application_name`, writing to
    /// `{application_name}_events`.
    #[must_use]
    pub fn new(datastore: PostgresDatastore, application_name: &str) -> Self {
        let events_table = datastore.qualify(&format!("{}_events", application_name.to_lowercase()));
        Self {
            datastore,
            events_table,
        }
    }

    /// Apply the recorder's schema (idempotent `CREATE TABLE IF NOT
    /// EXISTS` DDL), for deployments where the store manages its own
    /// tables.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the DDL fails.
    #[tracing::instrument(skip(self), fields(table = %self.events_table))]
    pub async fn create_tables(&self) -> Result<(), RecorderError> {
        let statement = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             originator_id UUID NOT NULL, \
             originator_version BIGINT NOT NULL, \
             topic TEXT NOT NULL, \
             state BYTEA NOT NULL, \
             PRIMARY KEY (originator_id, originator_version))",
            self.events_table
        );
        sqlx::query(&statement)
            .execute(self.datastore.pool())
            .await
            .map_err(|error| map_sqlx_error(error, None))?;
        Ok(())
    }
}

impl AggregateRecorder for PostgresAggregateRecorder {
    #[tracing::instrument(skip(self, events), fields(table = %self.events_table, events_len = events.len()))]
    async fn insert_events(
        &self,
        events: Vec<StoredEvent>,
    ) -> Result<Vec<Recording>, RecorderError> {
        let Some(events) = NonEmpty::from_vec(events) else {
            return Ok(Vec::new());
        };

        let mut tx = self
            .datastore
            .pool()
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, None))?;
        insert::lock_table(
            &mut tx,
            &self.events_table,
            self.datastore.config().lock_timeout,
        )
        .await?;
        let recordings =
            insert::insert_events(&mut tx, &self.events_table, events, false, None).await?;
        tx.commit()
            .await
            .map_err(|error| map_sqlx_error(error, None))?;
        Ok(recordings)
    }

    async fn select_events(
        &self,
        originator_id: Uuid,
        range: EventRange,
    ) -> Result<Vec<StoredEvent>, RecorderError> {
        select::select_events(
            self.datastore.pool(),
            &self.events_table,
            originator_id,
            range,
        )
        .await
    }
}

/// The application sequence: events with serially assigned notification
/// ids, live-tailing subscriptions over `LISTEN/NOTIFY`.
#[derive(Clone)]
pub struct PostgresApplicationRecorder {
    datastore: PostgresDatastore,
    events_table: String,
    channel: String,
    pump: LivePump,
}

impl PostgresApplicationRecorder {
    /// A recorder for `application_name`, writing to
    /// `{application_name}_events` and notifying on
    /// `{application_name}_events_notifications`.
    #[must_use]
    pub fn new(datastore: PostgresDatastore, application_name: &str) -> Self {
        let events_table = datastore.qualify(&format!("{}_events", application_name.to_lowercase()));
        let channel = format!("{}_notifications", events_table.replace('.', "_"));
        let pump = LivePump::new(
            datastore.pool().clone(),
            events_table.clone(),
            channel.clone(),
        );
        Self {
            datastore,
            events_table,
            channel,
            pump,
        }
    }

    /// Apply the recorder's schema (idempotent).
    ///
    /// # Errors
    ///
    /// Returns a transport error when the DDL fails.
    #[tracing::instrument(skip(self), fields(table = %self.events_table))]
    pub async fn create_tables(&self) -> Result<(), RecorderError> {
        for statement in self.create_table_statements() {
            sqlx::query(&statement)
                .execute(self.datastore.pool())
                .await
                .map_err(|error| map_sqlx_error(error, None))?;
        }
        Ok(())
    }

    fn create_table_statements(&self) -> Vec<String> {
        let table = &self.events_table;
        let base = base_name(table);
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 originator_id UUID NOT NULL, \
                 originator_version BIGINT NOT NULL, \
                 topic TEXT NOT NULL, \
                 state BYTEA NOT NULL, \
                 notification_id BIGSERIAL, \
                 PRIMARY KEY (originator_id, originator_version))"
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {base}_notification_id_idx \
                 ON {table} (notification_id ASC)"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {base}_topic_idx \
                 ON {table} (topic, notification_id)"
            ),
        ]
    }

    pub(crate) fn datastore(&self) -> &PostgresDatastore {
        &self.datastore
    }

    pub(crate) fn events_table(&self) -> &str {
        &self.events_table
    }

    pub(crate) fn pump(&self) -> &LivePump {
        &self.pump
    }
}

impl AggregateRecorder for PostgresApplicationRecorder {
    #[tracing::instrument(skip(self, events), fields(table = %self.events_table, events_len = events.len()))]
    async fn insert_events(
        &self,
        events: Vec<StoredEvent>,
    ) -> Result<Vec<Recording>, RecorderError> {
        let Some(events) = NonEmpty::from_vec(events) else {
            return Ok(Vec::new());
        };

        let mut tx = self
            .datastore
            .pool()
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, None))?;
        insert::lock_table(
            &mut tx,
            &self.events_table,
            self.datastore.config().lock_timeout,
        )
        .await?;
        let recordings =
            insert::insert_events(&mut tx, &self.events_table, events, true, None).await?;
        insert::notify_batch(&mut tx, &self.channel, &recordings).await?;
        tx.commit()
            .await
            .map_err(|error| map_sqlx_error(error, None))?;
        Ok(recordings)
    }

    async fn select_events(
        &self,
        originator_id: Uuid,
        range: EventRange,
    ) -> Result<Vec<StoredEvent>, RecorderError> {
        select::select_events(
            self.datastore.pool(),
            &self.events_table,
            originator_id,
            range,
        )
        .await
    }
}

impl ApplicationRecorder for PostgresApplicationRecorder {
    async fn select_notifications(
        &self,
        start: i64,
        limit: usize,
        stop: Option<i64>,
        topics: Option<&[String]>,
    ) -> Result<Vec<Notification>, RecorderError> {
        select::select_notifications(
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
        select::max_notification_id(self.datastore.pool(), &self.events_table).await
    }

    fn subscribe(
        &self,
        gt: Option<i64>,
        topics: Option<Vec<String>>,
    ) -> Result<NotificationStream, RecorderError> {
        Ok(subscribe::notification_stream(self.clone(), gt, topics))
    }
}

/// Consumer cursors in a dedicated tracking table.
#[derive(Clone)]
pub struct PostgresTrackingRecorder {
    datastore: PostgresDatastore,
    tracking_table: String,
}

impl PostgresTrackingRecorder {
    /// A recorder for `application_name`, writing to
    /// `{application_name}_tracking`.
    #[must_use]
    pub fn new(datastore: PostgresDatastore, application_name: &str) -> Self {
        let tracking_table =
            datastore.qualify(&format!("{}_tracking", application_name.to_lowercase()));
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
    #[tracing::instrument(skip(self), fields(table = %self.tracking_table))]
    pub async fn create_tables(&self) -> Result<(), RecorderError> {
        sqlx::query(&tracking::create_table_statement(&self.tracking_table))
            .execute(self.datastore.pool())
            .await
            .map_err(|error| map_sqlx_error(error, None))?;
        Ok(())
    }
}

impl TrackingRecorder for PostgresTrackingRecorder {
    async fn insert_tracking(&self, value: Tracking) -> Result<(), RecorderError> {
        tracking::insert_tracking(self.datastore.pool(), &self.tracking_table, &value).await
    }

    async fn max_tracking_id(&self, application_name: &str) -> Result<Option<i64>, RecorderError> {
        tracking::max_tracking_id(self.datastore.pool(), &self.tracking_table, application_name)
            .await
    }

    async fn has_tracking_id(
        &self,
        application_name: &str,
        notification_id: i64,
    ) -> Result<bool, RecorderError> {
        tracking::has_tracking_id(
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
        tracking::wait(
            self.datastore.pool(),
            &self.tracking_table,
            application_name,
            notification_id,
            timeout,
        )
        .await
    }
}

/// Application recorder joined with a tracking table: one transaction
/// writes events and the consumer cursor.
#[derive(Clone)]
pub struct PostgresProcessRecorder {
    application: PostgresApplicationRecorder,
    tracking_table: String,
}

impl PostgresProcessRecorder {
    /// A recorder for `application_name`, writing to
    /// `{application_name}_events` and `{application_name}_tracking`.
    #[must_use]
    pub fn new(datastore: PostgresDatastore, application_name: &str) -> Self {
        let tracking_table =
            datastore.qualify(&format!("{}_tracking", application_name.to_lowercase()));
        Self {
            application: PostgresApplicationRecorder::new(datastore, application_name),
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
        sqlx::query(&tracking::create_table_statement(&self.tracking_table))
            .execute(self.application.datastore().pool())
            .await
            .map_err(|error| map_sqlx_error(error, None))?;
        Ok(())
    }
}

impl AggregateRecorder for PostgresProcessRecorder {
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

impl ApplicationRecorder for PostgresProcessRecorder {
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

impl TrackingRecorder for PostgresProcessRecorder {
    async fn insert_tracking(&self, value: Tracking) -> Result<(), RecorderError> {
        tracking::insert_tracking(
            self.application.datastore().pool(),
            &self.tracking_table,
            &value,
        )
        .await
    }

    async fn max_tracking_id(&self, application_name: &str) -> Result<Option<i64>, RecorderError> {
        tracking::max_tracking_id(
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
        tracking::has_tracking_id(
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
        tracking::wait(
            self.application.datastore().pool(),
            &self.tracking_table,
            application_name,
            notification_id,
            timeout,
        )
        .await
    }
}

impl ProcessRecorder for PostgresProcessRecorder {
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
        if events.is_empty() && tracking.is_none() {
            return Ok(Vec::new());
        }

        let datastore = self.application.datastore();
        let mut tx = datastore
            .pool()
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, Some(&self.tracking_table)))?;

        let recordings = match NonEmpty::from_vec(events) {
            Some(events) => {
                insert::lock_table(
                    &mut tx,
                    self.application.events_table(),
                    datastore.config().lock_timeout,
                )
                .await?;
                insert::insert_events(
                    &mut tx,
                    self.application.events_table(),
                    events,
                    true,
                    Some(&self.tracking_table),
                )
                .await?
            }
            None => Vec::new(),
        };

        if let Some(tracking) = &tracking {
            insert::insert_tracking_row(&mut tx, &self.tracking_table, tracking).await?;
        }
        if !recordings.is_empty() {
            insert::notify_batch(&mut tx, self.application.channel.as_str(), &recordings).await?;
        }

        tx.commit()
            .await
            .map_err(|error| map_sqlx_error(error, Some(&self.tracking_table)))?;
        Ok(recordings)
    }
}
