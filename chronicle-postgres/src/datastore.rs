//! Connection handling and configuration.

use std::{sync::Arc, time::Duration};

use chronicle_core::env::{Env, EnvError};
use sqlx::{
    Executor as _, PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
};

/// Configuration keys read by [`PostgresConfig::from_env`].
pub mod keys {
    /// Database name. Required.
    pub const POSTGRES_DBNAME: &str = "POSTGRES_DBNAME";
    /// Server host. Defaults to `127.0.0.1`.
    pub const POSTGRES_HOST: &str = "POSTGRES_HOST";
    /// Server port. Defaults to `5432`.
    pub const POSTGRES_PORT: &str = "POSTGRES_PORT";
    /// User name. Required.
    pub const POSTGRES_USER: &str = "POSTGRES_USER";
    /// Password. Required.
    pub const POSTGRES_PASSWORD: &str = "POSTGRES_PASSWORD";
    /// Seconds to wait for a pooled connection. Defaults to 5.
    pub const POSTGRES_CONNECT_TIMEOUT: &str = "POSTGRES_CONNECT_TIMEOUT";
    /// Base pool size. Defaults to 5.
    pub const POSTGRES_POOL_SIZE: &str = "POSTGRES_POOL_SIZE";
    /// Connections allowed beyond the base pool size. Defaults to 10.
    pub const POSTGRES_MAX_OVERFLOW: &str = "POSTGRES_MAX_OVERFLOW";
    /// Seconds after which a connection is retired. Unset keeps
    /// connections indefinitely.
    pub const POSTGRES_CONN_MAX_AGE: &str = "POSTGRES_CONN_MAX_AGE";
    /// Truthy: validate connections before use. Defaults to false.
    pub const POSTGRES_PRE_PING: &str = "POSTGRES_PRE_PING";
    /// Seconds to wait for the writer table lock. 0 disables the bound.
    pub const POSTGRES_LOCK_TIMEOUT: &str = "POSTGRES_LOCK_TIMEOUT";
    /// Seconds a connection may sit idle in a transaction. 0 disables.
    pub const POSTGRES_IDLE_IN_TRANSACTION_SESSION_TIMEOUT: &str =
        "POSTGRES_IDLE_IN_TRANSACTION_SESSION_TIMEOUT";
    /// Optional schema qualifying the recorder tables.
    pub const POSTGRES_SCHEMA: &str = "POSTGRES_SCHEMA";
}

/// Connection and pooling configuration.
#[derive(Clone, Debug)]
pub struct PostgresConfig {
    /// Database name.
    pub dbname: String,
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Bound on waiting for a pooled connection.
    pub connect_timeout: Duration,
    /// Base pool size.
    pub pool_size: u32,
    /// Connections allowed beyond the base pool size.
    pub max_overflow: u32,
    /// Retire connections older than this on return.
    pub conn_max_age: Option<Duration>,
    /// Validate connections before use.
    pub pre_ping: bool,
    /// Bound on acquiring the writer table lock; zero disables the bound.
    pub lock_timeout: Duration,
    /// Per-connection idle-in-transaction timeout; zero disables it.
    pub idle_in_transaction_session_timeout: Duration,
    /// Optional namespace for the recorder tables.
    pub schema: Option<String>,
}

impl PostgresConfig {
    /// A configuration with conservative defaults for the given database.
    #[must_use]
    pub fn new(
        dbname: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            dbname: dbname.into(),
            host: "127.0.0.1".to_owned(),
            port: 5432,
            user: user.into(),
            password: password.into(),
            connect_timeout: Duration::from_secs(5),
            pool_size: 5,
            max_overflow: 10,
            conn_max_age: None,
            pre_ping: false,
            lock_timeout: Duration::ZERO,
            idle_in_transaction_session_timeout: Duration::ZERO,
            schema: None,
        }
    }

    /// Read configuration from `POSTGRES_*` keys.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::Missing`] for absent required keys and
    /// [`EnvError::Invalid`] for unparsable values.
    pub fn from_env(env: &Env) -> Result<Self, EnvError> {
        let mut config = Self::new(
            env.require(keys::POSTGRES_DBNAME)?,
            env.require(keys::POSTGRES_USER)?,
            env.require(keys::POSTGRES_PASSWORD)?,
        );
        if let Some(host) = env.get(keys::POSTGRES_HOST) {
            config.host = host;
        }
        config.port = env.parse(keys::POSTGRES_PORT, config.port)?;
        config.connect_timeout =
            env.duration_secs(keys::POSTGRES_CONNECT_TIMEOUT, config.connect_timeout)?;
        config.pool_size = env.parse(keys::POSTGRES_POOL_SIZE, config.pool_size)?;
        config.max_overflow = env.parse(keys::POSTGRES_MAX_OVERFLOW, config.max_overflow)?;
        config.conn_max_age = match env.get(keys::POSTGRES_CONN_MAX_AGE) {
            None => None,
            Some(_) => Some(env.duration_secs(keys::POSTGRES_CONN_MAX_AGE, Duration::ZERO)?),
        };
        config.pre_ping = env.truthy(keys::POSTGRES_PRE_PING, false)?;
        config.lock_timeout = env.duration_secs(keys::POSTGRES_LOCK_TIMEOUT, Duration::ZERO)?;
        config.idle_in_transaction_session_timeout = env.duration_secs(
            keys::POSTGRES_IDLE_IN_TRANSACTION_SESSION_TIMEOUT,
            Duration::ZERO,
        )?;
        config.schema = env.get(keys::POSTGRES_SCHEMA);
        Ok(config)
    }

    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.dbname)
            .username(&self.user)
            .password(&self.password)
    }
}

/// A shared connection pool plus the configuration that shaped it.
///
/// All recorder instances constructed from the same datastore share its
/// pool; each operation holds a connection for one transaction.
#[derive(Clone)]
pub struct PostgresDatastore {
    pool: PgPool,
    config: Arc<PostgresConfig>,
}

impl PostgresDatastore {
    /// Build a datastore with a lazily-connecting pool.
    ///
    /// No connection is attempted here; the first operation connects and
    /// surfaces transport errors.
    #[must_use]
    pub fn new(config: PostgresConfig) -> Self {
        let mut options = PgPoolOptions::new()
            .max_connections(config.pool_size + config.max_overflow)
            .acquire_timeout(config.connect_timeout)
            .test_before_acquire(config.pre_ping);
        if let Some(max_age) = config.conn_max_age {
            options = options.max_lifetime(max_age);
        }

        let session_setup = session_setup_statement(&config);
        if let Some(statement) = session_setup {
            options = options.after_connect(move |conn, _meta| {
                let statement = statement.clone();
                Box::pin(async move {
                    conn.execute(statement.as_str()).await?;
                    Ok(())
                })
            });
        }

        let pool = options.connect_lazy_with(config.connect_options());
        Self {
            pool,
            config: Arc::new(config),
        }
    }

    /// Build a datastore from `POSTGRES_*` environment keys.
    ///
    /// # Errors
    ///
    /// As [`PostgresConfig::from_env`].
    pub fn from_env(env: &Env) -> Result<Self, EnvError> {
        Ok(Self::new(PostgresConfig::from_env(env)?))
    }

    /// The shared pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the pool. In-flight operations fail with transport errors and
    /// live pumps shut down, ending their subscriptions.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// The configuration this datastore was built from.
    #[must_use]
    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }

    /// Qualify a table name with the configured schema, if any.
    pub(crate) fn qualify(&self, table: &str) -> String {
        match &self.config.schema {
            Some(schema) => format!("{schema}.{table}"),
            None => table.to_owned(),
        }
    }
}

/// Per-connection session settings applied on connect, or `None` when the
/// defaults suffice.
fn session_setup_statement(config: &PostgresConfig) -> Option<String> {
    let mut clauses = Vec::new();
    if let Some(schema) = &config.schema {
        clauses.push(format!("SET search_path TO {schema}, public;"));
    }
    if !config.idle_in_transaction_session_timeout.is_zero() {
        clauses.push(format!(
            "SET idle_in_transaction_session_timeout = '{}ms';",
            config.idle_in_transaction_session_timeout.as_millis()
        ));
    }
    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_env_requires_credentials() {
        let env = Env::new()
            .with("POSTGRES_DBNAME", "chronicle")
            .with("POSTGRES_USER", "chronicle");
        let err = PostgresConfig::from_env(&env).unwrap_err();
        assert!(matches!(err, EnvError::Missing(key) if key == "POSTGRES_PASSWORD"));
    }

    #[test]
    fn config_from_env_applies_defaults_and_overrides() {
        let env = Env::new()
            .with("POSTGRES_DBNAME", "chronicle")
            .with("POSTGRES_USER", "chronicle")
            .with("POSTGRES_PASSWORD", "secret")
            .with("POSTGRES_PORT", "15432")
            .with("POSTGRES_POOL_SIZE", "2")
            .with("POSTGRES_PRE_PING", "yes")
            .with("POSTGRES_LOCK_TIMEOUT", "4")
            .with("POSTGRES_SCHEMA", "es");

        let config = PostgresConfig::from_env(&env).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 15432);
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.max_overflow, 10);
        assert!(config.pre_ping);
        assert_eq!(config.lock_timeout, Duration::from_secs(4));
        assert_eq!(config.schema.as_deref(), Some("es"));
        assert_eq!(config.conn_max_age, None);
    }

    #[test]
    fn invalid_port_is_reported_against_its_key() {
        let env = Env::new()
            .with("POSTGRES_DBNAME", "chronicle")
            .with("POSTGRES_USER", "chronicle")
            .with("POSTGRES_PASSWORD", "secret")
            .with("POSTGRES_PORT", "not-a-port");
        let err = PostgresConfig::from_env(&env).unwrap_err();
        assert!(matches!(err, EnvError::Invalid { key, .. } if key == "POSTGRES_PORT"));
    }

    #[test]
    fn schema_qualifies_table_names() {
        let mut config = PostgresConfig::new("db", "user", "pass");
        config.schema = Some("es".to_owned());
        let datastore = PostgresDatastore::new(config);
        assert_eq!(datastore.qualify("app_events"), "es.app_events");

        let bare = PostgresDatastore::new(PostgresConfig::new("db", "user", "pass"));
        assert_eq!(bare.qualify("app_events"), "app_events");
    }

    #[test]
    fn session_setup_only_emitted_when_needed() {
        let config = PostgresConfig::new("db", "user", "pass");
        assert_eq!(session_setup_statement(&config), None);

        let mut config = PostgresConfig::new("db", "user", "pass");
        config.idle_in_transaction_session_timeout = Duration::from_secs(3);
        let statement = session_setup_statement(&config).unwrap();
        assert!(statement.contains("idle_in_transaction_session_timeout = '3000ms'"));
    }
}
