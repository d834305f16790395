//! Connection handling and configuration.

use std::{sync::Arc, time::Duration};

use chronicle_core::env::{Env, EnvError};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

/// Configuration keys read by [`SqliteConfig::from_env`].
pub mod keys {
    /// Database file path (`:memory:` for an in-process database).
    /// Required.
    pub const SQLITE_DBNAME: &str = "SQLITE_DBNAME";
    /// Seconds a writer waits for the database lock. Defaults to 5.
    pub const SQLITE_LOCK_TIMEOUT: &str = "SQLITE_LOCK_TIMEOUT";
    /// Pool size. Defaults to 5.
    pub const SQLITE_POOL_SIZE: &str = "SQLITE_POOL_SIZE";
}

/// Connection configuration for the file-backed store.
#[derive(Clone, Debug)]
pub struct SqliteConfig {
    /// Database file path.
    pub path: String,
    /// Bound on waiting for the database write lock.
    pub lock_timeout: Duration,
    /// Pool size (readers share; writes serialize regardless).
    pub pool_size: u32,
}

impl SqliteConfig {
    /// A configuration with defaults for the given database file.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: Duration::from_secs(5),
            pool_size: 5,
        }
    }

    /// Read configuration from `SQLITE_*` keys.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::Missing`] when `SQLITE_DBNAME` is absent and
    /// [`EnvError::Invalid`] for unparsable values.
    pub fn from_env(env: &Env) -> Result<Self, EnvError> {
        let mut config = Self::new(env.require(keys::SQLITE_DBNAME)?);
        config.lock_timeout = env.duration_secs(keys::SQLITE_LOCK_TIMEOUT, config.lock_timeout)?;
        config.pool_size = env.parse(keys::SQLITE_POOL_SIZE, config.pool_size)?;
        Ok(config)
    }
}

/// A pool over one SQLite database file, WAL-journaled.
#[derive(Clone)]
pub struct SqliteDatastore {
    pool: SqlitePool,
    config: Arc<SqliteConfig>,
}

impl SqliteDatastore {
    /// Build a datastore with a lazily-connecting pool.
    ///
    /// No connection is attempted here; the first operation opens the file
    /// and surfaces transport errors.
    #[must_use]
    pub fn new(config: SqliteConfig) -> Self {
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.lock_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.pool_size)
            .connect_lazy_with(options);

        Self {
            pool,
            config: Arc::new(config),
        }
    }

    /// Build a datastore from `SQLITE_*` environment keys.
    ///
    /// # Errors
    ///
    /// As [`SqliteConfig::from_env`].
    pub fn from_env(env: &Env) -> Result<Self, EnvError> {
        Ok(Self::new(SqliteConfig::from_env(env)?))
    }

    /// The shared pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool; in-flight operations fail with transport errors.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// The configuration this datastore was built from.
    #[must_use]
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_env_requires_the_path() {
        let err = SqliteConfig::from_env(&Env::new()).unwrap_err();
        assert!(matches!(err, EnvError::Missing(key) if key == "SQLITE_DBNAME"));
    }

    #[test]
    fn config_from_env_applies_overrides() {
        let env = Env::new()
            .with("SQLITE_DBNAME", "/tmp/events.db")
            .with("SQLITE_LOCK_TIMEOUT", "2.5")
            .with("SQLITE_POOL_SIZE", "2");
        let config = SqliteConfig::from_env(&env).unwrap();
        assert_eq!(config.path, "/tmp/events.db");
        assert_eq!(config.lock_timeout, Duration::from_millis(2500));
        assert_eq!(config.pool_size, 2);
    }
}
