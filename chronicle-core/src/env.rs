//! Environment-style configuration.
//!
//! Configuration is read through an explicit [`Env`] handle rather than
//! global process state: an overlay map consulted first, falling back to the
//! process environment. Tests and embedders inject values without touching
//! `std::env`.

use std::{collections::HashMap, str::FromStr, time::Duration};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use thiserror::Error;

use crate::{cipher::AesGcmCipher, compressor::ZlibCompressor, mapper::Mapper};

/// Well-known configuration keys.
pub mod keys {
    /// Selects the backing-store implementation (`memory` | `postgres` |
    /// `sqlite`).
    pub const PERSISTENCE_MODULE: &str = "PERSISTENCE_MODULE";
    /// Truthy: attempt schema DDL on startup. Defaults to true.
    pub const CREATE_TABLE: &str = "CREATE_TABLE";
    /// Enables state compression (`zlib`).
    pub const COMPRESSOR_TOPIC: &str = "COMPRESSOR_TOPIC";
    /// Enables state encryption (`aes-gcm`).
    pub const CIPHER_TOPIC: &str = "CIPHER_TOPIC";
    /// Base64-encoded 32-byte key for the state cipher.
    pub const CIPHER_KEY: &str = "CIPHER_KEY";
}

/// Error raised while reading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    /// A required key was absent.
    #[error("environment key `{0}` not found")]
    Missing(String),
    /// A key was present but its value could not be interpreted.
    #[error("environment value for `{key}` is invalid: {reason}")]
    Invalid {
        /// The offending key.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl EnvError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// A configuration source: an overlay map over the process environment.
#[derive(Clone, Debug, Default)]
pub struct Env {
    overlay: HashMap<String, String>,
}

impl Env {
    /// An env that reads the process environment only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an overlay value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overlay.insert(key.into(), value.into());
        self
    }

    /// The value for `key`: the overlay wins, then the process environment.
    /// Empty values count as unset, matching the original convention.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.overlay
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
            .filter(|value| !value.is_empty())
    }

    /// The value for `key`, or [`EnvError::Missing`].
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::Missing`] when the key is unset or empty.
    pub fn require(&self, key: &str) -> Result<String, EnvError> {
        self.get(key).ok_or_else(|| EnvError::Missing(key.to_string()))
    }

    /// Interpret `key` as a boolean.
    ///
    /// Truthy: `y`, `yes`, `t`, `true`, `on`, `1`. Falsy: `n`, `no`, `f`,
    /// `false`, `off`, `0`. Case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::Invalid`] for any other value.
    pub fn truthy(&self, key: &str, default: bool) -> Result<bool, EnvError> {
        let Some(value) = self.get(key) else {
            return Ok(default);
        };
        match value.to_ascii_lowercase().as_str() {
            "y" | "yes" | "t" | "true" | "on" | "1" => Ok(true),
            "n" | "no" | "f" | "false" | "off" | "0" => Ok(false),
            other => Err(EnvError::invalid(
                key,
                format!("expected a truthy or falsy value, got `{other}`"),
            )),
        }
    }

    /// Parse `key` with [`FromStr`], using `default` when unset.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::Invalid`] when parsing fails.
    pub fn parse<T>(&self, key: &str, default: T) -> Result<T, EnvError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|error: T::Err| EnvError::invalid(key, error.to_string())),
        }
    }

    /// Parse `key` as a duration in (possibly fractional) seconds.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::Invalid`] for unparsable or negative values.
    pub fn duration_secs(&self, key: &str, default: Duration) -> Result<Duration, EnvError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => {
                let seconds: f64 = value
                    .parse()
                    .map_err(|error: std::num::ParseFloatError| {
                        EnvError::invalid(key, error.to_string())
                    })?;
                if !seconds.is_finite() || seconds < 0.0 {
                    return Err(EnvError::invalid(key, "expected a non-negative number"));
                }
                Ok(Duration::from_secs_f64(seconds))
            }
        }
    }
}

/// The backing-store implementation selected by `PERSISTENCE_MODULE`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PersistenceModule {
    /// Process-local in-memory recorders.
    #[default]
    Memory,
    /// Server-based PostgreSQL recorders.
    Postgres,
    /// File-backed single-writer SQLite recorders.
    Sqlite,
}

impl FromStr for PersistenceModule {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!(
                "expected `memory`, `postgres` or `sqlite`, got `{other}`"
            )),
        }
    }
}

impl PersistenceModule {
    /// Read `PERSISTENCE_MODULE`, defaulting to [`Self::Memory`].
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::Invalid`] for unknown module names.
    pub fn from_env(env: &Env) -> Result<Self, EnvError> {
        env.parse(keys::PERSISTENCE_MODULE, Self::default())
    }
}

/// Whether startup should attempt schema DDL. Defaults to true.
///
/// # Errors
///
/// Returns [`EnvError::Invalid`] for non-boolean values.
pub fn create_table(env: &Env) -> Result<bool, EnvError> {
    env.truthy(keys::CREATE_TABLE, true)
}

/// Build the optional state-pipeline stages from `COMPRESSOR_TOPIC`,
/// `CIPHER_TOPIC` and `CIPHER_KEY`.
///
/// # Errors
///
/// Returns [`EnvError::Invalid`] for unknown stage names or a missing/bad
/// cipher key.
pub fn state_pipeline(
    env: &Env,
) -> Result<(Option<ZlibCompressor>, Option<AesGcmCipher>), EnvError> {
    let compressor = match env.get(keys::COMPRESSOR_TOPIC).as_deref() {
        None => None,
        Some("zlib") => Some(ZlibCompressor::default()),
        Some(other) => {
            return Err(EnvError::invalid(
                keys::COMPRESSOR_TOPIC,
                format!("unknown compressor `{other}`"),
            ));
        }
    };

    let cipher = match env.get(keys::CIPHER_TOPIC).as_deref() {
        None => None,
        Some("aes-gcm") => {
            let encoded = env.require(keys::CIPHER_KEY)?;
            let key = BASE64.decode(&encoded).map_err(|error| {
                EnvError::invalid(keys::CIPHER_KEY, format!("invalid base64: {error}"))
            })?;
            Some(
                AesGcmCipher::new(&key)
                    .map_err(|error| EnvError::invalid(keys::CIPHER_KEY, error.to_string()))?,
            )
        }
        Some(other) => {
            return Err(EnvError::invalid(
                keys::CIPHER_TOPIC,
                format!("unknown cipher `{other}`"),
            ));
        }
    };

    Ok((compressor, cipher))
}

/// A mapper with the configured state pipeline applied.
///
/// # Errors
///
/// As [`state_pipeline`].
pub fn mapper_from_env<E>(env: &Env) -> Result<Mapper<E>, EnvError> {
    let (compressor, cipher) = state_pipeline(env)?;
    let mut mapper = Mapper::new();
    if let Some(compressor) = compressor {
        mapper = mapper.with_compressor(compressor);
    }
    if let Some(cipher) = cipher {
        mapper = mapper.with_cipher(cipher);
    }
    Ok(mapper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_wins_and_empty_counts_as_unset() {
        let env = Env::new().with("A", "1").with("B", "");
        assert_eq!(env.get("A").as_deref(), Some("1"));
        assert_eq!(env.get("B"), None);
        assert!(matches!(env.require("B"), Err(EnvError::Missing(_))));
    }

    #[test]
    fn truthy_accepts_the_documented_spellings() {
        for value in ["y", "YES", "t", "True", "on", "1"] {
            let env = Env::new().with("FLAG", value);
            assert!(env.truthy("FLAG", false).unwrap(), "{value}");
        }
        for value in ["n", "No", "f", "FALSE", "off", "0"] {
            let env = Env::new().with("FLAG", value);
            assert!(!env.truthy("FLAG", true).unwrap(), "{value}");
        }
        let env = Env::new().with("FLAG", "maybe");
        assert!(matches!(
            env.truthy("FLAG", false),
            Err(EnvError::Invalid { .. })
        ));
        assert!(Env::new().truthy("UNSET_FLAG", true).unwrap());
    }

    #[test]
    fn duration_rejects_negatives() {
        let env = Env::new().with("T", "-1");
        assert!(matches!(
            env.duration_secs("T", Duration::ZERO),
            Err(EnvError::Invalid { .. })
        ));
        let env = Env::new().with("T", "1.5");
        assert_eq!(
            env.duration_secs("T", Duration::ZERO).unwrap(),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn persistence_module_parses_and_defaults() {
        assert_eq!(
            PersistenceModule::from_env(&Env::new().with("PERSISTENCE_MODULE", "postgres"))
                .unwrap(),
            PersistenceModule::Postgres
        );
        assert_eq!(
            PersistenceModule::from_env(&Env::new().with("PERSISTENCE_MODULE", "SQLITE")).unwrap(),
            PersistenceModule::Sqlite
        );
        assert!(PersistenceModule::from_env(&Env::new().with("PERSISTENCE_MODULE", "oracle")).is_err());
    }

    #[test]
    fn create_table_defaults_on_and_can_be_disabled() {
        assert!(create_table(&Env::new()).unwrap());
        assert!(!create_table(&Env::new().with("CREATE_TABLE", "off")).unwrap());
    }

    #[test]
    fn pipeline_defaults_to_no_stages() {
        let (compressor, cipher) = state_pipeline(&Env::new()).unwrap();
        assert!(compressor.is_none());
        assert!(cipher.is_none());
    }

    #[test]
    fn pipeline_builds_configured_stages() {
        use base64::{Engine as _, engine::general_purpose::STANDARD};
        let env = Env::new()
            .with("COMPRESSOR_TOPIC", "zlib")
            .with("CIPHER_TOPIC", "aes-gcm")
            .with("CIPHER_KEY", STANDARD.encode([9u8; 32]));
        let (compressor, cipher) = state_pipeline(&env).unwrap();
        assert!(compressor.is_some());
        assert!(cipher.is_some());
    }

    #[test]
    fn cipher_without_key_is_an_error() {
        let env = Env::new().with("CIPHER_TOPIC", "aes-gcm");
        assert!(matches!(
            state_pipeline(&env),
            Err(EnvError::Missing(key)) if key == "CIPHER_KEY"
        ));
    }

    #[test]
    fn short_cipher_key_is_rejected() {
        use base64::{Engine as _, engine::general_purpose::STANDARD};
        let env = Env::new()
            .with("CIPHER_TOPIC", "aes-gcm")
            .with("CIPHER_KEY", STANDARD.encode([9u8; 16]));
        assert!(matches!(
            state_pipeline(&env),
            Err(EnvError::Invalid { key, .. }) if key == "CIPHER_KEY"
        ));
    }

    #[test]
    fn unknown_stage_names_are_rejected() {
        let env = Env::new().with("COMPRESSOR_TOPIC", "zstd");
        assert!(state_pipeline(&env).is_err());
        let env = Env::new().with("CIPHER_TOPIC", "rot13");
        assert!(state_pipeline(&env).is_err());
    }
}
