//! Store configuration.
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `BATCHSTORE_BACKEND` | `memory` or `postgres` | `memory` |
//! | `DATABASE_URL` | Postgres connection string | required for `postgres` |
//! | `BATCHSTORE_MAX_CONNECTIONS` | Postgres pool size | `5` |
//! | `BATCHSTORE_TABLE` | table holding every collection | `batch_documents` |
//!
//! A `.env` file in the working directory is read first when present.
//! Configuration is resolved once at start-up and the resulting store handle is
//! passed to every repository.

use std::sync::Arc;

use anyhow::Context;
use thiserror::Error;
use tracing::info;

use crate::repository::{BatchRepositories, SharedStore};
use crate::store::{InMemoryDocumentStore, StoreError};

pub const BACKEND_VAR: &str = "BATCHSTORE_BACKEND";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const MAX_CONNECTIONS_VAR: &str = "BATCHSTORE_MAX_CONNECTIONS";
pub const TABLE_VAR: &str = "BATCHSTORE_TABLE";

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_TABLE: &str = "batch_documents";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown backend '{0}' (expected 'memory' or 'postgres')")]
    UnknownBackend(String),

    #[error("{0} must be set for the postgres backend")]
    MissingDatabaseUrl(&'static str),

    #[error("invalid value '{value}' for {var}")]
    InvalidValue { var: &'static str, value: String },

    #[error("failed to read .env file: {0}")]
    EnvFile(#[from] dotenvy::Error),

    #[error("backend '{0}' is not compiled in")]
    BackendDisabled(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres {
        url: String,
        max_connections: u32,
        table: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
        }
    }
}

impl StoreConfig {
    /// Read configuration from the process environment (and `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) | Err(dotenvy::Error::Io(_)) => {}
            Err(err) => return Err(err.into()),
        }
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = lookup(BACKEND_VAR).unwrap_or_else(|| "memory".to_string());
        match backend.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::default()),
            "postgres" => {
                let url = lookup(DATABASE_URL_VAR)
                    .filter(|u| !u.trim().is_empty())
                    .ok_or(ConfigError::MissingDatabaseUrl(DATABASE_URL_VAR))?;
                let max_connections = match lookup(MAX_CONNECTIONS_VAR) {
                    None => DEFAULT_MAX_CONNECTIONS,
                    Some(raw) => raw
                        .trim()
                        .parse::<u32>()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or(ConfigError::InvalidValue {
                            var: MAX_CONNECTIONS_VAR,
                            value: raw,
                        })?,
                };
                let table = lookup(TABLE_VAR).unwrap_or_else(|| DEFAULT_TABLE.to_string());
                Ok(Self {
                    backend: StoreBackend::Postgres {
                        url,
                        max_connections,
                        table,
                    },
                })
            }
            _ => Err(ConfigError::UnknownBackend(backend)),
        }
    }

    /// Open the configured store.
    pub fn connect(&self) -> Result<SharedStore, ConfigError> {
        match &self.backend {
            StoreBackend::Memory => {
                info!("using in-memory document store");
                Ok(Arc::new(InMemoryDocumentStore::new()))
            }
            #[cfg(feature = "postgres")]
            StoreBackend::Postgres {
                url,
                max_connections,
                table,
            } => {
                let store = crate::store::PostgresDocumentStore::connect(url, *max_connections, table)?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "postgres"))]
            StoreBackend::Postgres { .. } => Err(ConfigError::BackendDisabled("postgres")),
        }
    }
}

/// Load configuration from the environment, open the store and prepare the
/// repositories with their indexes.
pub fn bootstrap() -> anyhow::Result<BatchRepositories> {
    let config = StoreConfig::from_env().context("failed to load store configuration")?;
    let store = config.connect().context("failed to open document store")?;
    let repositories = BatchRepositories::new(store);
    repositories
        .ensure_indexes()
        .context("failed to create repository indexes")?;
    Ok(repositories)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_memory() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.backend, StoreBackend::Memory);
    }

    #[test]
    fn postgres_requires_a_url() {
        let err = StoreConfig::from_lookup(lookup(&[(BACKEND_VAR, "postgres")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingDatabaseUrl(_)));
    }

    #[test]
    fn postgres_reads_pool_and_table() {
        let config = StoreConfig::from_lookup(lookup(&[
            (BACKEND_VAR, "Postgres"),
            (DATABASE_URL_VAR, "postgres://localhost/batch"),
            (MAX_CONNECTIONS_VAR, "12"),
        ]))
        .unwrap();
        assert_eq!(
            config.backend,
            StoreBackend::Postgres {
                url: "postgres://localhost/batch".to_string(),
                max_connections: 12,
                table: DEFAULT_TABLE.to_string(),
            }
        );
    }

    #[test]
    fn rejects_bad_values() {
        let err = StoreConfig::from_lookup(lookup(&[
            (BACKEND_VAR, "postgres"),
            (DATABASE_URL_VAR, "postgres://localhost/batch"),
            (MAX_CONNECTIONS_VAR, "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = StoreConfig::from_lookup(lookup(&[(BACKEND_VAR, "mongo")])).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownBackend(_)));
    }

    #[test]
    fn memory_backend_connects() {
        let store = StoreConfig::default().connect().unwrap();
        let repositories = BatchRepositories::new(store);
        repositories.ensure_indexes().unwrap();
    }
}
