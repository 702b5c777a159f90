use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::{ConnectionConfig, Driver};

pub mod connection;
#[cfg(test)]
pub mod fixtures;
pub mod query;

pub use connection::{DuckDbSource, PostgresSource};
pub use query::{QueryExecutor, RawResultSet, TabularResult};

/// Literal shown in place of SQL NULL.
pub const NULL_SENTINEL: &str = "NULL";

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to connect to {target}: {message}")]
    Connect { target: String, message: String },
    #[error("connected to {target} but the probe query failed: {source}")]
    Probe {
        target: String,
        #[source]
        source: QueryError,
    },
}

/// Per-tick failure. The display text is exactly what ends up in a view's
/// status line after the `Error: ` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("{0}")]
    Execution(String),
    #[error("failed to decode result: {0}")]
    Decode(String),
    #[error("malformed result: row {row} has {found} cells, header has {expected}")]
    MalformedRow {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("query task did not complete: {0}")]
    Aborted(String),
}

/// A database handle that can be shared by every refresh loop.
///
/// Implementations either tolerate concurrent callers or serialise them
/// internally; callers never coordinate among themselves.
pub trait QuerySource: Send + Sync {
    /// Run one complete statement and return the column names plus every
    /// row rendered as text.
    fn fetch(&self, sql: &str) -> Result<RawResultSet, QueryError>;

    /// Human readable description of the target, free of credentials.
    fn describe(&self) -> String;
}

pub type SharedSource = Arc<dyn QuerySource>;

/// Open the shared connection and verify it with a probe query.
pub fn connect(config: &ConnectionConfig) -> Result<SharedSource, ConnectionError> {
    let source: SharedSource = match config.driver {
        Driver::Postgres => Arc::new(PostgresSource::connect(config)?),
        Driver::DuckDb => Arc::new(DuckDbSource::open(&config.database)?),
    };

    let target = source.describe();
    source
        .fetch("SELECT 1")
        .map_err(|source| ConnectionError::Probe {
            target: target.clone(),
            source,
        })?;

    info!("Connected to {}", target);
    Ok(source)
}
