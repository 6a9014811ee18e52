//! Async connection pool for PostgreSQL via SQLx.
//!
//! This module wraps `sqlx::PgPool` so the rest of the crate configures and
//! builds pools through one place. Connection options (search path, time
//! zone) come from settings; pool sizing and checkout limits live here.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

/// Errors that can occur during pool operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Failed to build the connection pool.
    #[error("failed to build connection pool: {message}")]
    Build { message: String },
}

impl PoolError {
    /// Create a build error with the given message.
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
        }
    }
}

/// Configuration for the database connection pool.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use sqlx::postgres::PgConnectOptions;
/// use starter::outbound::persistence::PoolConfig;
///
/// let config = PoolConfig::new(PgConnectOptions::new().database("app"))
///     .with_max_size(20)
///     .with_min_idle(Some(5))
///     .with_connection_timeout(Duration::from_secs(30));
/// assert_eq!(config.max_size(), 20);
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    connect_options: PgConnectOptions,
    max_size: u32,
    min_idle: Option<u32>,
    connection_timeout: Duration,
}

impl PoolConfig {
    /// Create a new configuration for the given connection options.
    ///
    /// Uses sensible defaults:
    /// - `max_size`: 10 connections
    /// - `min_idle`: 2 connections
    /// - `connection_timeout`: 30 seconds
    pub fn new(connect_options: PgConnectOptions) -> Self {
        Self {
            connect_options,
            max_size: 10,
            min_idle: Some(2),
            connection_timeout: Duration::from_secs(30),
        }
    }

    /// Set the maximum number of connections in the pool.
    #[must_use]
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the minimum number of idle connections to maintain.
    #[must_use]
    pub fn with_min_idle(mut self, min_idle: Option<u32>) -> Self {
        self.min_idle = min_idle;
        self
    }

    /// Set the connection checkout timeout.
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Maximum number of connections.
    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_size)
            .min_connections(self.min_idle.unwrap_or(0))
            .acquire_timeout(self.connection_timeout)
    }
}

/// Shared PostgreSQL connection pool.
#[derive(Clone, Debug)]
pub struct DbPool {
    inner: PgPool,
}

impl DbPool {
    /// Create a new connection pool and open its first connection.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Build` if the database cannot be reached.
    pub async fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let pool = config
            .pool_options()
            .connect_with(config.connect_options.clone())
            .await
            .map_err(|err| PoolError::build(err.to_string()))?;
        Ok(Self { inner: pool })
    }

    /// Create a pool that connects on first use.
    pub fn lazy(config: &PoolConfig) -> Self {
        Self {
            inner: config
                .pool_options()
                .connect_lazy_with(config.connect_options.clone()),
        }
    }

    /// Underlying SQLx pool.
    pub fn inner(&self) -> &PgPool {
        &self.inner
    }
}
