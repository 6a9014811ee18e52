//! PostgreSQL persistence adapters using SQLx.
//!
//! This module provides the concrete implementation of the transaction ports
//! declared in `domain::ports`:
//!
//! - **Pooling**: `DbPool` wraps an `sqlx::PgPool` built from `PoolConfig`.
//! - **Transactions**: `PgTransactionProvider` opens `PgTransaction`s that run
//!   statements and scripts and return rows as JSON objects.
//! - **Error mapping**: every SQLx error is mapped to a driver-neutral failure
//!   and classified into a domain `Error` before it leaves this module.
//!
//! # Example
//!
//! ```no_run
//! use sqlx::postgres::PgConnectOptions;
//! use starter::outbound::persistence::{DbPool, PgTransactionProvider, PoolConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PoolConfig::new(PgConnectOptions::new().database("app"));
//! let pool = DbPool::new(config).await?;
//! let provider = PgTransactionProvider::new(pool);
//! # let _ = provider;
//! # Ok(())
//! # }
//! ```

mod pg_transaction;
mod pool;
pub mod sqlx_error_mapping;

pub use pg_transaction::{PgTransaction, PgTransactionProvider};
pub use pool::{DbPool, PoolConfig, PoolError};
