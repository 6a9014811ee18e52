//! Port interface for database transactions.
//!
//! Adapters classify their own failures before returning them, so every
//! [`Error`] leaving a port already knows whether it is public.
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::Error;
use crate::domain::sql::Statement;

/// One result row keyed by column name.
pub type Row = Map<String, Value>;

/// An open transaction.
///
/// Dropping a transaction without committing it rolls it back.
#[async_trait]
pub trait Transaction: Send {
    /// Run a statement and return the number of affected rows.
    async fn execute(&mut self, statement: &Statement) -> Result<u64, Error>;

    /// Run a statement and collect every row.
    async fn fetch_rows(&mut self, statement: &Statement) -> Result<Vec<Row>, Error>;

    /// Run a script of one or more statements without arguments.
    async fn execute_script(&mut self, script: &str) -> Result<(), Error>;

    /// Make the transaction's effects durable.
    async fn commit(self: Box<Self>) -> Result<(), Error>;

    /// Discard the transaction's effects.
    async fn rollback(self: Box<Self>) -> Result<(), Error>;
}

/// Source of new transactions.
#[async_trait]
pub trait TransactionProvider: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> Result<Box<dyn Transaction>, Error>;
}

/// Provider used when no database is configured. Every `begin` fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredTransactionProvider;

#[async_trait]
impl TransactionProvider for UnconfiguredTransactionProvider {
    async fn begin(&self) -> Result<Box<dyn Transaction>, Error> {
        Err(Error::msg("no database is configured"))
    }
}
