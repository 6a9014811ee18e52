//! Domain ports and supporting types for the hexagonal boundary.

mod transaction;

pub use transaction::{Row, Transaction, TransactionProvider, UnconfiguredTransactionProvider};
