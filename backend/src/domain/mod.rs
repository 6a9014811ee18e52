//! Transport-agnostic core: the error model, failure classification, request
//! context and ambient transactions.
//!
//! Public surface:
//! - Error (alias to `error::Error`) — structured failure with disclosure
//!   flag, HTTP status and database diagnostics.
//! - Ctx (alias to `context::Ctx`) — explicit request or job context.
//! - TxHandle / with_transaction — shared ambient transaction.
//! - Statement — SQL text plus positional arguments.

pub mod cancellation;
pub mod context;
pub mod error;
pub mod failure;
pub mod feed;
pub mod ports;
pub mod sql;
pub mod transaction;
pub mod validation;

pub use self::context::Ctx;
pub use self::error::{DbCode, Error, ResultExt};
pub use self::sql::{SqlArg, Statement};
pub use self::transaction::{TxHandle, with_transaction};
