//! HTTP inbound adapter: request context, the handler pipeline and the
//! endpoints built on it.

mod context;
pub mod decode;
pub mod error;
pub mod health;
pub mod pipeline;
pub mod response;
pub mod state;

pub use error::ErrorBody;
pub use pipeline::{HandlerResult, respond_with, respond_with_transaction};
pub use state::HttpState;
