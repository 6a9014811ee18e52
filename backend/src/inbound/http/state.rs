//! Shared HTTP adapter state.
//!
//! HTTP handlers accept this state via `actix_web::web::Data` so they only
//! depend on domain ports and remain testable without I/O.

use std::sync::Arc;

use crate::domain::ports::TransactionProvider;
use crate::inbound::http::response::JsonStyle;

/// Dependency bundle for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub transactions: Arc<dyn TransactionProvider>,
    pub json: JsonStyle,
}

impl HttpState {
    /// State over `transactions` rendering compact JSON.
    pub fn new(transactions: Arc<dyn TransactionProvider>) -> Self {
        Self {
            transactions,
            json: JsonStyle::Compact,
        }
    }

    /// Select how JSON bodies are rendered.
    #[must_use]
    pub fn with_json_style(mut self, json: JsonStyle) -> Self {
        self.json = json;
        self
    }
}
