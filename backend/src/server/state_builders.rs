//! Builder for the HTTP state shared by all handlers.

use std::sync::Arc;

use actix_web::web;
use tracing::warn;

use starter::domain::ports::{TransactionProvider, UnconfiguredTransactionProvider};
use starter::inbound::http::response::JsonStyle;
use starter::inbound::http::state::HttpState;
use starter::outbound::persistence::PgTransactionProvider;

use super::ServerConfig;

fn build_transactions(config: &ServerConfig) -> Arc<dyn TransactionProvider> {
    match &config.db_pool {
        Some(pool) => Arc::new(
            PgTransactionProvider::new(pool.clone()).with_pretty_sql(config.pretty_sql),
        ),
        None => {
            warn!("no database pool configured; transactional endpoints will fail");
            Arc::new(UnconfiguredTransactionProvider)
        }
    }
}

/// Build the HTTP state from the server configuration.
pub(super) fn build_http_state(config: &ServerConfig) -> web::Data<HttpState> {
    web::Data::new(
        HttpState::new(build_transactions(config))
            .with_json_style(JsonStyle::from_flag(config.pretty_json)),
    )
}
