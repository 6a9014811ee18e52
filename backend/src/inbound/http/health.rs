//! Service and database health endpoints.

use actix_web::{HttpRequest, HttpResponse, get, web};
use pagination::FeedParams;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::feed::fetch_feed;
use crate::domain::{Ctx, Statement};
use crate::inbound::http::decode::decode_query;
use crate::inbound::http::pipeline::{respond_with, respond_with_transaction};
use crate::inbound::http::response::json_ok;
use crate::inbound::http::state::HttpState;

/// Current database time, as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbClock {
    /// `now()` rendered as text.
    pub now: String,
}

/// One row of `pg_settings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbSetting {
    /// Parameter name.
    pub name: String,
    /// Current value; absent for parameters the role may not read.
    pub setting: Option<String>,
}

const SETTINGS_QUERY: &str = "
    select name, setting
    from pg_settings
    order by name
";

/// Liveness of the API itself.
#[get("/api/v1")]
pub async fn health(state: web::Data<HttpState>, ctx: Ctx) -> HttpResponse {
    let style = state.json;
    respond_with(ctx, |_| async move { json_ok(style, &json!({"status": "ok"})) }).await
}

/// Round trip to the database inside a request transaction.
#[get("/api/v1/db")]
pub async fn db_health(state: web::Data<HttpState>, ctx: Ctx) -> HttpResponse {
    let style = state.json;
    respond_with_transaction(&state, ctx, |_, tx| async move {
        let clock: DbClock = tx
            .fetch_one(&Statement::new("select now()::text as now"))
            .await?;
        json_ok(style, &clock)
    })
    .await
}

/// Paged listing of server settings.
#[get("/api/v1/db/settings")]
pub async fn db_settings(state: web::Data<HttpState>, ctx: Ctx, req: HttpRequest) -> HttpResponse {
    let style = state.json;
    let query = req.query_string().to_owned();
    respond_with_transaction(&state, ctx, |_, tx| async move {
        let params: FeedParams = decode_query(&query)?;
        let feed = fetch_feed::<DbSetting>(&tx, &Statement::new(SETTINGS_QUERY), &params).await?;
        json_ok(style, &feed)
    })
    .await
}

/// Register the health routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health).service(db_health).service(db_settings);
}
