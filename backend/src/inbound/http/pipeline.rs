//! Request pipeline: run a handler, recover from its panics, commit its
//! transaction and turn whatever failed into a response.
//!
//! Handlers return [`HandlerResult`] and never write failures themselves:
//!
//! ```no_run
//! use actix_web::{HttpResponse, get, web};
//! use starter::domain::{Ctx, Statement};
//! use starter::inbound::http::pipeline::respond_with_transaction;
//! use starter::inbound::http::state::HttpState;
//!
//! #[get("/touch")]
//! async fn touch(state: web::Data<HttpState>, ctx: Ctx) -> HttpResponse {
//!     respond_with_transaction(&state, ctx, |_, tx| async move {
//!         tx.execute(&Statement::new("update counters set hits = hits + 1")).await?;
//!         Ok(HttpResponse::NoContent().finish())
//!     })
//!     .await
//! }
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use actix_web::HttpResponse;
use color_eyre::eyre::{Report, eyre};
use futures_util::FutureExt;

use crate::domain::cancellation::maybe_log_failure;
use crate::domain::error::{as_dyn, is_disclosed_as_is};
use crate::domain::{Ctx, Error, TxHandle, with_transaction};
use crate::inbound::http::error::{ErrorBody, render_failure};
use crate::inbound::http::state::HttpState;

/// What a handler produces.
pub type HandlerResult = Result<HttpResponse, Report>;

/// Whether anything of the response already went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseProgress {
    /// Nothing written; a failure can still choose the status.
    Pending,
    /// Status and headers are out; a failure can only be logged.
    Started,
}

/// Run `handler` and render its outcome.
pub async fn respond_with<F, Fut>(ctx: Ctx, handler: F) -> HttpResponse
where
    F: FnOnce(Ctx) -> Fut,
    Fut: Future<Output = HandlerResult>,
{
    let scope = ctx.clone();
    let outcome = recover(async move { handler(scope).await }).await;
    finish(&ctx, outcome)
}

/// Run `handler` inside a transaction and render the outcome.
///
/// The transaction is committed only when the handler succeeds. A failed
/// commit is reported in place of the handler's response.
pub async fn respond_with_transaction<F, Fut>(
    state: &HttpState,
    ctx: Ctx,
    handler: F,
) -> HttpResponse
where
    F: FnOnce(Ctx, TxHandle) -> Fut,
    Fut: Future<Output = HandlerResult>,
{
    let outcome = with_transaction(state.transactions.as_ref(), &ctx, |scope, tx| {
        recover(async move { handler(scope, tx).await })
    })
    .await;
    finish(&ctx, outcome)
}

fn finish(ctx: &Ctx, outcome: HandlerResult) -> HttpResponse {
    match outcome {
        Ok(response) => response,
        Err(err) => write_failure(ctx, &err, ResponseProgress::Pending)
            .unwrap_or_else(|| HttpResponse::InternalServerError().json(ErrorBody::unexpected())),
    }
}

/// Log `err` and build the response for it.
///
/// Public errors the client will see verbatim are not logged. Once the
/// response has started there is nothing left to send and `None` is returned.
pub fn write_failure(ctx: &Ctx, err: &Report, progress: ResponseProgress) -> Option<HttpResponse> {
    if !is_disclosed_as_is(as_dyn(err)) {
        maybe_log_failure(ctx, err);
    }
    match progress {
        ResponseProgress::Started => None,
        ResponseProgress::Pending => Some(render_failure(err)),
    }
}

/// Await `fut`, turning a panic into an error.
pub async fn recover<T, Fut>(fut: Fut) -> Result<T, Report>
where
    Fut: Future<Output = Result<T, Report>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(panic_report(payload)),
    }
}

/// Error for a panic payload. Panicking with an [`Error`] or a [`Report`]
/// keeps it; messages become private errors.
pub fn panic_report(payload: Box<dyn Any + Send>) -> Report {
    let payload = match payload.downcast::<Error>() {
        Ok(err) => return Report::new(*err),
        Err(other) => other,
    };
    let payload = match payload.downcast::<Report>() {
        Ok(report) => return *report,
        Err(other) => other,
    };
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        eyre!("panic: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        eyre!("panic: {message}")
    } else {
        eyre!("panic: unknown payload")
    }
}
