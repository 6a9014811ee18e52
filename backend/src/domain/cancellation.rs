//! Cancellation noise detection and the failure logging policy.
//!
//! When a client disconnects the failures that follow are expected: the
//! driver aborts the statement, the socket resets, the transaction is gone.
//! Logging those as errors drowns real faults, so [`should_log`] suppresses
//! them once the request context is canceled.

use std::error::Error as StdError;
use std::io;

use color_eyre::eyre::Report;
use tracing::error;

use crate::domain::context::Ctx;
use crate::domain::error::{as_dyn, chain, find_error};
use crate::domain::failure::{DatabaseFailure, DriverFailure, QUERY_CANCELED};

const CANCELED_TEXT: &str = "operation was canceled";

/// Marker raised when work is refused because its context was canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("context canceled")]
pub struct Canceled;

/// Whether any element of the chain is an expected side effect of
/// cancellation or a client going away.
///
/// ```
/// use std::io;
/// use starter::domain::cancellation::is_cancellation_related;
///
/// let reset = io::Error::from(io::ErrorKind::ConnectionReset);
/// assert!(is_cancellation_related(&reset));
/// assert!(!is_cancellation_related(&io::Error::other("disk full")));
/// ```
pub fn is_cancellation_related(err: &(dyn StdError + 'static)) -> bool {
    chain(err).any(|item| {
        is_canceled(item)
            || is_transaction_finished(item)
            || is_query_canceled(item)
            || item.to_string().contains(CANCELED_TEXT)
            || io_kind(item).is_some_and(|kind| {
                matches!(
                    kind,
                    io::ErrorKind::ConnectionReset
                        | io::ErrorKind::BrokenPipe
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::UnexpectedEof
                )
            })
    })
}

fn is_canceled(item: &(dyn StdError + 'static)) -> bool {
    item.is::<Canceled>()
        || matches!(
            item.downcast_ref::<DriverFailure>(),
            Some(DriverFailure::Canceled)
        )
}

fn is_transaction_finished(item: &(dyn StdError + 'static)) -> bool {
    matches!(
        item.downcast_ref::<DriverFailure>(),
        Some(DriverFailure::TransactionFinished)
    )
}

fn is_query_canceled(item: &(dyn StdError + 'static)) -> bool {
    let database = item
        .downcast_ref::<DatabaseFailure>()
        .or_else(|| item.downcast_ref::<DriverFailure>()?.database());
    database.is_some_and(|failure| failure.code == QUERY_CANCELED)
}

fn io_kind(item: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    item.downcast_ref::<io::Error>().map(io::Error::kind)
}

/// Whether a failure seen under `ctx` deserves an error log.
///
/// Once the context is canceled nothing is logged for HTTP requests, since the
/// client is gone either way. Background work still logs failures unrelated
/// to the cancellation.
pub fn should_log(ctx: &Ctx, err: &(dyn StdError + 'static)) -> bool {
    !(ctx.is_canceled() && (ctx.is_http() || is_cancellation_related(err)))
}

/// Log `err` with everything known about it.
pub fn log_failure(err: &Report) {
    match find_error(as_dyn(err)) {
        Some(found) => error!(
            status = found.resolved_http_status(),
            public = found.is_public(),
            db_code = found.db_code().map(|code| code.as_str()),
            db_query = found.db_query(),
            db_context = found.db_context(),
            error = ?err,
            "operation failed"
        ),
        None => error!(error = ?err, "operation failed"),
    }
}

/// Log `err` unless [`should_log`] suppresses it.
pub fn maybe_log_failure(ctx: &Ctx, err: &Report) {
    if should_log(ctx, as_dyn(err)) {
        log_failure(err);
    }
}

#[cfg(test)]
mod tests {
    //! One test per recognised cancellation shape, plus the logging policy.

    use super::*;
    use color_eyre::eyre::{WrapErr, eyre};
    use rstest::rstest;

    use crate::domain::failure::decode_failure;

    fn report<E>(err: E) -> Report
    where
        E: StdError + Send + Sync + 'static,
    {
        Err::<(), _>(err).wrap_err("while serving").unwrap_err()
    }

    #[rstest]
    fn canceled_marker_is_related() {
        assert!(is_cancellation_related(as_dyn(&report(Canceled))));
    }

    #[rstest]
    fn canceled_driver_failure_is_related() {
        assert!(is_cancellation_related(as_dyn(&report(DriverFailure::Canceled))));
    }

    #[rstest]
    fn finished_transaction_is_related() {
        assert!(is_cancellation_related(as_dyn(&report(
            DriverFailure::TransactionFinished
        ))));
    }

    #[rstest]
    fn query_canceled_code_is_related() {
        let failure = DriverFailure::Database(DatabaseFailure {
            code: QUERY_CANCELED.to_owned(),
            message: "canceling statement due to user request".to_owned(),
            ..DatabaseFailure::default()
        });
        let classified = decode_failure(failure, "select pg_sleep(10)");
        assert!(is_cancellation_related(&classified));
    }

    #[rstest]
    fn canceled_text_is_related() {
        let err = eyre!("dial tcp 10.0.0.1:5432: operation was canceled");
        assert!(is_cancellation_related(as_dyn(&err)));
    }

    #[rstest]
    #[case(io::ErrorKind::ConnectionReset)]
    #[case(io::ErrorKind::BrokenPipe)]
    fn disconnects_are_related(#[case] kind: io::ErrorKind) {
        assert!(is_cancellation_related(as_dyn(&report(io::Error::from(kind)))));
    }

    #[rstest]
    fn read_timeout_is_related() {
        let err = report(DriverFailure::Io(io::Error::from(io::ErrorKind::TimedOut)));
        assert!(is_cancellation_related(as_dyn(&err)));
    }

    #[rstest]
    fn unexpected_eof_is_related() {
        let err = report(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(is_cancellation_related(as_dyn(&err)));
    }

    #[rstest]
    #[case(eyre!("disk full"))]
    #[case(report(io::Error::from(io::ErrorKind::PermissionDenied)))]
    #[case(report(DriverFailure::RowNotFound))]
    fn unrelated_failures_are_not(#[case] err: Report) {
        assert!(!is_cancellation_related(as_dyn(&err)));
    }

    #[rstest]
    fn live_contexts_always_log() {
        let err = report(Canceled);
        assert!(should_log(&Ctx::http(), as_dyn(&err)));
        assert!(should_log(&Ctx::background(), as_dyn(&err)));
    }

    #[rstest]
    fn canceled_http_context_never_logs() {
        let ctx = Ctx::http();
        ctx.cancel();
        assert!(!should_log(&ctx, as_dyn(&eyre!("unrelated boom"))));
    }

    #[rstest]
    fn canceled_background_context_logs_only_unrelated() {
        let ctx = Ctx::background();
        ctx.cancel();
        assert!(!should_log(&ctx, as_dyn(&report(Canceled))));
        assert!(should_log(&ctx, as_dyn(&eyre!("unrelated boom"))));
    }
}
