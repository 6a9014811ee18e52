//! Classification of raw execution failures.
//!
//! Persistence adapters translate their driver's errors into a
//! [`DriverFailure`] and hand it to [`decode_failure`] together with the
//! statement that failed. The result is an [`Error`] with disclosure, status
//! and diagnostics already decided, so callers only ever add context.

use std::error::Error as StdError;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::error::{DbCode, Error};

/// SQLSTATE for a statement canceled by the server or client.
pub const QUERY_CANCELED: &str = "57014";
/// SQLSTATE for a syntax error.
pub const SYNTAX_ERROR: &str = "42601";
/// SQLSTATE for a check constraint violation.
pub const CHECK_VIOLATION: &str = "23514";

const CONTEXT_RADIUS: usize = 128;

static EMBEDDED_DB_CODE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#""(db\.(?:constraint|error)(?:\.\w+)+)"\s*:?\s*(.*)"#).ok()
});

/// Structured error reported by the database server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseFailure {
    /// SQLSTATE code.
    pub code: String,
    /// Primary message.
    pub message: String,
    /// Name of the violated constraint.
    pub constraint: Option<String>,
    /// 1-based character offset into the statement.
    pub position: Option<usize>,
    /// Call stack context, e.g. the PL/pgSQL line.
    pub where_: Option<String>,
    /// Suggestion attached by the server.
    pub hint: Option<String>,
    /// Statement generated internally, e.g. inside a function.
    pub internal_query: Option<String>,
}

impl fmt::Display for DatabaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (SQLSTATE {})", self.message, self.code)
    }
}

impl StdError for DatabaseFailure {}

/// Driver-neutral view of a failed database operation.
#[derive(Debug, thiserror::Error)]
pub enum DriverFailure {
    /// A query expected a row and got none.
    #[error("no rows in result set")]
    RowNotFound,
    /// The server rejected the statement.
    #[error("{0}")]
    Database(DatabaseFailure),
    /// The transaction was already committed or rolled back.
    #[error("transaction has already been committed or rolled back")]
    TransactionFinished,
    /// The caller's context was canceled.
    #[error("context canceled")]
    Canceled,
    /// Transport failure.
    #[error("i/o error: {0}")]
    Io(#[source] std::io::Error),
    /// Anything else the driver reports.
    #[error(transparent)]
    Other(Box<dyn StdError + Send + Sync + 'static>),
}

impl DriverFailure {
    /// Wrap an arbitrary driver error.
    pub fn other(err: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        Self::Other(err.into())
    }

    /// Server-reported details, if this is a database failure.
    pub fn database(&self) -> Option<&DatabaseFailure> {
        match self {
            Self::Database(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Classify `failure`, raised while running `statement`.
///
/// - A missing row is public with status 404.
/// - A server error naming a constraint is public with that constraint as its
///   database code. An unnamed check violation is public with status 400.
///   Anything else from the server is private.
/// - Other failures whose text embeds a quoted `db.error.*` or
///   `db.constraint.*` code are public with that code.
/// - Everything else is private with no metadata.
///
/// ```
/// use starter::domain::failure::{DatabaseFailure, DriverFailure, decode_failure};
///
/// let failure = DriverFailure::Database(DatabaseFailure {
///     code: "23505".into(),
///     message: "duplicate key value violates unique constraint".into(),
///     constraint: Some("users_email_key".into()),
///     ..DatabaseFailure::default()
/// });
/// let err = decode_failure(failure, "insert into users (email) values ($1)");
/// assert!(err.is_public());
/// assert_eq!(err.resolved_http_status(), 400);
/// assert_eq!(err.db_code().map(|code| code.as_str()), Some("users_email_key"));
/// ```
pub fn decode_failure(failure: DriverFailure, statement: &str) -> Error {
    match failure {
        DriverFailure::RowNotFound => Error::wrap(DriverFailure::RowNotFound).into_not_found(),
        DriverFailure::Database(database) => decode_database(database, statement),
        other => decode_embedded(other),
    }
}

/// [`decode_failure`] over a result.
pub fn decode_result<T>(result: Result<T, DriverFailure>, statement: &str) -> Result<T, Error> {
    result.map_err(|failure| decode_failure(failure, statement))
}

fn decode_database(database: DatabaseFailure, statement: &str) -> Error {
    let constraint = database.constraint.clone().filter(|name| !name.is_empty());
    let embedded = constraint
        .is_none()
        .then(|| embedded_db_code(&database.message))
        .flatten();
    let check_violation = database.code == CHECK_VIOLATION;

    let mut context = database
        .where_
        .clone()
        .filter(|text| !text.is_empty())
        .or_else(|| database.hint.clone().filter(|text| !text.is_empty()));
    if context.is_none() && database.code == SYNTAX_ERROR {
        context = database
            .position
            .filter(|position| *position > 0)
            .map(|position| char_window(statement, position, CONTEXT_RADIUS));
    }
    let query = database
        .internal_query
        .clone()
        .filter(|text| !text.is_empty());

    let mut err = Error::wrap(DriverFailure::Database(database));
    if let Some(code) = constraint.map(DbCode::from).or(embedded) {
        err = err.public().with_db_code(code);
    } else if check_violation {
        err = err.into_bad_request();
    }
    if let Some(context) = context {
        err = err.with_db_context(context);
    }
    if let Some(query) = query {
        err = err.with_db_query(query);
    }
    err
}

fn decode_embedded(failure: DriverFailure) -> Error {
    let code = embedded_db_code(&failure.to_string());
    let err = Error::wrap(failure);
    match code {
        Some(code) => err.public().with_db_code(code),
        None => err,
    }
}

/// Code embedded in text as `"db.error.a.b": message` or
/// `"db.constraint.a": message`.
///
/// ```
/// use starter::domain::failure::embedded_db_code;
///
/// let code = embedded_db_code(r#"ERROR: "db.error.user.banned": account locked"#);
/// assert_eq!(code.as_ref().map(|code| code.as_str()), Some("db.error.user.banned"));
/// assert!(embedded_db_code("db.error.user.banned without quotes").is_none());
/// ```
pub fn embedded_db_code(text: &str) -> Option<DbCode> {
    let pattern = EMBEDDED_DB_CODE.as_ref()?;
    let captures = pattern.captures(text)?;
    captures.get(1).map(|code| DbCode::new(code.as_str()))
}

/// Characters `[center - radius, center + radius)` of `text`, clamped to its
/// bounds.
fn char_window(text: &str, center: usize, radius: usize) -> String {
    let start = center.saturating_sub(radius);
    let end = center.saturating_add(radius);
    text.chars().skip(start).take(end - start).collect()
}

#[cfg(test)]
mod tests {
    //! Classification table coverage.

    use super::*;
    use rstest::rstest;

    #[rstest]
    fn embedded_code_pattern_compiles() {
        assert!(EMBEDDED_DB_CODE.is_some());
    }

    fn database(code: &str) -> DatabaseFailure {
        DatabaseFailure {
            code: code.to_owned(),
            message: format!("server error {code}"),
            ..DatabaseFailure::default()
        }
    }

    #[rstest]
    fn missing_row_is_public_not_found() {
        let err = decode_failure(DriverFailure::RowNotFound, "select 1");
        assert!(err.is_public());
        assert_eq!(err.resolved_http_status(), 404);
        assert!(err.db_code().is_none());
    }

    #[rstest]
    fn named_constraint_is_public_with_code() {
        let failure = DatabaseFailure {
            constraint: Some("users_email_key".to_owned()),
            ..database("23505")
        };
        let err = decode_failure(DriverFailure::Database(failure), "insert");
        assert!(err.is_public());
        assert_eq!(err.http_status(), 0);
        assert_eq!(err.resolved_http_status(), 400);
        assert_eq!(err.db_code().map(DbCode::as_str), Some("users_email_key"));
    }

    #[rstest]
    fn unnamed_check_violation_is_public_bad_request() {
        let err = decode_failure(DriverFailure::Database(database(CHECK_VIOLATION)), "update");
        assert!(err.is_public());
        assert_eq!(err.http_status(), 400);
        assert!(err.db_code().is_none());
    }

    #[rstest]
    fn syntax_error_takes_window_around_position() {
        // 2002 characters.
        let statement = "abcdefghijklmnopqrstuvwxyz".repeat(77);
        let failure = DatabaseFailure {
            position: Some(500),
            ..database(SYNTAX_ERROR)
        };
        let err = decode_failure(DriverFailure::Database(failure), &statement);

        assert!(!err.is_public());
        assert_eq!(err.resolved_http_status(), 500);
        assert_eq!(err.db_context(), Some(&statement[372..628]));
    }

    #[rstest]
    #[case(10, 0, 138)]
    #[case(1990, 1862, 2000)]
    fn syntax_error_window_is_clamped(
        #[case] position: usize,
        #[case] start: usize,
        #[case] end: usize,
    ) {
        let statement = "x".repeat(1000) + &"y".repeat(1000);
        let failure = DatabaseFailure {
            position: Some(position),
            ..database(SYNTAX_ERROR)
        };
        let err = decode_failure(DriverFailure::Database(failure), &statement);
        assert_eq!(err.db_context(), Some(&statement[start..end]));
    }

    #[rstest]
    fn syntax_error_window_counts_characters() {
        let statement = "é".repeat(600);
        let failure = DatabaseFailure {
            position: Some(200),
            ..database(SYNTAX_ERROR)
        };
        let err = decode_failure(DriverFailure::Database(failure), &statement);
        assert_eq!(err.db_context().map(|text| text.chars().count()), Some(256));
    }

    #[rstest]
    fn server_context_wins_over_window() {
        let failure = DatabaseFailure {
            position: Some(5),
            where_: Some("PL/pgSQL function f() line 2".to_owned()),
            internal_query: Some("select boom".to_owned()),
            ..database(SYNTAX_ERROR)
        };
        let err = decode_failure(DriverFailure::Database(failure), "select f()");
        assert_eq!(err.db_context(), Some("PL/pgSQL function f() line 2"));
        assert_eq!(err.db_query(), Some("select boom"));
    }

    #[rstest]
    fn hint_is_used_when_no_where() {
        let failure = DatabaseFailure {
            hint: Some("No function matches the given name".to_owned()),
            ..database("42883")
        };
        let err = decode_failure(DriverFailure::Database(failure), "select nope()");
        assert!(!err.is_public());
        assert_eq!(err.db_context(), Some("No function matches the given name"));
    }

    #[rstest]
    fn procedure_raised_code_is_public() {
        let failure = DatabaseFailure {
            message: r#""db.error.user.banned": account locked"#.to_owned(),
            ..database("P0001")
        };
        let err = decode_failure(DriverFailure::Database(failure), "select ban()");
        assert!(err.is_public());
        assert_eq!(err.resolved_http_status(), 400);
        assert_eq!(err.db_code().map(DbCode::as_str), Some("db.error.user.banned"));
    }

    #[rstest]
    fn other_server_errors_are_private() {
        let err = decode_failure(DriverFailure::Database(database("XX000")), "select 1");
        assert!(!err.is_public());
        assert_eq!(err.resolved_http_status(), 500);
        assert!(err.db_context().is_none());
    }

    #[rstest]
    fn embedded_code_in_driver_text_is_public() {
        let failure = DriverFailure::other(r#"protocol: "db.constraint.order.total": must be positive"#);
        let err = decode_failure(failure, "select 1");
        assert!(err.is_public());
        assert_eq!(
            err.db_code().map(DbCode::as_str),
            Some("db.constraint.order.total")
        );
    }

    #[rstest]
    #[case(r#""db.error": missing segment"#)]
    #[case("db.error.user.banned: unquoted")]
    #[case(r#""db.warning.user": wrong family"#)]
    fn malformed_embedded_codes_are_ignored(#[case] text: &str) {
        assert!(embedded_db_code(text).is_none());
    }

    #[rstest]
    fn unknown_failures_stay_private() {
        let err = decode_failure(
            DriverFailure::Io(std::io::Error::other("connection refused")),
            "select 1",
        );
        assert!(!err.is_public());
        assert!(err.db_code().is_none());
        assert_eq!(err.http_status(), 0);
    }

    #[rstest]
    fn decode_result_passes_ok_through() {
        let value = decode_result(Ok::<_, DriverFailure>(3), "select 3");
        assert_eq!(value.ok(), Some(3));
    }
}
