//! Unified error model.
//!
//! Every failure that can reach a request boundary is eventually described by
//! an [`Error`]: the underlying cause plus a disclosure flag, an optional HTTP
//! status and database diagnostics. Only public errors may show their message
//! to a client; everything else is logged in full and answered with a generic
//! body.
//!
//! Errors travel inside [`Report`] chains. Code that adds context with
//! [`WrapErr`](color_eyre::eyre::WrapErr) keeps the inner [`Error`]
//! reachable, and the chain helpers in this module ([`find_error`],
//! [`find_public`], ...) answer questions about the first one found,
//! scanning outer to inner.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use color_eyre::eyre::Report;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::domain::failure::DriverFailure;

/// Prefix shared by codes raised by application database procedures.
pub const DB_ERROR_PREFIX: &str = "db.error.";

/// Stable string naming a database condition: a constraint name or a
/// `db.error.*` / `db.constraint.*` code raised by application SQL.
///
/// # Examples
/// ```
/// use starter::domain::DbCode;
///
/// let code = DbCode::new("users_email_key");
/// assert_eq!(code.as_str(), "users_email_key");
/// assert!(!code.is_app_error());
/// assert!(DbCode::new("db.error.user.banned").is_app_error());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DbCode(String);

impl DbCode {
    /// Wrap a code string.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Borrow the code.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the code was raised by application SQL rather than a named
    /// constraint.
    pub fn is_app_error(&self) -> bool {
        self.0.starts_with(DB_ERROR_PREFIX)
    }
}

impl fmt::Display for DbCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DbCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DbCode {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DbCode {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Structured failure carried through request handling.
///
/// ## Invariants
/// - `cause` is always present and shared immutably between clones.
/// - `http_status == 0` means unset; see [`Error::resolved_http_status`].
/// - `db_query` and `db_context` are for server-side logs only.
///
/// # Examples
/// ```
/// use color_eyre::eyre::eyre;
/// use starter::domain::Error;
///
/// let err = Error::wrap(eyre!("user 42 is missing")).public_http(404);
/// assert!(err.is_public());
/// assert_eq!(err.resolved_http_status(), 404);
/// assert_eq!(err.to_string(), "error (HTTP status 404): user 42 is missing");
/// ```
#[derive(Clone)]
pub struct Error {
    cause: Arc<Report>,
    is_public: bool,
    http_status: u16,
    db_code: Option<DbCode>,
    db_query: Option<String>,
    db_context: Option<String>,
}

impl Error {
    fn from_cause(cause: Report) -> Self {
        Self {
            cause: Arc::new(cause),
            is_public: false,
            http_status: 0,
            db_code: None,
            db_query: None,
            db_context: None,
        }
    }

    /// Lift any failure into an [`Error`].
    ///
    /// A report whose outermost element is already an [`Error`] is returned
    /// unchanged, metadata included. Anything else becomes the cause of a new
    /// private error.
    pub fn wrap(err: impl Into<Report>) -> Self {
        let report = err.into();
        let outermost_is_error = report
            .chain()
            .next()
            .is_some_and(|outer| outer.is::<Self>());
        if !outermost_is_error {
            return Self::from_cause(report);
        }
        match report.downcast::<Self>() {
            Ok(error) => error,
            Err(report) => Self::from_cause(report),
        }
    }

    /// Private error from a plain message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::from_cause(Report::msg(message))
    }

    /// Public 404 from a message.
    pub fn not_found<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::msg(message).into_not_found()
    }

    /// Public 400 from a message.
    pub fn bad_request<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::msg(message).into_bad_request()
    }

    /// Public 401 from a message.
    pub fn unauthenticated<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::msg(message).into_unauthenticated()
    }

    /// Public 403 from a message.
    pub fn forbidden<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::msg(message).into_forbidden()
    }

    /// Public 500 from a message. The message is shown to clients.
    pub fn public_internal<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::msg(message).into_public_internal()
    }

    /// Mark the error safe to disclose.
    #[must_use]
    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }

    /// Set an explicit HTTP status.
    #[must_use]
    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = status;
        self
    }

    /// Mark public and set the HTTP status.
    #[must_use]
    pub fn public_http(self, status: u16) -> Self {
        self.public().with_http_status(status)
    }

    /// Public 404.
    #[must_use]
    pub fn into_not_found(self) -> Self {
        self.public_http(404)
    }

    /// Public 400.
    #[must_use]
    pub fn into_bad_request(self) -> Self {
        self.public_http(400)
    }

    /// Public 401.
    #[must_use]
    pub fn into_unauthenticated(self) -> Self {
        self.public_http(401)
    }

    /// Public 403.
    #[must_use]
    pub fn into_forbidden(self) -> Self {
        self.public_http(403)
    }

    /// Public 500.
    #[must_use]
    pub fn into_public_internal(self) -> Self {
        self.public_http(500)
    }

    /// Attach a database code.
    #[must_use]
    pub fn with_db_code(mut self, code: impl Into<DbCode>) -> Self {
        self.db_code = Some(code.into());
        self
    }

    /// Attach the statement the database reported the failure in.
    #[must_use]
    pub fn with_db_query(mut self, query: impl Into<String>) -> Self {
        self.db_query = Some(query.into());
        self
    }

    /// Attach database diagnostic context.
    #[must_use]
    pub fn with_db_context(mut self, context: impl Into<String>) -> Self {
        self.db_context = Some(context.into());
        self
    }

    /// Innermost failure.
    pub fn cause(&self) -> &Report {
        &self.cause
    }

    /// Whether the message may be shown to clients.
    pub fn is_public(&self) -> bool {
        self.is_public
    }

    /// Explicitly set status, or 0.
    pub fn http_status(&self) -> u16 {
        self.http_status
    }

    /// Database code, if any.
    pub fn db_code(&self) -> Option<&DbCode> {
        self.db_code.as_ref()
    }

    /// Statement the database reported, if any.
    pub fn db_query(&self) -> Option<&str> {
        self.db_query.as_deref()
    }

    /// Database diagnostic context, if any.
    pub fn db_context(&self) -> Option<&str> {
        self.db_context.as_deref()
    }

    /// Status a client should see: the explicit one, else 400 for errors with
    /// a database code, else 500.
    ///
    /// ```
    /// use starter::domain::Error;
    ///
    /// assert_eq!(Error::msg("boom").resolved_http_status(), 500);
    /// assert_eq!(Error::msg("dup").with_db_code("users_email_key").resolved_http_status(), 400);
    /// assert_eq!(Error::msg("dup").with_db_code("x").with_http_status(409).resolved_http_status(), 409);
    /// ```
    pub fn resolved_http_status(&self) -> u16 {
        if self.http_status > 0 {
            self.http_status
        } else if self.db_code.is_some() {
            400
        } else {
            500
        }
    }

    /// `error` followed by the status and database code when set.
    pub fn render_shallow(&self) -> String {
        let mut out = String::from("error");
        if self.http_status > 0 {
            out.push_str(&format!(" (HTTP status {})", self.http_status));
        }
        if let Some(code) = &self.db_code {
            out.push_str(&format!(" (DB code {code})"));
        }
        out
    }

    /// Everything known about the failure, for server logs only.
    pub fn render_full(&self) -> String {
        let mut out = self.render_shallow();
        if let Some(query) = &self.db_query {
            out.push_str("\nDB query or statement:\n");
            out.push_str(query);
        }
        if let Some(context) = &self.db_context {
            out.push_str("\nDB context:\n");
            out.push_str(context);
        }
        out.push_str(&format!("\ncause: {:?}", self.cause));
        out
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.render_shallow(), self.cause)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_full())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        let cause: &(dyn StdError + Send + Sync + 'static) = &**self.cause;
        Some(cause)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDto {
    cause: String,
    #[serde(default)]
    is_public: bool,
    #[serde(default)]
    http_status: u16,
    #[serde(default)]
    db_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    db_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    db_context: Option<String>,
}

impl From<&Error> for ErrorDto {
    fn from(value: &Error) -> Self {
        Self {
            cause: format!("{:#}", value.cause),
            is_public: value.is_public,
            http_status: value.http_status,
            db_code: value
                .db_code
                .as_ref()
                .map(|code| code.as_str().to_owned())
                .unwrap_or_default(),
            db_query: value.db_query.clone().filter(|query| !query.is_empty()),
            db_context: value.db_context.clone().filter(|ctx| !ctx.is_empty()),
        }
    }
}

impl From<ErrorDto> for Error {
    fn from(value: ErrorDto) -> Self {
        let ErrorDto {
            cause,
            is_public,
            http_status,
            db_code,
            db_query,
            db_context,
        } = value;
        Self {
            cause: Arc::new(Report::msg(cause)),
            is_public,
            http_status,
            db_code: Some(db_code).filter(|code| !code.is_empty()).map(DbCode),
            db_query,
            db_context,
        }
    }
}

impl Serialize for Error {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ErrorDto::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Error {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        ErrorDto::deserialize(deserializer).map(Self::from)
    }
}

/// Wrap the error of `result` and apply `patch` to it.
///
/// `Ok` passes through untouched. An [`Error`] already inside `result` is
/// moved, so clones held elsewhere keep their metadata.
///
/// ```
/// use color_eyre::eyre::{Report, eyre};
/// use starter::domain::error::with_patch;
///
/// let failed: Result<(), Report> = Err(eyre!("nope"));
/// let err = with_patch(failed, |err| err.public_http(409)).unwrap_err();
/// assert_eq!(err.resolved_http_status(), 409);
/// ```
pub fn with_patch<T, E, F>(result: Result<T, E>, patch: F) -> Result<T, Error>
where
    E: Into<Report>,
    F: FnOnce(Error) -> Error,
{
    result.map_err(|err| patch(Error::wrap(err)))
}

/// Classification adapters on any `Result` whose error converts to a report.
pub trait ResultExt<T> {
    /// Wrap the error and apply `patch`.
    fn patch_err<F>(self, patch: F) -> Result<T, Error>
    where
        F: FnOnce(Error) -> Error;

    /// Wrap the error unchanged.
    fn classified(self) -> Result<T, Error>
    where
        Self: Sized,
    {
        self.patch_err(|err| err)
    }

    /// Mark the error public.
    fn public_err(self) -> Result<T, Error>
    where
        Self: Sized,
    {
        self.patch_err(Error::public)
    }

    /// Set the HTTP status, leaving disclosure alone.
    fn http_status_err(self, status: u16) -> Result<T, Error>
    where
        Self: Sized,
    {
        self.patch_err(|err| err.with_http_status(status))
    }

    /// Mark public with the given status.
    fn public_http_err(self, status: u16) -> Result<T, Error>
    where
        Self: Sized,
    {
        self.patch_err(|err| err.public_http(status))
    }

    /// Public 404.
    fn not_found_err(self) -> Result<T, Error>
    where
        Self: Sized,
    {
        self.patch_err(Error::into_not_found)
    }

    /// Public 400.
    fn bad_request_err(self) -> Result<T, Error>
    where
        Self: Sized,
    {
        self.patch_err(Error::into_bad_request)
    }

    /// Public 401.
    fn unauthenticated_err(self) -> Result<T, Error>
    where
        Self: Sized,
    {
        self.patch_err(Error::into_unauthenticated)
    }

    /// Public 403.
    fn forbidden_err(self) -> Result<T, Error>
    where
        Self: Sized,
    {
        self.patch_err(Error::into_forbidden)
    }

    /// Public 500.
    fn public_internal_err(self) -> Result<T, Error>
    where
        Self: Sized,
    {
        self.patch_err(Error::into_public_internal)
    }
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<Report>,
{
    fn patch_err<F>(self, patch: F) -> Result<T, Error>
    where
        F: FnOnce(Error) -> Error,
    {
        with_patch(self, patch)
    }
}

/// Iterate `err` and its sources, outer to inner.
pub fn chain<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(err), |current: &&'a (dyn StdError + 'static)| {
        (*current).source()
    })
}

/// First [`Error`] in the chain.
pub fn find_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a Error> {
    chain(err).find_map(|item| item.downcast_ref::<Error>())
}

/// First [`Error`] in the chain, if it is public. A private first match hides
/// any public error further in.
pub fn find_public<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a Error> {
    find_error(err).filter(|found| found.is_public())
}

/// Whether the outermost element is a public [`Error`], meaning the client
/// will see exactly what happened and no server log is needed.
pub fn is_disclosed_as_is(err: &(dyn StdError + 'static)) -> bool {
    err.downcast_ref::<Error>().is_some_and(Error::is_public)
}

/// Whether the first [`Error`] carries `status` explicitly.
pub fn has_http_status(err: &(dyn StdError + 'static), status: u16) -> bool {
    find_error(err).is_some_and(|found| found.http_status == status)
}

/// Whether the first [`Error`] carries exactly `code`.
pub fn has_db_code(err: &(dyn StdError + 'static), code: &str) -> bool {
    find_error(err)
        .and_then(Error::db_code)
        .is_some_and(|found| found.as_str() == code)
}

/// Whether the first [`Error`] has a code starting with `prefix`.
pub fn has_db_code_prefix(err: &(dyn StdError + 'static), prefix: &str) -> bool {
    find_error(err)
        .and_then(Error::db_code)
        .is_some_and(|found| found.as_str().starts_with(prefix))
}

/// Not found, by status or by an unclassified missing row anywhere in the chain.
pub fn is_not_found(err: &(dyn StdError + 'static)) -> bool {
    has_http_status(err, 404)
        || chain(err).any(|item| {
            matches!(
                item.downcast_ref::<DriverFailure>(),
                Some(DriverFailure::RowNotFound)
            )
        })
}

/// Raised by application SQL with a `db.error.` code.
pub fn is_db_error(err: &(dyn StdError + 'static)) -> bool {
    has_db_code_prefix(err, DB_ERROR_PREFIX)
}

/// Explicit 401.
pub fn is_unauthenticated(err: &(dyn StdError + 'static)) -> bool {
    has_http_status(err, 401)
}

/// Turn a not-found failure into `Ok(None)`.
///
/// ```
/// use starter::domain::Error;
/// use starter::domain::error::allow_not_found;
///
/// let missing: Result<u32, Error> = Err(Error::not_found("gone"));
/// assert_eq!(allow_not_found(missing).unwrap(), None);
/// assert_eq!(allow_not_found(Ok::<_, Error>(7)).unwrap(), Some(7));
/// ```
pub fn allow_not_found<T>(result: Result<T, Error>) -> Result<Option<T>, Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if is_not_found(&err) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Borrow the outermost element of a report as a plain error, for the chain
/// helpers above.
pub fn as_dyn(report: &Report) -> &(dyn StdError + 'static) {
    let outer: &(dyn StdError + Send + Sync + 'static) = &**report;
    outer
}
