//! HTTP rendering of domain failures.
//!
//! Only public errors reach the client with their own message and status.
//! Everything else becomes the same opaque 500 body.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use color_eyre::eyre::Report;
use serde::{Deserialize, Serialize};

use crate::domain::Error;
use crate::domain::error::{as_dyn, find_public};

/// Message sent in place of any private failure.
pub const UNEXPECTED_ERROR: &str = "Unexpected Error";

/// JSON body of a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Error message, or [`UNEXPECTED_ERROR`] for private failures.
    pub cause: String,
    /// Whether the message describes the actual failure.
    pub is_public: bool,
    /// Status the response was sent with.
    pub http_status: u16,
    /// Database constraint or application code; empty when there is none.
    pub db_code: String,
}

impl ErrorBody {
    /// Body disclosing a public error.
    pub fn disclose(error: &Error) -> Self {
        Self {
            cause: format!("{:#}", error.cause()),
            is_public: true,
            http_status: error.resolved_http_status(),
            db_code: error
                .db_code()
                .map(|code| code.as_str().to_owned())
                .unwrap_or_default(),
        }
    }

    /// Body hiding everything about a private failure.
    pub fn unexpected() -> Self {
        Self {
            cause: UNEXPECTED_ERROR.to_owned(),
            is_public: false,
            http_status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            db_code: String::new(),
        }
    }

    fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn into_response(self) -> HttpResponse {
        HttpResponse::build(self.status()).json(self)
    }
}

fn body_for(error: Option<&Error>) -> ErrorBody {
    error
        .filter(|found| found.is_public())
        .map_or_else(ErrorBody::unexpected, ErrorBody::disclose)
}

/// Response for `err`, disclosing only the first [`Error`] of its chain and
/// only when that error is public.
pub fn render_failure(err: &Report) -> HttpResponse {
    body_for(find_public(as_dyn(err))).into_response()
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        body_for(Some(self)).status()
    }

    fn error_response(&self) -> HttpResponse {
        body_for(Some(self)).into_response()
    }
}
