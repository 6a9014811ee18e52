//! Successful JSON responses.

use actix_web::HttpResponse;
use actix_web::http::header::ContentType;
use color_eyre::eyre::{Report, WrapErr};
use serde::Serialize;

/// Layout of JSON response bodies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JsonStyle {
    #[default]
    Compact,
    /// Indented, for humans reading responses during development.
    Pretty,
}

impl JsonStyle {
    /// Pretty when `pretty` is set, compact otherwise.
    pub fn from_flag(pretty: bool) -> Self {
        if pretty { Self::Pretty } else { Self::Compact }
    }

    fn encode<T: Serialize>(self, value: &T) -> Result<String, serde_json::Error> {
        match self {
            Self::Compact => serde_json::to_string(value),
            Self::Pretty => serde_json::to_string_pretty(value),
        }
    }
}

/// `200 OK` with `value` as JSON.
///
/// # Errors
///
/// When `value` cannot be serialised.
pub fn json_ok<T: Serialize>(style: JsonStyle, value: &T) -> Result<HttpResponse, Report> {
    let body = style
        .encode(value)
        .wrap_err("failed to encode response body")?;
    Ok(HttpResponse::Ok()
        .content_type(ContentType::json())
        .body(body))
}
