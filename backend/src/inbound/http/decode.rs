//! Request body and query decoding.
//!
//! Malformed input and failed validation become public 400 errors carrying
//! the decoder's message.

use actix_web::web;
use serde::de::DeserializeOwned;

use crate::domain::Error;
use crate::domain::validation::Validate;

/// Decode a JSON body and validate it.
///
/// # Errors
///
/// A public 400 when the body is not valid JSON for `T` or fails validation.
pub fn decode_json<T>(body: &[u8]) -> Result<T, Error>
where
    T: DeserializeOwned + Validate,
{
    let mut value: T = serde_json::from_slice(body)
        .map_err(|err| Error::wrap(err).into_bad_request())?;
    value
        .validate()
        .map_err(|err| Error::wrap(err).into_bad_request())?;
    Ok(value)
}

/// Decode a query string.
///
/// # Errors
///
/// A public 400 when the query does not fit `T`.
pub fn decode_query<T: DeserializeOwned>(query: &str) -> Result<T, Error> {
    web::Query::<T>::from_query(query)
        .map(web::Query::into_inner)
        .map_err(|err| Error::wrap(err).into_bad_request())
}
