//! Translation of SQLx errors into driver-neutral failures.

use sqlx::error::DatabaseError;
use sqlx::postgres::{PgDatabaseError, PgErrorPosition};
use tracing::debug;

use crate::domain::Error;
use crate::domain::failure::{DatabaseFailure, DriverFailure, decode_failure};

/// Map a SQLx error into a [`DriverFailure`].
pub fn driver_failure(error: sqlx::Error) -> DriverFailure {
    match error {
        sqlx::Error::RowNotFound => DriverFailure::RowNotFound,
        sqlx::Error::Database(database) => DriverFailure::Database(database_failure(&*database)),
        sqlx::Error::Io(io) => DriverFailure::Io(io),
        other => DriverFailure::other(other),
    }
}

/// Classify a SQLx error raised while running `statement`.
pub fn classify(error: sqlx::Error, statement: &str) -> Error {
    debug!(error = %error, "database operation failed");
    decode_failure(driver_failure(error), statement)
}

fn database_failure(database: &dyn DatabaseError) -> DatabaseFailure {
    let mut failure = DatabaseFailure {
        code: database
            .code()
            .map(|code| code.into_owned())
            .unwrap_or_default(),
        message: database.message().to_owned(),
        constraint: database.constraint().map(str::to_owned),
        ..DatabaseFailure::default()
    };
    if let Some(postgres) = database.try_downcast_ref::<PgDatabaseError>() {
        failure.where_ = postgres.r#where().map(str::to_owned);
        failure.hint = postgres.hint().map(str::to_owned);
        match postgres.position() {
            Some(PgErrorPosition::Original(position)) => failure.position = Some(position),
            Some(PgErrorPosition::Internal { query, .. }) => {
                failure.internal_query = Some(query.to_owned());
            }
            None => {}
        }
    }
    failure
}
