//! PostgreSQL implementation of the transaction ports.
//!
//! Rows are returned as JSON objects by wrapping each statement as
//! `with _rows as (...) select to_jsonb(_rows) from _rows`, which also accepts
//! data-modifying statements with a `returning` clause.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgConnection};
use sqlx::{Arguments, Postgres};
use tracing::debug;

use super::pool::DbPool;
use super::sqlx_error_mapping::classify;
use crate::domain::failure::{DriverFailure, decode_failure};
use crate::domain::ports::{Row, Transaction, TransactionProvider};
use crate::domain::sql::{SqlArg, Statement, single_line};
use crate::domain::Error;

/// Opens transactions on a [`DbPool`].
#[derive(Clone, Debug)]
pub struct PgTransactionProvider {
    pool: DbPool,
    pretty_sql: bool,
}

impl PgTransactionProvider {
    /// Provider over `pool` sending single-line SQL.
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            pretty_sql: false,
        }
    }

    /// Send statements exactly as written instead of collapsing them.
    #[must_use]
    pub fn with_pretty_sql(mut self, pretty_sql: bool) -> Self {
        self.pretty_sql = pretty_sql;
        self
    }
}

#[async_trait]
impl TransactionProvider for PgTransactionProvider {
    async fn begin(&self) -> Result<Box<dyn Transaction>, Error> {
        let inner = self
            .pool
            .inner()
            .begin()
            .await
            .map_err(|err| classify(err, "begin"))?;
        debug!("transaction started");
        Ok(Box::new(PgTransaction {
            inner,
            pretty_sql: self.pretty_sql,
        }))
    }
}

/// Open PostgreSQL transaction. Dropping it uncommitted rolls it back.
pub struct PgTransaction {
    inner: sqlx::Transaction<'static, Postgres>,
    pretty_sql: bool,
}

impl PgTransaction {
    fn format(&self, text: &str) -> String {
        if self.pretty_sql {
            text.to_owned()
        } else {
            single_line(text)
        }
    }
}

fn arguments(args: &[SqlArg]) -> Result<PgArguments, Error> {
    let mut arguments = PgArguments::default();
    for arg in args {
        let added = match arg {
            SqlArg::Null => arguments.add(None::<String>),
            SqlArg::Bool(value) => arguments.add(*value),
            SqlArg::Int(value) => arguments.add(*value),
            SqlArg::Float(value) => arguments.add(*value),
            SqlArg::Text(value) => arguments.add(value.clone()),
            SqlArg::Json(value) => arguments.add(value.clone()),
        };
        added.map_err(|err| decode_failure(DriverFailure::Other(err), ""))?;
    }
    Ok(arguments)
}

async fn run_script(connection: &mut PgConnection, script: &str) -> Result<(), sqlx::Error> {
    sqlx::Executor::execute(connection, sqlx::raw_sql(script))
        .await
        .map(drop)
}

fn into_row(value: Value, statement: &str) -> Result<Row, Error> {
    match value {
        Value::Object(row) => Ok(row),
        other => Err(Error::msg(format!("expected a JSON object row, got {other}"))
            .with_db_query(statement.to_owned())),
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<u64, Error> {
        let text = self.format(statement.text());
        let arguments = arguments(statement.args())?;
        sqlx::query_with(&text, arguments)
            .execute(&mut *self.inner)
            .await
            .map(|done| done.rows_affected())
            .map_err(|err| classify(err, &text))
    }

    async fn fetch_rows(&mut self, statement: &Statement) -> Result<Vec<Row>, Error> {
        let text = format!(
            "with _rows as ({}) select to_jsonb(_rows) from _rows",
            self.format(statement.text())
        );
        let arguments = arguments(statement.args())?;
        let values: Vec<Value> = sqlx::query_scalar_with(&text, arguments)
            .fetch_all(&mut *self.inner)
            .await
            .map_err(|err| classify(err, &text))?;
        values
            .into_iter()
            .map(|value| into_row(value, &text))
            .collect()
    }

    async fn execute_script(&mut self, script: &str) -> Result<(), Error> {
        run_script(&mut self.inner, script)
            .await
            .map_err(|err| classify(err, script))
    }

    async fn commit(self: Box<Self>) -> Result<(), Error> {
        self.inner
            .commit()
            .await
            .map_err(|err| classify(err, "commit"))
    }

    async fn rollback(self: Box<Self>) -> Result<(), Error> {
        self.inner
            .rollback()
            .await
            .map_err(|err| classify(err, "rollback"))
    }
}
