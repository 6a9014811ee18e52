//! Ambient transactions.
//!
//! [`with_transaction`] opens a transaction unless the context already carries
//! one, so nested units of work share a single transaction that the outermost
//! scope commits exactly once. A test can open its own transaction, put it on
//! the context, and roll it back afterwards; the code under test never
//! commits it.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use cap_std::{ambient_authority, fs::Dir};
use color_eyre::eyre::{Report, WrapErr};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::context::Ctx;
use crate::domain::error::{Error, ResultExt};
use crate::domain::failure::{DriverFailure, decode_failure};
use crate::domain::ports::{Row, Transaction, TransactionProvider};
use crate::domain::sql::Statement;

/// Shared slot holding an open transaction.
///
/// Clones share the transaction. Once the owning scope commits or abandons it
/// the slot is empty and every clone fails with
/// [`DriverFailure::TransactionFinished`].
#[derive(Clone)]
pub struct TxHandle {
    slot: Arc<Mutex<Option<Box<dyn Transaction>>>>,
}

impl TxHandle {
    /// Hold `transaction` in a new slot.
    pub fn new(transaction: Box<dyn Transaction>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(transaction))),
        }
    }

    /// Whether both handles share one slot.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// Run a statement and return the number of affected rows.
    pub async fn execute(&self, statement: &Statement) -> Result<u64, Error> {
        let mut slot = self.slot.lock().await;
        let transaction = slot.as_mut().ok_or_else(finished)?;
        transaction.execute(statement).await
    }

    /// Run a statement and return its raw rows.
    pub async fn fetch_rows(&self, statement: &Statement) -> Result<Vec<Row>, Error> {
        let mut slot = self.slot.lock().await;
        let transaction = slot.as_mut().ok_or_else(finished)?;
        transaction.fetch_rows(statement).await
    }

    /// Run a statement and decode every row.
    pub async fn fetch_all<T: DeserializeOwned>(
        &self,
        statement: &Statement,
    ) -> Result<Vec<T>, Error> {
        self.fetch_rows(statement)
            .await?
            .into_iter()
            .map(decode_row)
            .collect()
    }

    /// Run a statement and decode its first row. No row is a public 404.
    pub async fn fetch_one<T: DeserializeOwned>(&self, statement: &Statement) -> Result<T, Error> {
        match self.fetch_optional(statement).await? {
            Some(value) => Ok(value),
            None => Err(decode_failure(DriverFailure::RowNotFound, statement.text())),
        }
    }

    /// Run a statement and decode its first row, if any.
    pub async fn fetch_optional<T: DeserializeOwned>(
        &self,
        statement: &Statement,
    ) -> Result<Option<T>, Error> {
        self.fetch_rows(statement)
            .await?
            .into_iter()
            .next()
            .map(decode_row)
            .transpose()
    }

    /// Run a statement that must touch exactly one row.
    ///
    /// `returning true` is appended, so the statement must be an `insert`,
    /// `update` or `delete` without its own `returning` clause. No row is a
    /// public 404; more than one is a private error.
    pub async fn exec_single(&self, statement: &Statement) -> Result<(), Error> {
        let returning = statement.clone().append("returning true");
        let rows = self.fetch_rows(&returning).await?;
        match rows.len() {
            1 => Ok(()),
            0 => Err(decode_failure(DriverFailure::RowNotFound, returning.text())),
            count => Err(Error::msg(format!(
                "expected to affect exactly one row, affected {count}"
            ))),
        }
    }

    /// Run the SQL script at `path`.
    pub async fn exec_file(&self, path: &Path) -> Result<(), Report> {
        let script = read_script(path)
            .wrap_err_with(|| format!("failed to read {:?}", path.display().to_string()))?;
        let mut slot = self.slot.lock().await;
        let transaction = slot.as_mut().ok_or_else(finished)?;
        transaction
            .execute_script(&script)
            .await
            .wrap_err_with(|| format!("failed to execute {:?}", path.display().to_string()))
    }

    /// Run each SQL script in order, stopping at the first failure.
    pub async fn exec_files<P: AsRef<Path>>(&self, paths: &[P]) -> Result<(), Report> {
        for path in paths {
            self.exec_file(path.as_ref()).await?;
        }
        Ok(())
    }

    /// Commit and empty the slot.
    pub async fn commit(&self) -> Result<(), Error> {
        let transaction = self.take().await.ok_or_else(finished)?;
        transaction.commit().await
    }

    /// Roll back and empty the slot.
    pub async fn rollback(&self) -> Result<(), Error> {
        let transaction = self.take().await.ok_or_else(finished)?;
        transaction.rollback().await
    }

    /// Empty the slot without committing; the driver rolls the transaction
    /// back when it is dropped.
    pub async fn abandon(&self) {
        drop(self.take().await);
    }

    async fn take(&self) -> Option<Box<dyn Transaction>> {
        self.slot.lock().await.take()
    }
}

impl fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxHandle")
            .field("slot", &Arc::as_ptr(&self.slot))
            .finish()
    }
}

fn finished() -> Error {
    Error::wrap(DriverFailure::TransactionFinished)
}

fn decode_row<T: DeserializeOwned>(row: Row) -> Result<T, Error> {
    serde_json::from_value(Value::Object(row))
        .wrap_err("failed to decode row")
        .classified()
}

fn read_script(path: &Path) -> std::io::Result<String> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path.file_name().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name")
    })?;
    let directory = Dir::open_ambient_dir(parent, ambient_authority())?;
    directory.read_to_string(file_name)
}

/// A failed commit is never disclosed, even when the driver classified it
/// as public.
fn commit_failure(err: Error) -> Report {
    Report::new(Error::wrap(
        Report::new(err).wrap_err("failed to commit transaction"),
    ))
}

/// Run `f` inside a transaction.
///
/// When `ctx` already carries a transaction `f` joins it and its result is
/// returned as is; the scope that opened the transaction commits it.
/// Otherwise a transaction is opened, `f` runs with a child context carrying
/// it, and the transaction is committed if `f` succeeds. A failure from `f`
/// leaves the transaction uncommitted and it is rolled back. A failed commit
/// replaces the successful result.
///
/// # Errors
///
/// The error of `f`, or a wrapped begin or commit failure.
pub async fn with_transaction<T, F, Fut>(
    provider: &dyn TransactionProvider,
    ctx: &Ctx,
    f: F,
) -> Result<T, Report>
where
    F: FnOnce(Ctx, TxHandle) -> Fut,
    Fut: Future<Output = Result<T, Report>>,
{
    if let Some(handle) = ctx.transaction() {
        return f(ctx.clone(), handle.clone()).await;
    }

    ctx.ensure_active()
        .wrap_err("failed to start DB transaction")?;
    let transaction = provider
        .begin()
        .await
        .wrap_err("failed to start DB transaction")?;
    let handle = TxHandle::new(transaction);
    let scope = ctx.child().with_transaction(handle.clone());
    let _cancel = scope.cancel_on_drop();

    match f(scope, handle.clone()).await {
        Ok(value) => {
            if let Err(err) = handle.commit().await {
                return Err(commit_failure(err));
            }
            debug!("transaction committed");
            Ok(value)
        }
        Err(err) => {
            handle.abandon().await;
            debug!("transaction abandoned after failure");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    //! Ownership and commit semantics, using the scripted fake provider.

    use super::*;
    use color_eyre::eyre::eyre;
    use rstest::rstest;
    use serde::Deserialize;
    use serde_json::json;

    use crate::domain::error::{as_dyn, chain, find_error, find_public, is_not_found};
    use crate::domain::failure::DatabaseFailure;
    use crate::test_support::{FakeTransactionProvider, SqlScripts, row};

    fn has_db_code_somewhere(err: &Report, code: &str) -> bool {
        chain(as_dyn(err))
            .filter_map(|item| item.downcast_ref::<Error>())
            .any(|found| found.db_code().map(|found| found.as_str()) == Some(code))
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: i64,
        name: String,
    }

    #[tokio::test]
    async fn owning_scope_commits_once() {
        let provider = FakeTransactionProvider::new();
        let value = with_transaction(&provider, &Ctx::background(), |_, tx| async move {
            tx.execute(&Statement::new("update t set a = 1")).await?;
            Ok(7)
        })
        .await
        .expect("transaction succeeds");

        assert_eq!(value, 7);
        let stats = provider.stats();
        assert_eq!(stats.begun, 1);
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.abandoned, 0);
        assert_eq!(stats.statements, vec!["update t set a = 1".to_owned()]);
    }

    #[tokio::test]
    async fn nested_scopes_share_one_transaction() {
        let provider = FakeTransactionProvider::new();
        let provider_ref = &provider;
        with_transaction(provider_ref, &Ctx::http(), |outer_ctx, outer_tx| async move {
            with_transaction(provider_ref, &outer_ctx, |inner_ctx, inner_tx| async move {
                assert!(inner_tx.same_as(&outer_tx));
                assert!(inner_ctx.transaction().is_some_and(|tx| tx.same_as(&outer_tx)));
                Ok(())
            })
            .await
        })
        .await
        .expect("nested transaction succeeds");

        let stats = provider.stats();
        assert_eq!(stats.begun, 1);
        assert_eq!(stats.committed, 1);
    }

    #[tokio::test]
    async fn failing_scope_never_commits() {
        let provider = FakeTransactionProvider::new();
        let err = with_transaction(&provider, &Ctx::background(), |_, _| async move {
            Err::<(), _>(eyre!("handler failed"))
        })
        .await
        .expect_err("handler error propagates");

        assert_eq!(err.to_string(), "handler failed");
        let stats = provider.stats();
        assert_eq!(stats.committed, 0);
        assert_eq!(stats.abandoned, 1);
    }

    #[tokio::test]
    async fn commit_failure_replaces_success() {
        let provider = FakeTransactionProvider::new();
        provider.fail_next_commit(Error::msg("could not serialize access"));
        let err = with_transaction(&provider, &Ctx::background(), |_, _| async move { Ok(()) })
            .await
            .expect_err("commit failure surfaces");

        assert!(err.to_string().contains("failed to commit transaction"));
        let found = find_error(as_dyn(&err)).expect("classified commit error");
        assert!(!found.is_public());
    }

    #[tokio::test]
    async fn public_commit_failure_is_hidden() {
        let provider = FakeTransactionProvider::new();
        provider.fail_next_commit(decode_failure(
            DriverFailure::Database(DatabaseFailure {
                code: "23505".to_owned(),
                message: "duplicate key value violates unique constraint".to_owned(),
                constraint: Some("users_email_key".to_owned()),
                ..DatabaseFailure::default()
            }),
            "commit",
        ));
        let err = with_transaction(&provider, &Ctx::background(), |_, _| async move { Ok(()) })
            .await
            .expect_err("commit failure surfaces");

        assert!(find_public(as_dyn(&err)).is_none());
        assert_eq!(find_error(as_dyn(&err)).map(Error::resolved_http_status), Some(500));
        assert!(has_db_code_somewhere(&err, "users_email_key"));
    }

    #[tokio::test]
    async fn begin_failure_is_wrapped() {
        let provider = FakeTransactionProvider::new();
        provider.fail_next_begin(Error::msg("too many connections"));
        let err = with_transaction(&provider, &Ctx::background(), |_, _| async move { Ok(()) })
            .await
            .expect_err("begin failure surfaces");
        assert_eq!(err.to_string(), "failed to start DB transaction");
        assert_eq!(provider.stats().begun, 0);
    }

    #[tokio::test]
    async fn canceled_context_does_not_begin() {
        let provider = FakeTransactionProvider::new();
        let ctx = Ctx::background();
        ctx.cancel();
        let result = with_transaction(&provider, &ctx, |_, _| async move { Ok(()) }).await;
        assert!(result.is_err());
        assert_eq!(provider.stats().begun, 0);
    }

    #[tokio::test]
    async fn scope_context_is_canceled_after_completion() {
        let provider = FakeTransactionProvider::new();
        let scope = with_transaction(&provider, &Ctx::background(), |scope, _| async move {
            Ok(scope)
        })
        .await
        .expect("transaction succeeds");
        assert!(scope.is_canceled());
    }

    #[tokio::test]
    async fn stray_clone_sees_finished_transaction() {
        let provider = FakeTransactionProvider::new();
        let stray = with_transaction(&provider, &Ctx::background(), |_, tx| async move { Ok(tx) })
            .await
            .expect("transaction succeeds");

        let err = stray
            .execute(&Statement::new("select 1"))
            .await
            .expect_err("slot is empty");
        assert!(matches!(
            err.cause().downcast_ref::<DriverFailure>(),
            Some(DriverFailure::TransactionFinished)
        ));
    }

    #[tokio::test]
    async fn fetch_helpers_decode_rows() {
        let provider = FakeTransactionProvider::new();
        provider.push_rows(vec![row(json!({"id": 1, "name": "ada"}))]);
        provider.push_rows(Vec::new());
        let tx = TxHandle::new(provider.begin().await.expect("begin"));

        let user: User = tx
            .fetch_one(&Statement::new("select id, name from users limit 1"))
            .await
            .expect("one row");
        assert_eq!(user, User { id: 1, name: "ada".to_owned() });

        let missing = tx
            .fetch_one::<User>(&Statement::new("select id, name from users where false"))
            .await
            .expect_err("no row");
        assert!(missing.is_public());
        assert!(is_not_found(&missing));
    }

    #[tokio::test]
    async fn malformed_rows_are_private_errors() {
        let provider = FakeTransactionProvider::new();
        provider.push_rows(vec![row(json!({"id": "one"}))]);
        let tx = TxHandle::new(provider.begin().await.expect("begin"));

        let err = tx
            .fetch_all::<User>(&Statement::new("select id from users"))
            .await
            .expect_err("decode failure");
        assert!(!err.is_public());
    }

    #[rstest]
    #[case(0, Some(404))]
    #[case(1, None)]
    #[case(3, Some(500))]
    #[tokio::test]
    async fn exec_single_requires_exactly_one_row(
        #[case] rows: usize,
        #[case] expected_status: Option<u16>,
    ) {
        let provider = FakeTransactionProvider::new();
        provider.push_rows(vec![row(json!({"bool": true})); rows]);
        let tx = TxHandle::new(provider.begin().await.expect("begin"));

        let result = tx
            .exec_single(&Statement::new("delete from users where id = $1").bind(1_i64))
            .await;
        assert_eq!(
            result.err().map(|err| err.resolved_http_status()),
            expected_status
        );
        assert_eq!(
            provider.stats().statements,
            vec!["delete from users where id = $1 returning true".to_owned()]
        );
    }

    #[tokio::test]
    async fn exec_file_runs_script_and_names_failures() {
        let scripts = SqlScripts::new();
        let good = scripts.write("schema.sql", "create table t (a int);");
        let bad = scripts.write("broken.sql", "create tabel t;");

        let provider = FakeTransactionProvider::new();
        provider.push_ok();
        provider.push_failure(Error::msg("syntax error at or near \"tabel\""));
        let tx = TxHandle::new(provider.begin().await.expect("begin"));

        tx.exec_files(&[good]).await.expect("script runs");
        let err = tx.exec_file(&bad).await.expect_err("script fails");
        assert!(err.to_string().starts_with("failed to execute"));
        assert!(err.to_string().contains("broken.sql"));
        assert_eq!(
            provider.stats().statements,
            vec![
                "create table t (a int);".to_owned(),
                "create tabel t;".to_owned()
            ]
        );
    }

    #[tokio::test]
    async fn exec_file_reports_missing_files() {
        let provider = FakeTransactionProvider::new();
        let tx = TxHandle::new(provider.begin().await.expect("begin"));
        let err = tx
            .exec_file(Path::new("/definitely/not/here.sql"))
            .await
            .expect_err("missing file");
        assert!(err.to_string().starts_with("failed to read"));
        assert!(provider.stats().statements.is_empty());
    }
}
