//! Test utilities for the backend crate.
//!
//! This module provides shared helpers for both unit tests (in `src/`) and
//! integration tests (in `tests/`). It is only compiled when running tests or
//! with the `test-support` feature.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use cap_std::{ambient_authority, fs::Dir};
use serde_json::Value;

use crate::domain::ports::{Row, Transaction, TransactionProvider};
use crate::domain::{Ctx, Error, Statement, TxHandle};

/// Build a row from a JSON object literal.
///
/// # Panics
///
/// When `value` is not an object.
pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("rows must be JSON objects, got {other}"),
    }
}

/// Counters and statements recorded by [`FakeTransactionProvider`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeStats {
    /// Transactions opened.
    pub begun: usize,
    /// Transactions committed.
    pub committed: usize,
    /// Transactions explicitly rolled back.
    pub rolled_back: usize,
    /// Transactions dropped without commit or rollback.
    pub abandoned: usize,
    /// Statement texts in execution order, across all transactions.
    pub statements: Vec<String>,
}

#[derive(Default)]
struct FakeState {
    stats: FakeStats,
    responses: VecDeque<Result<Vec<Row>, Error>>,
    begin_failure: Option<Error>,
    commit_failure: Option<Error>,
}

/// Scripted in-memory transaction provider.
///
/// Each statement consumes the next scripted response; with none left it
/// succeeds with no rows.
///
/// # Examples
/// ```
/// use serde_json::json;
/// use starter::domain::{Ctx, Statement, with_transaction};
/// use starter::test_support::{FakeTransactionProvider, row};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let provider = FakeTransactionProvider::new();
/// provider.push_rows(vec![row(json!({"ok": true}))]);
/// let rows = with_transaction(&provider, &Ctx::background(), |_, tx| async move {
///     Ok(tx.fetch_rows(&Statement::new("select true as ok")).await?)
/// })
/// .await
/// .expect("scripted query");
/// assert_eq!(rows.len(), 1);
/// assert_eq!(provider.stats().committed, 1);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct FakeTransactionProvider {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransactionProvider {
    /// Provider with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake transaction state lock")
    }

    /// Answer the next statement with `rows`.
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.lock().responses.push_back(Ok(rows));
    }

    /// Answer the next statement with no rows.
    pub fn push_ok(&self) {
        self.push_rows(Vec::new());
    }

    /// Fail the next statement with `error`.
    pub fn push_failure(&self, error: Error) {
        self.lock().responses.push_back(Err(error));
    }

    /// Fail the next `begin`.
    pub fn fail_next_begin(&self, error: Error) {
        self.lock().begin_failure = Some(error);
    }

    /// Fail the next `commit`.
    pub fn fail_next_commit(&self, error: Error) {
        self.lock().commit_failure = Some(error);
    }

    /// Snapshot of what happened so far.
    pub fn stats(&self) -> FakeStats {
        self.lock().stats.clone()
    }
}

#[async_trait]
impl TransactionProvider for FakeTransactionProvider {
    async fn begin(&self) -> Result<Box<dyn Transaction>, Error> {
        let mut state = self.lock();
        if let Some(error) = state.begin_failure.take() {
            return Err(error);
        }
        state.stats.begun += 1;
        Ok(Box::new(FakeTransaction {
            state: Arc::clone(&self.state),
            finished: false,
        }))
    }
}

/// Transaction handed out by [`FakeTransactionProvider`].
pub struct FakeTransaction {
    state: Arc<Mutex<FakeState>>,
    finished: bool,
}

impl FakeTransaction {
    fn respond(&self, text: &str) -> Result<Vec<Row>, Error> {
        let mut state = self.state.lock().expect("fake transaction state lock");
        state.stats.statements.push(text.to_owned());
        state.responses.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[async_trait]
impl Transaction for FakeTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<u64, Error> {
        let rows = self.respond(statement.text())?;
        Ok(u64::try_from(rows.len()).unwrap_or(u64::MAX))
    }

    async fn fetch_rows(&mut self, statement: &Statement) -> Result<Vec<Row>, Error> {
        self.respond(statement.text())
    }

    async fn execute_script(&mut self, script: &str) -> Result<(), Error> {
        self.respond(script).map(drop)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), Error> {
        self.finished = true;
        let mut state = self.state.lock().expect("fake transaction state lock");
        if let Some(error) = state.commit_failure.take() {
            state.stats.abandoned += 1;
            return Err(error);
        }
        state.stats.committed += 1;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), Error> {
        self.finished = true;
        self.state
            .lock()
            .expect("fake transaction state lock")
            .stats
            .rolled_back += 1;
        Ok(())
    }
}

impl Drop for FakeTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            state.stats.abandoned += 1;
        }
    }
}

/// Transaction owned by a test rather than by the code under test.
///
/// Code run with [`TestTransaction::ctx`] joins this transaction and never
/// commits it; the test rolls it back at teardown.
pub struct TestTransaction {
    handle: TxHandle,
}

impl TestTransaction {
    /// Open a transaction from `provider`.
    ///
    /// # Errors
    ///
    /// When the provider cannot begin.
    pub async fn begin(provider: &dyn TransactionProvider) -> Result<Self, Error> {
        Ok(Self {
            handle: TxHandle::new(provider.begin().await?),
        })
    }

    /// Shared handle to the transaction.
    pub fn handle(&self) -> TxHandle {
        self.handle.clone()
    }

    /// Background context carrying the transaction.
    pub fn ctx(&self) -> Ctx {
        Ctx::background().with_transaction(self.handle())
    }

    /// Roll the transaction back.
    ///
    /// # Errors
    ///
    /// When the transaction already ended or the rollback fails.
    pub async fn rollback(self) -> Result<(), Error> {
        self.handle.rollback().await
    }
}

/// Temporary directory of SQL scripts.
pub struct SqlScripts {
    dir: tempfile::TempDir,
}

impl SqlScripts {
    /// Fresh empty directory.
    ///
    /// # Panics
    ///
    /// When the directory cannot be created.
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temporary script directory"),
        }
    }

    /// Write `contents` to `name` and return its path.
    ///
    /// # Panics
    ///
    /// When the file cannot be written.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let directory =
            Dir::open_ambient_dir(self.dir.path(), ambient_authority()).expect("open script dir");
        directory
            .write(Path::new(name), contents.as_bytes())
            .expect("write script");
        self.dir.path().join(name)
    }
}

impl Default for SqlScripts {
    fn default() -> Self {
        Self::new()
    }
}
