//! Propagation semantics against an in-memory SQLite database: joining,
//! owning and savepointing transactions, and what survives a failure at
//! each nesting level.
//!
//! The pool is capped at one connection so the in-memory database outlives
//! individual acquires; contexts are dropped before row counts are taken.

use async_trait::async_trait;
use sqlbridge::backend::SqliteConnection;
use sqlbridge::sql::BindValue;
use sqlbridge::{
    run, run_with_propagation, Backend, Connection, Error, ExecContext, Propagation, SqliteBackend,
    UnitOfWork,
};

async fn backend() -> SqliteBackend {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory database");
    sqlx::query("CREATE TABLE todos (id INTEGER PRIMARY KEY AUTOINCREMENT, text TEXT NOT NULL)")
        .execute(&pool)
        .await
        .expect("create todos");
    SqliteBackend::new(pool)
}

async fn fresh_ctx(backend: &SqliteBackend) -> ExecContext<SqliteConnection> {
    ExecContext::new(backend.acquire().await.expect("acquire connection"))
}

async fn todo_count(backend: &SqliteBackend) -> u64 {
    let mut conn = backend.acquire().await.expect("acquire connection");
    conn.fetch_count("SELECT COUNT(*) FROM todos", &[])
        .await
        .expect("count todos")
}

/// Inserts one row, then optionally fails.
struct Insert {
    text: &'static str,
    fail: bool,
}

impl Insert {
    fn ok(text: &'static str) -> Self {
        Insert { text, fail: false }
    }

    fn failing(text: &'static str) -> Self {
        Insert { text, fail: true }
    }
}

#[async_trait]
impl<C: Connection> UnitOfWork<C> for Insert {
    async fn work(&mut self, ctx: &mut ExecContext<C>) -> Result<(), Error> {
        ctx.conn()?
            .execute(
                "INSERT INTO todos (text) VALUES ($1)",
                &[BindValue::Text(self.text.to_string())],
            )
            .await?;
        if self.fail {
            return Err(Error::BadRequest("boom".to_string()));
        }
        Ok(())
    }
}

/// Inserts one row, nests an inner unit under the given mode, then either
/// propagates or swallows the inner outcome, then optionally fails itself.
struct Nested {
    text: &'static str,
    mode: Propagation,
    inner: Insert,
    swallow_inner: bool,
    fail_after: bool,
    inner_failed: bool,
}

impl Nested {
    fn new(text: &'static str, mode: Propagation, inner: Insert) -> Self {
        Nested {
            text,
            mode,
            inner,
            swallow_inner: false,
            fail_after: false,
            inner_failed: false,
        }
    }

    fn swallowing(mut self) -> Self {
        self.swallow_inner = true;
        self
    }

    fn failing_after(mut self) -> Self {
        self.fail_after = true;
        self
    }
}

#[async_trait]
impl<C: Connection> UnitOfWork<C> for Nested {
    async fn work(&mut self, ctx: &mut ExecContext<C>) -> Result<(), Error> {
        ctx.conn()?
            .execute(
                "INSERT INTO todos (text) VALUES ($1)",
                &[BindValue::Text(self.text.to_string())],
            )
            .await?;
        let result = run_with_propagation(ctx, self.mode, &mut self.inner).await;
        if self.swallow_inner {
            self.inner_failed = result.is_err();
        } else {
            result?;
        }
        if self.fail_after {
            return Err(Error::BadRequest("outer boom".to_string()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn current_commits_on_success() {
    let backend = backend().await;
    let mut ctx = fresh_ctx(&backend).await;
    run(&mut ctx, &mut Insert::ok("ok")).await.expect("commit");
    drop(ctx);
    assert_eq!(todo_count(&backend).await, 1);
}

#[tokio::test]
async fn current_rolls_back_on_failure() {
    let backend = backend().await;
    let mut ctx = fresh_ctx(&backend).await;
    assert!(run(&mut ctx, &mut Insert::failing("ko")).await.is_err());
    drop(ctx);
    assert_eq!(todo_count(&backend).await, 0);
}

#[tokio::test]
async fn nested_current_shares_one_transaction() {
    let backend = backend().await;
    let mut ctx = fresh_ctx(&backend).await;
    let mut unit = Nested::new("outer", Propagation::Current, Insert::ok("inner"));
    run(&mut ctx, &mut unit).await.expect("commit both");
    drop(ctx);
    assert_eq!(todo_count(&backend).await, 2);
}

#[tokio::test]
async fn inner_current_failure_rolls_back_outer_writes() {
    let backend = backend().await;
    let mut ctx = fresh_ctx(&backend).await;
    let mut unit = Nested::new("outer", Propagation::Current, Insert::failing("inner"));
    assert!(run(&mut ctx, &mut unit).await.is_err());
    drop(ctx);
    assert_eq!(todo_count(&backend).await, 0);
}

#[tokio::test]
async fn joiner_writes_are_undone_when_owner_fails() {
    let backend = backend().await;
    let mut ctx = fresh_ctx(&backend).await;
    let mut unit =
        Nested::new("outer", Propagation::Current, Insert::ok("inner")).failing_after();
    assert!(run(&mut ctx, &mut unit).await.is_err());
    drop(ctx);
    assert_eq!(todo_count(&backend).await, 0);
}

#[tokio::test]
async fn mandatory_without_transaction_fails_without_side_effects() {
    let backend = backend().await;

    let mut ctx = fresh_ctx(&backend).await;
    let err = run_with_propagation(&mut ctx, Propagation::Mandatory, &mut Insert::ok("never"))
        .await
        .expect_err("mandatory outside transaction");
    assert!(matches!(err, Error::NoActiveTransaction));
    drop(ctx);
    assert_eq!(todo_count(&backend).await, 0);

    // Repeating yields the same error and still no side effects.
    let mut ctx = fresh_ctx(&backend).await;
    let err = run_with_propagation(&mut ctx, Propagation::Mandatory, &mut Insert::ok("never"))
        .await
        .expect_err("mandatory outside transaction, again");
    assert!(matches!(err, Error::NoActiveTransaction));
    drop(ctx);
    assert_eq!(todo_count(&backend).await, 0);
}

#[tokio::test]
async fn mandatory_joins_existing_transaction() {
    let backend = backend().await;
    let mut ctx = fresh_ctx(&backend).await;
    let mut unit = Nested::new("outer", Propagation::Mandatory, Insert::ok("inner"));
    run(&mut ctx, &mut unit).await.expect("commit both");
    drop(ctx);
    assert_eq!(todo_count(&backend).await, 2);
}

#[tokio::test]
async fn savepoint_without_transaction_owns_one() {
    let backend = backend().await;
    let mut ctx = fresh_ctx(&backend).await;
    run_with_propagation(&mut ctx, Propagation::Savepoint, &mut Insert::ok("ok"))
        .await
        .expect("commit");
    drop(ctx);
    assert_eq!(todo_count(&backend).await, 1);
}

#[tokio::test]
async fn savepoint_without_transaction_rolls_back_on_failure() {
    let backend = backend().await;
    let mut ctx = fresh_ctx(&backend).await;
    let outcome =
        run_with_propagation(&mut ctx, Propagation::Savepoint, &mut Insert::failing("ko")).await;
    assert!(outcome.is_err());
    drop(ctx);
    assert_eq!(todo_count(&backend).await, 0);
}

#[tokio::test]
async fn failed_savepoint_undoes_only_nested_writes() {
    let backend = backend().await;
    let mut ctx = fresh_ctx(&backend).await;
    // Outer inserts one row; the nested savepoint inserts then fails. The
    // outer unit observes the error, continues, and commits: 1 row, not 0
    // and not 2.
    let mut unit =
        Nested::new("outer", Propagation::Savepoint, Insert::failing("inner")).swallowing();
    run(&mut ctx, &mut unit).await.expect("outer commit");
    assert!(unit.inner_failed);
    drop(ctx);
    assert_eq!(todo_count(&backend).await, 1);
}

#[tokio::test]
async fn released_savepoint_commits_with_outer() {
    let backend = backend().await;
    let mut ctx = fresh_ctx(&backend).await;
    let mut unit = Nested::new("outer", Propagation::Savepoint, Insert::ok("inner"));
    run(&mut ctx, &mut unit).await.expect("commit both");
    drop(ctx);
    assert_eq!(todo_count(&backend).await, 2);
}

#[tokio::test]
async fn released_savepoint_is_undone_when_owner_fails() {
    let backend = backend().await;
    let mut ctx = fresh_ctx(&backend).await;
    let mut unit =
        Nested::new("outer", Propagation::Savepoint, Insert::ok("inner")).failing_after();
    assert!(run(&mut ctx, &mut unit).await.is_err());
    drop(ctx);
    assert_eq!(todo_count(&backend).await, 0);
}

#[tokio::test]
async fn savepoint_nests_inside_savepoint() {
    let backend = backend().await;
    let mut ctx = fresh_ctx(&backend).await;
    let mut unit =
        Nested::new("outer", Propagation::Savepoint, Insert::failing("inner")).swallowing();
    run_with_propagation(&mut ctx, Propagation::Savepoint, &mut unit)
        .await
        .expect("outer savepoint commits");
    assert!(unit.inner_failed);
    drop(ctx);
    assert_eq!(todo_count(&backend).await, 1);
}

#[tokio::test]
async fn savepoint_ok_inside_savepoint_keeps_both() {
    let backend = backend().await;
    let mut ctx = fresh_ctx(&backend).await;
    let mut unit = Nested::new("outer", Propagation::Savepoint, Insert::ok("inner"));
    run_with_propagation(&mut ctx, Propagation::Savepoint, &mut unit)
        .await
        .expect("commit both");
    drop(ctx);
    assert_eq!(todo_count(&backend).await, 2);
}

#[tokio::test]
async fn detached_context_is_a_configuration_error() {
    let mut ctx: ExecContext<SqliteConnection> = ExecContext::detached();
    let err = run(&mut ctx, &mut Insert::ok("never"))
        .await
        .expect_err("no database reachable");
    assert!(matches!(err, Error::Configuration(_)));
}

#[tokio::test]
async fn unit_error_is_returned_unchanged_after_rollback() {
    let backend = backend().await;
    let mut ctx = fresh_ctx(&backend).await;
    let err = run(&mut ctx, &mut Insert::failing("ko"))
        .await
        .expect_err("unit failed");
    match err {
        Error::BadRequest(msg) => assert_eq!(msg, "boom"),
        other => panic!("unit error was replaced: {other}"),
    }
}
