//! The relational execution engine seam: transaction-control primitives
//! and parameterized statement execution returning dynamic JSON rows.
//!
//! Two implementations ship: PostgreSQL and SQLite. Both speak the same
//! generated SQL (`$n` placeholders, quoted identifiers) and both guard
//! against a call chain being cancelled mid-transaction: a connection
//! dropped with a transaction open detaches from its pool and closes, so
//! the server aborts the transaction instead of ever committing it.

mod postgres;
mod sqlite;

pub use postgres::{PostgresBackend, PostgresConnection};
pub use sqlite::{SqliteBackend, SqliteConnection};

use crate::sql::BindValue;
use async_trait::async_trait;
use serde_json::Value;

/// A single database connection, exclusively owned by one logical call
/// chain for its lifetime.
#[async_trait]
pub trait Connection: Send {
    async fn begin(&mut self) -> Result<(), sqlx::Error>;
    async fn commit(&mut self) -> Result<(), sqlx::Error>;
    async fn rollback(&mut self) -> Result<(), sqlx::Error>;
    async fn savepoint(&mut self, name: &str) -> Result<(), sqlx::Error>;
    async fn release_savepoint(&mut self, name: &str) -> Result<(), sqlx::Error>;
    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), sqlx::Error>;

    /// Run a parameterized query; each row becomes a JSON object.
    async fn fetch_all(&mut self, sql: &str, params: &[BindValue]) -> Result<Vec<Value>, sqlx::Error>;
    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[BindValue],
    ) -> Result<Option<Value>, sqlx::Error>;
    /// Run a single-scalar query such as `SELECT COUNT(*) ...`.
    async fn fetch_count(&mut self, sql: &str, params: &[BindValue]) -> Result<u64, sqlx::Error>;
    /// Run a statement and return the affected-row count.
    async fn execute(&mut self, sql: &str, params: &[BindValue]) -> Result<u64, sqlx::Error>;
}

/// Hands out connections, one per call chain.
#[async_trait]
pub trait Backend: Send + Sync {
    type Conn: Connection;

    async fn acquire(&self) -> Result<Self::Conn, sqlx::Error>;
}
