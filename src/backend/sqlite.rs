//! SQLite backend over an sqlx pool. In-memory databases want a pool
//! capped at one connection so the database outlives individual acquires.

use crate::backend::{Backend, Connection};
use crate::sql::BindValue;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqliteRow};
use sqlx::SqliteConnection as RawSqliteConnection;

pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteBackend { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    type Conn = SqliteConnection;

    async fn acquire(&self) -> Result<SqliteConnection, sqlx::Error> {
        Ok(SqliteConnection {
            inner: Some(self.pool.acquire().await?),
            tx_open: false,
        })
    }
}

pub struct SqliteConnection {
    inner: Option<PoolConnection<Sqlite>>,
    tx_open: bool,
}

impl SqliteConnection {
    fn conn(&mut self) -> Result<&mut RawSqliteConnection, sqlx::Error> {
        self.inner
            .as_mut()
            .map(|c| &mut **c)
            .ok_or(sqlx::Error::PoolClosed)
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if self.tx_open {
            if let Some(conn) = self.inner.take() {
                drop(conn.detach());
            }
        }
    }
}

fn bind<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &BindValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        BindValue::Null => query.bind(None::<String>),
        BindValue::Bool(b) => query.bind(*b),
        BindValue::I64(n) => query.bind(*n),
        BindValue::F64(n) => query.bind(*n),
        BindValue::Text(s) => query.bind(s.clone()),
        BindValue::Uuid(u) => query.bind(u.to_string()),
        BindValue::Json(v) => query.bind(v.clone()),
    }
}

fn prepared<'q>(
    sql: &'q str,
    params: &[BindValue],
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    let mut query = sqlx::query(sql);
    for p in params {
        query = bind(query, p);
    }
    query
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn begin(&mut self) -> Result<(), sqlx::Error> {
        tracing::debug!("begin");
        sqlx::query("BEGIN").execute(self.conn()?).await?;
        self.tx_open = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), sqlx::Error> {
        tracing::debug!("commit");
        sqlx::query("COMMIT").execute(self.conn()?).await?;
        self.tx_open = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        tracing::debug!("rollback");
        sqlx::query("ROLLBACK").execute(self.conn()?).await?;
        self.tx_open = false;
        Ok(())
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), sqlx::Error> {
        tracing::debug!(savepoint = %name, "savepoint");
        sqlx::query(&format!("SAVEPOINT {name}"))
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), sqlx::Error> {
        tracing::debug!(savepoint = %name, "release savepoint");
        sqlx::query(&format!("RELEASE SAVEPOINT {name}"))
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), sqlx::Error> {
        tracing::debug!(savepoint = %name, "rollback to savepoint");
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {name}"))
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[BindValue]) -> Result<Vec<Value>, sqlx::Error> {
        tracing::debug!(sql = %sql, params = ?params, "query");
        let rows = prepared(sql, params).fetch_all(self.conn()?).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[BindValue],
    ) -> Result<Option<Value>, sqlx::Error> {
        tracing::debug!(sql = %sql, params = ?params, "query");
        let row = prepared(sql, params).fetch_optional(self.conn()?).await?;
        Ok(row.as_ref().map(row_to_json))
    }

    async fn fetch_count(&mut self, sql: &str, params: &[BindValue]) -> Result<u64, sqlx::Error> {
        tracing::debug!(sql = %sql, params = ?params, "count query");
        let row = prepared(sql, params).fetch_one(self.conn()?).await?;
        let count: i64 = sqlx::Row::try_get(&row, 0usize)?;
        Ok(count.max(0) as u64)
    }

    async fn execute(&mut self, sql: &str, params: &[BindValue]) -> Result<u64, sqlx::Error> {
        tracing::debug!(sql = %sql, params = ?params, "execute");
        let done = prepared(sql, params).execute(self.conn()?).await?;
        Ok(done.rows_affected())
    }
}

fn row_to_json(row: &SqliteRow) -> Value {
    use sqlx::{Column, Row};
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    Value::Object(map)
}

fn cell_to_value(row: &SqliteRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    Value::Null
}
