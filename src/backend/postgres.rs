//! PostgreSQL backend over an sqlx pool.

use crate::backend::{Backend, Connection};
use crate::sql::BindValue;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgPool, PgRow, Postgres};
use sqlx::PgConnection;

pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        PostgresBackend { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    type Conn = PostgresConnection;

    async fn acquire(&self) -> Result<PostgresConnection, sqlx::Error> {
        Ok(PostgresConnection {
            inner: Some(self.pool.acquire().await?),
            tx_open: false,
        })
    }
}

pub struct PostgresConnection {
    inner: Option<PoolConnection<Postgres>>,
    tx_open: bool,
}

impl PostgresConnection {
    fn conn(&mut self) -> Result<&mut PgConnection, sqlx::Error> {
        self.inner
            .as_mut()
            .map(|c| &mut **c)
            .ok_or(sqlx::Error::PoolClosed)
    }
}

impl Drop for PostgresConnection {
    fn drop(&mut self) {
        if self.tx_open {
            // Cancelled mid-transaction: close the physical connection so
            // the server aborts instead of the pool reusing it.
            if let Some(conn) = self.inner.take() {
                drop(conn.detach());
            }
        }
    }
}

fn bind<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    value: &BindValue,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match value {
        BindValue::Null => query.bind(None::<String>),
        BindValue::Bool(b) => query.bind(*b),
        BindValue::I64(n) => query.bind(*n),
        BindValue::F64(n) => query.bind(*n),
        BindValue::Text(s) => query.bind(s.clone()),
        BindValue::Uuid(u) => query.bind(*u),
        BindValue::Json(v) => query.bind(v.clone()),
    }
}

fn prepared<'q>(
    sql: &'q str,
    params: &[BindValue],
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    let mut query = sqlx::query(sql);
    for p in params {
        query = bind(query, p);
    }
    query
}

#[async_trait]
impl Connection for PostgresConnection {
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

fn row_to_json(row: &PgRow) -> Value {
    use sqlx::{Column, Row};
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    Value::Object(map)
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}
