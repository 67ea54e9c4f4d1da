//! Execution Adapter: one CRUD operation as a unit of work.
//!
//! Each of the five operations runs under `Current` propagation, so a
//! caller that wraps several adapter calls in one outer unit of work gets
//! them composed into a single transaction for free.

use crate::backend::Connection;
use crate::error::Error;
use crate::filter::GroupOp;
use crate::query::RestQuery;
use crate::resource::{Registry, RelationKind, Resource};
use crate::sql::{self, apply_filter, BindValue, SelectBuilder};
use crate::transactional::{self, ExecContext, UnitOfWork};
use async_trait::async_trait;
use serde_json::Value;

#[derive(Clone, Copy, Debug)]
enum CrudOp {
    FetchOne,
    FetchCollection,
    Insert,
    Update,
    Delete,
    Patch,
}

/// Executes one `RestQuery` against its resource. Results accumulate on
/// the executor itself: `entity`/`rows` and the matched `count`.
pub struct Executor<'a> {
    registry: &'a Registry,
    resource: &'a Resource,
    query: &'a RestQuery,
    op: CrudOp,
    entity: Option<Value>,
    rows: Vec<Value>,
    count: u64,
    key: Option<BindValue>,
}

impl<'a> Executor<'a> {
    pub fn new(
        registry: &'a Registry,
        resource: &'a Resource,
        query: &'a RestQuery,
        entity: Option<Value>,
        key: Option<BindValue>,
    ) -> Self {
        Executor {
            registry,
            resource,
            query,
            op: CrudOp::FetchOne,
            entity,
            rows: Vec::new(),
            count: 0,
            key,
        }
    }

    /// Select by primary key with projection and relation eager-loading.
    /// Records a found-row count of 0 or 1.
    pub async fn fetch_one<C: Connection>(&mut self, ctx: &mut ExecContext<C>) -> Result<(), Error> {
        self.op = CrudOp::FetchOne;
        transactional::run(ctx, self).await
    }

    /// Select a page with filter, sorts and pagination; records the total
    /// count of the filtered set alongside the returned rows.
    pub async fn fetch_collection<C: Connection>(
        &mut self,
        ctx: &mut ExecContext<C>,
    ) -> Result<(), Error> {
        self.op = CrudOp::FetchCollection;
        transactional::run(ctx, self).await
    }

    pub async fn insert<C: Connection>(&mut self, ctx: &mut ExecContext<C>) -> Result<(), Error> {
        self.op = CrudOp::Insert;
        transactional::run(ctx, self).await
    }

    pub async fn update<C: Connection>(&mut self, ctx: &mut ExecContext<C>) -> Result<(), Error> {
        self.op = CrudOp::Update;
        transactional::run(ctx, self).await
    }

    pub async fn delete<C: Connection>(&mut self, ctx: &mut ExecContext<C>) -> Result<(), Error> {
        self.op = CrudOp::Delete;
        transactional::run(ctx, self).await
    }

    /// Fetch, merge the patch body over the stored row, update. One unit
    /// of work, so the read and the write share a transaction.
    pub async fn patch<C: Connection>(&mut self, ctx: &mut ExecContext<C>) -> Result<(), Error> {
        self.op = CrudOp::Patch;
        transactional::run(ctx, self).await
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn entity(&self) -> Option<&Value> {
        self.entity.as_ref()
    }

    pub fn take_entity(&mut self) -> Option<Value> {
        self.entity.take()
    }

    pub fn rows(&self) -> &[Value] {
        &self.rows
    }

    pub fn take_rows(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.rows)
    }

    fn required_key(&self) -> Result<BindValue, Error> {
        self.key
            .clone()
            .ok_or_else(|| Error::BadRequest("key is mandatory".to_string()))
    }

    fn body(&self) -> Result<&serde_json::Map<String, Value>, Error> {
        match &self.entity {
            Some(Value::Object(map)) => Ok(map),
            _ => Err(Error::BadRequest("content must be a JSON object".to_string())),
        }
    }

    /// Resolve the projection: the requested fields (validated against the
    /// resource) or all columns. When relations will be loaded, their
    /// local join keys are added so eager loading cannot be starved.
    fn projection(&self, include_relation_keys: bool) -> Result<Vec<String>, Error> {
        let columns = self.resource.column_names();
        let mut fields: Vec<String> = if self.query.fields.is_empty() {
            self.resource
                .columns()
                .iter()
                .map(|c| c.name.clone())
                .collect()
        } else {
            let mut out = Vec::with_capacity(self.query.fields.len());
            for f in &self.query.fields {
                if !columns.contains(f.name.as_str()) {
                    return Err(Error::BadRequest(format!("unknown field '{}'", f.name)));
                }
                out.push(f.name.clone());
            }
            out
        };
        if include_relation_keys {
            for rel in &self.query.relations {
                if let Some(spec) = self.resource.relation(&rel.name) {
                    if !fields.iter().any(|f| f == &spec.our_key) {
                        fields.push(spec.our_key.clone());
                    }
                }
            }
        }
        Ok(fields)
    }

    async fn exec_fetch_one<C: Connection>(&mut self, ctx: &mut ExecContext<C>) -> Result<(), Error> {
        let key = self.required_key()?;
        let fields = self.projection(true)?;
        let q = sql::select_by_pk(self.resource, &fields, key);
        let row = ctx.conn()?.fetch_optional(&q.sql, &q.params).await?;
        match row {
            Some(mut row) => {
                self.load_relations(ctx, &mut row).await?;
                self.count = 1;
                self.entity = Some(row);
            }
            None => {
                self.count = 0;
                self.entity = None;
            }
        }
        Ok(())
    }

    async fn load_relations<C: Connection>(
        &self,
        ctx: &mut ExecContext<C>,
        row: &mut Value,
    ) -> Result<(), Error> {
        for rel in &self.query.relations {
            let spec = self.resource.relation(&rel.name).ok_or_else(|| {
                Error::BadRequest(format!(
                    "unknown relation '{}' for resource '{}'",
                    rel.name,
                    self.resource.name()
                ))
            })?;
            let related = self
                .registry
                .get(&spec.resource)
                .ok_or_else(|| Error::UnknownResource(spec.resource.clone()))?;
            let our_value = row.get(spec.our_key.as_str()).cloned().unwrap_or(Value::Null);
            let loaded = if our_value.is_null() {
                match spec.kind {
                    RelationKind::ToOne => Value::Null,
                    RelationKind::ToMany => Value::Array(Vec::new()),
                }
            } else {
                let fields: Vec<String> =
                    related.columns().iter().map(|c| c.name.clone()).collect();
                let q = sql::select_by_column(
                    related,
                    &fields,
                    &spec.their_key,
                    BindValue::from_json(&our_value),
                );
                let rows = ctx.conn()?.fetch_all(&q.sql, &q.params).await?;
                match spec.kind {
                    RelationKind::ToOne => rows.into_iter().next().unwrap_or(Value::Null),
                    RelationKind::ToMany => Value::Array(rows),
                }
            };
            if let Some(obj) = row.as_object_mut() {
                obj.insert(spec.name.clone(), loaded);
            }
        }
        Ok(())
    }

    async fn exec_fetch_collection<C: Connection>(
        &mut self,
        ctx: &mut ExecContext<C>,
    ) -> Result<(), Error> {
        let fields = self.projection(false)?;
        let columns = self.resource.column_names();
        if let Some(filter) = &self.query.filter {
            filter.validate(&columns)?;
        }
        for sort in &self.query.sorts {
            if !columns.contains(sort.name.as_str()) {
                return Err(Error::BadRequest(format!(
                    "unknown sort attribute '{}'",
                    sort.name
                )));
            }
        }

        let mut builder = SelectBuilder::new(self.resource.table());
        for field in &fields {
            builder.column(field);
        }
        apply_filter(&mut builder, self.query.filter.as_ref(), GroupOp::And);
        for sort in &self.query.sorts {
            builder.order(&sort.name, sort.asc);
        }
        if self.query.limit > 0 {
            builder.limit(self.query.limit);
        }
        if self.query.offset > 0 {
            builder.offset(self.query.offset);
        }

        let page = builder.build();
        let rows = ctx.conn()?.fetch_all(&page.sql, &page.params).await?;
        let count_q = builder.build_count();
        let total = ctx.conn()?.fetch_count(&count_q.sql, &count_q.params).await?;
        self.rows = rows;
        self.count = total;
        Ok(())
    }

    async fn exec_insert<C: Connection>(&mut self, ctx: &mut ExecContext<C>) -> Result<(), Error> {
        let q = sql::insert(self.resource, self.body()?);
        let row = ctx.conn()?.fetch_optional(&q.sql, &q.params).await?;
        let row = row.ok_or_else(|| Error::Statement(sqlx::Error::RowNotFound))?;
        self.entity = Some(row);
        self.count = 1;
        Ok(())
    }

    async fn exec_update<C: Connection>(&mut self, ctx: &mut ExecContext<C>) -> Result<(), Error> {
        let key = self.required_key()?;
        let q = sql::update_by_pk(self.resource, self.body()?, key);
        let row = ctx.conn()?.fetch_optional(&q.sql, &q.params).await?;
        match row {
            Some(row) => {
                self.entity = Some(row);
                self.count = 1;
            }
            None => {
                self.entity = None;
                self.count = 0;
            }
        }
        Ok(())
    }

    async fn exec_delete<C: Connection>(&mut self, ctx: &mut ExecContext<C>) -> Result<(), Error> {
        let key = self.required_key()?;
        let q = sql::delete_by_pk(self.resource, key);
        let row = ctx.conn()?.fetch_optional(&q.sql, &q.params).await?;
        match row {
            Some(row) => {
                self.entity = Some(row);
                self.count = 1;
            }
            None => {
                self.entity = None;
                self.count = 0;
            }
        }
        Ok(())
    }

    async fn exec_patch<C: Connection>(&mut self, ctx: &mut ExecContext<C>) -> Result<(), Error> {
        let patch = match self.entity.take() {
            Some(Value::Object(map)) => map,
            _ => return Err(Error::BadRequest("content must be a JSON object".to_string())),
        };
        self.exec_fetch_one(ctx).await?;
        let Some(Value::Object(mut current)) = self.entity.take() else {
            self.count = 0;
            return Ok(());
        };
        for (k, v) in patch {
            if k != self.resource.pk() {
                current.insert(k, v);
            }
        }
        self.entity = Some(Value::Object(current));
        self.exec_update(ctx).await
    }
}

#[async_trait]
impl<'a, C: Connection> UnitOfWork<C> for Executor<'a> {
    async fn work(&mut self, ctx: &mut ExecContext<C>) -> Result<(), Error> {
        match self.op {
            CrudOp::FetchOne => self.exec_fetch_one(ctx).await,
            CrudOp::FetchCollection => self.exec_fetch_collection(ctx).await,
            CrudOp::Insert => self.exec_insert(ctx).await,
            CrudOp::Update => self.exec_update(ctx).await,
            CrudOp::Delete => self.exec_delete(ctx).await,
            CrudOp::Patch => self.exec_patch(ctx).await,
        }
    }
}
