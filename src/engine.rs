//! Query dispatch: resolves the resource, gates on permissions, prepares
//! the entity body and key, and hands one CRUD operation to the adapter.

use crate::action::Action;
use crate::backend::Backend;
use crate::error::Error;
use crate::executor::Executor;
use crate::query::{Page, RestQuery};
use crate::resource::{PkType, Registry, Resource};
use crate::sql::BindValue;
use crate::transactional::ExecContext;
use serde::Serialize;
use serde_json::Value;

/// What a dispatched query yields: one entity or one page of a collection.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ExecutionResult {
    Entity(Value),
    Page(Page),
}

impl ExecutionResult {
    pub fn entity(&self) -> Option<&Value> {
        match self {
            ExecutionResult::Entity(v) => Some(v),
            ExecutionResult::Page(_) => None,
        }
    }

    pub fn page(&self) -> Option<&Page> {
        match self {
            ExecutionResult::Entity(_) => None,
            ExecutionResult::Page(p) => Some(p),
        }
    }
}

/// Executes REST queries against registered resources over one backend.
pub struct Engine<B: Backend> {
    backend: B,
    registry: Registry,
}

impl<B: Backend> Engine<B> {
    pub fn new(backend: B, registry: Registry) -> Self {
        Engine { backend, registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Execute one query. Each call acquires its own connection, so
    /// concurrent calls never share transaction state.
    pub async fn execute(&self, query: &RestQuery) -> Result<ExecutionResult, Error> {
        tracing::debug!(query = %query, "executing rest query");
        let resource = self
            .registry
            .get(&query.resource)
            .ok_or_else(|| Error::UnknownResource(query.resource.clone()))?;
        if !resource.permits(query.action) {
            return Err(Error::Forbidden {
                resource: resource.name().to_string(),
                action: query.action,
            });
        }
        let (entity, key) = prepare(resource, query)?;
        if let Some(hook) = resource.before_hook() {
            (hook.as_ref())(query, entity.as_ref())?;
        }

        let conn = self.backend.acquire().await.map_err(Error::from)?;
        let mut ctx = ExecContext::new(conn);
        let mut executor = Executor::new(&self.registry, resource, query, entity, key);
        let outcome = match query.action {
            Action::Get if query.key.is_some() => executor.fetch_one(&mut ctx).await,
            Action::Get => executor.fetch_collection(&mut ctx).await,
            Action::Post => executor.insert(&mut ctx).await,
            Action::Put => executor.update(&mut ctx).await,
            Action::Patch => executor.patch(&mut ctx).await,
            Action::Delete => executor.delete(&mut ctx).await,
        };
        outcome.map_err(|e| annotate(resource, query, e))?;

        if let Some(key) = &query.key {
            if executor.count() == 0 {
                return Err(Error::NotFound {
                    resource: resource.name().to_string(),
                    key: key.clone(),
                });
            }
        }

        let result = if query.action == Action::Get && query.key.is_none() {
            ExecutionResult::Page(Page {
                rows: executor.take_rows(),
                count: executor.count(),
                offset: query.offset,
                limit: query.limit,
            })
        } else {
            ExecutionResult::Entity(executor.take_entity().unwrap_or(Value::Null))
        };
        if let Some(hook) = resource.after_hook() {
            (hook.as_ref())(query, result.entity())?;
        }
        Ok(result)
    }
}

/// Per-action key/content validation and shaping, ahead of execution.
fn prepare(resource: &Resource, query: &RestQuery) -> Result<(Option<Value>, Option<BindValue>), Error> {
    let key = query
        .key
        .as_deref()
        .map(|raw| parse_key(resource, raw))
        .transpose()?;
    match query.action {
        Action::Get => Ok((None, key)),
        Action::Delete => {
            if key.is_none() {
                return Err(Error::BadRequest("action 'Delete': key is mandatory".to_string()));
            }
            Ok((None, key))
        }
        Action::Post => {
            if key.is_some() {
                return Err(Error::BadRequest("action 'Post': key is forbidden".to_string()));
            }
            Ok((Some(object_content(query)?), None))
        }
        Action::Put => {
            let Some(bind) = key else {
                return Err(Error::BadRequest("action 'Put': key is mandatory".to_string()));
            };
            let mut body = object_content(query)?;
            // The path key wins over any pk the body may carry.
            if let (Some(obj), Some(raw)) = (body.as_object_mut(), query.key.as_deref()) {
                obj.insert(resource.pk().to_string(), key_json(resource, raw)?);
            }
            Ok((Some(body), Some(bind)))
        }
        Action::Patch => {
            if key.is_none() {
                return Err(Error::BadRequest("action 'Patch': key is mandatory".to_string()));
            }
            Ok((Some(object_content(query)?), key))
        }
    }
}

fn object_content(query: &RestQuery) -> Result<Value, Error> {
    match &query.content {
        Some(v @ Value::Object(_)) => Ok(v.clone()),
        _ => Err(Error::BadRequest("content must be a JSON object".to_string())),
    }
}

fn parse_key(resource: &Resource, raw: &str) -> Result<BindValue, Error> {
    Ok(match resource.pk_type() {
        PkType::Uuid => {
            let u = uuid::Uuid::parse_str(raw)
                .map_err(|_| Error::BadRequest(format!("invalid uuid key '{raw}'")))?;
            BindValue::Uuid(u)
        }
        PkType::BigInt | PkType::Int => {
            let n: i64 = raw
                .parse()
                .map_err(|_| Error::BadRequest(format!("invalid key '{raw}'")))?;
            BindValue::I64(n)
        }
        PkType::Text => BindValue::Text(raw.to_string()),
    })
}

fn key_json(resource: &Resource, raw: &str) -> Result<Value, Error> {
    Ok(match parse_key(resource, raw)? {
        BindValue::I64(n) => Value::Number(n.into()),
        BindValue::Uuid(u) => Value::String(u.to_string()),
        BindValue::Text(s) => Value::String(s),
        other => {
            return Err(Error::BadRequest(format!(
                "unsupported key binding {other:?}"
            )))
        }
    })
}

fn annotate(resource: &Resource, query: &RestQuery, source: Error) -> Error {
    Error::Execution {
        resource: resource.name().to_string(),
        action: query.action,
        key: query.key.clone(),
        source: Box::new(source),
    }
}
