//! Structured REST query: what the dispatch layer consumes after HTTP
//! parsing and content decoding have happened elsewhere.

use crate::action::Action;
use crate::filter::Filter;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Column projection entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: String,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Field { name: name.into() }
    }
}

/// Relation to eager-load on a fetch-one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
}

impl Relation {
    pub fn new(name: impl Into<String>) -> Self {
        Relation { name: name.into() }
    }
}

/// One sort criterion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sort {
    pub name: String,
    pub asc: bool,
}

impl Sort {
    pub fn asc(name: impl Into<String>) -> Self {
        Sort {
            name: name.into(),
            asc: true,
        }
    }

    pub fn desc(name: impl Into<String>) -> Self {
        Sort {
            name: name.into(),
            asc: false,
        }
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.asc {
            write!(f, "asc({})", self.name)
        } else {
            write!(f, "desc({})", self.name)
        }
    }
}

/// A REST query against one resource. Content, when present, is the
/// already-decoded JSON body.
#[derive(Clone, Debug)]
pub struct RestQuery {
    pub action: Action,
    pub resource: String,
    pub key: Option<String>,
    pub offset: u32,
    pub limit: u32,
    pub fields: Vec<Field>,
    pub relations: Vec<Relation>,
    pub sorts: Vec<Sort>,
    pub filter: Option<Filter>,
    pub content: Option<Value>,
}

impl RestQuery {
    fn new(action: Action, resource: impl Into<String>) -> Self {
        RestQuery {
            action,
            resource: resource.into(),
            key: None,
            offset: 0,
            limit: 0,
            fields: Vec::new(),
            relations: Vec::new(),
            sorts: Vec::new(),
            filter: None,
            content: None,
        }
    }

    /// Collection read.
    pub fn get(resource: impl Into<String>) -> Self {
        Self::new(Action::Get, resource)
    }

    /// Read by key.
    pub fn get_one(resource: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(Action::Get, resource).with_key(key)
    }

    pub fn post(resource: impl Into<String>, content: Value) -> Self {
        let mut q = Self::new(Action::Post, resource);
        q.content = Some(content);
        q
    }

    pub fn put(resource: impl Into<String>, key: impl Into<String>, content: Value) -> Self {
        let mut q = Self::new(Action::Put, resource).with_key(key);
        q.content = Some(content);
        q
    }

    pub fn patch(resource: impl Into<String>, key: impl Into<String>, content: Value) -> Self {
        let mut q = Self::new(Action::Patch, resource).with_key(key);
        q.content = Some(content);
        q
    }

    pub fn delete(resource: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(Action::Delete, resource).with_key(key)
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(Field::new(name));
        self
    }

    pub fn with_relation(mut self, name: impl Into<String>) -> Self {
        self.relations.push(Relation::new(name));
        self
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}

impl fmt::Display for RestQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<action={} resource={}", self.action, self.resource)?;
        if let Some(key) = &self.key {
            write!(f, " key={key}")?;
        }
        if self.action == Action::Get && self.key.is_none() {
            write!(f, " offset={} limit={}", self.offset, self.limit)?;
            if let Some(filter) = &self.filter {
                write!(f, " filter={filter}")?;
            }
        }
        f.write_str(">")
    }
}

/// One page of a collection read. `count` is the size of the whole
/// filtered set, independent of the pagination window.
#[derive(Clone, Debug, Serialize)]
pub struct Page {
    pub rows: Vec<Value>,
    pub count: u64,
    pub offset: u32,
    pub limit: u32,
}
