//! Resource shapes and the registry resolving resource names to them.
//!
//! A `Resource` is the explicit capability description of one entity:
//! table, primary key, columns, relations, permitted actions. It replaces
//! runtime type inspection: every resource is registered up front.

use crate::action::{Action, ActionSet};
use crate::error::Error;
use crate::query::RestQuery;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Primary key type for parsing path keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkType {
    Uuid,
    BigInt,
    Int,
    Text,
}

#[derive(Clone, Debug)]
pub struct Column {
    pub name: String,
    /// Whether the column has a database-side default; such columns are
    /// omitted from inserts when the body does not provide a value.
    pub has_default: bool,
}

/// Direction of a relation: to_one (we hold the foreign key) or to_many
/// (the related rows hold a key pointing at us).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationKind {
    ToOne,
    ToMany,
}

#[derive(Clone, Debug)]
pub struct RelationSpec {
    /// Name used in `RestQuery::relations`.
    pub name: String,
    pub kind: RelationKind,
    /// Registered name of the related resource.
    pub resource: String,
    /// Our column used in the join.
    pub our_key: String,
    /// Their column used in the join.
    pub their_key: String,
}

/// Callback invoked around execution; receives the query and the entity
/// body (writes) or result (after hooks).
pub type Hook = Arc<dyn Fn(&RestQuery, Option<&Value>) -> Result<(), Error> + Send + Sync>;

#[derive(Clone)]
pub struct Resource {
    name: String,
    table: String,
    pk: String,
    pk_type: PkType,
    columns: Vec<Column>,
    relations: Vec<RelationSpec>,
    actions: ActionSet,
    before_hook: Option<Hook>,
    after_hook: Option<Hook>,
}

impl Resource {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        pk: impl Into<String>,
        pk_type: PkType,
    ) -> Self {
        let pk = pk.into();
        Resource {
            name: name.into(),
            table: table.into(),
            pk: pk.clone(),
            pk_type,
            // The pk is always a column; marked defaulted so inserts only
            // carry it when the body supplies a value.
            columns: vec![Column {
                name: pk,
                has_default: true,
            }],
            relations: Vec::new(),
            actions: ActionSet::ALL,
            before_hook: None,
            after_hook: None,
        }
    }

    pub fn with_column(mut self, name: impl Into<String>) -> Self {
        self.columns.push(Column {
            name: name.into(),
            has_default: false,
        });
        self
    }

    pub fn with_defaulted_column(mut self, name: impl Into<String>) -> Self {
        self.columns.push(Column {
            name: name.into(),
            has_default: true,
        });
        self
    }

    pub fn with_actions(mut self, actions: ActionSet) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_relation(mut self, relation: RelationSpec) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn with_before_hook(mut self, hook: Hook) -> Self {
        self.before_hook = Some(hook);
        self
    }

    pub fn with_after_hook(mut self, hook: Hook) -> Self {
        self.after_hook = Some(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn pk(&self) -> &str {
        &self.pk
    }

    pub fn pk_type(&self) -> PkType {
        self.pk_type
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> HashSet<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn relations(&self) -> &[RelationSpec] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&RelationSpec> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn actions(&self) -> ActionSet {
        self.actions
    }

    pub fn permits(&self, action: Action) -> bool {
        self.actions.allows(action)
    }

    pub fn before_hook(&self) -> Option<&Hook> {
        self.before_hook.as_ref()
    }

    pub fn after_hook(&self) -> Option<&Hook> {
        self.after_hook.as_ref()
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("pk", &self.pk)
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

/// Resolves resource names to registered shapes.
#[derive(Debug, Default)]
pub struct Registry {
    resources: HashMap<String, Resource>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: Resource) {
        self.resources.insert(resource.name.clone(), resource);
    }

    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lookup() {
        let mut registry = Registry::new();
        registry.register(
            Resource::new("todos", "todos", "id", PkType::BigInt).with_column("title"),
        );
        let r = registry.get("todos").expect("registered");
        assert_eq!(r.table(), "todos");
        assert!(r.has_column("title"));
        assert!(r.has_column("id"));
        assert!(registry.get("nope").is_none());
    }
}
