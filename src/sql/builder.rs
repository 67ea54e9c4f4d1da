//! Parameterized SELECT, INSERT, UPDATE, DELETE from registered resources.
//! Identifiers are always quoted; values always bind as `$n` parameters.

use crate::resource::Resource;
use crate::sql::params::BindValue;
use serde_json::{Map, Value};

/// Quote an identifier (column or table name).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// A finished statement with its parameters in placeholder order.
#[derive(Clone, Debug)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<BindValue>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: BindValue) -> usize {
        self.params.push(v);
        self.params.len()
    }
}

/// Incrementally built SELECT over one table: projection, a nestable
/// predicate, sorts, pagination. `build_count` renders the companion
/// `COUNT(*)` sharing the same predicate and parameters.
pub struct SelectBuilder {
    table: String,
    columns: Vec<String>,
    predicate: String,
    params: Vec<BindValue>,
    sorts: Vec<String>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl SelectBuilder {
    pub fn new(table: &str) -> Self {
        SelectBuilder {
            table: quoted(table),
            columns: Vec::new(),
            predicate: String::new(),
            params: Vec::new(),
            sorts: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn column(&mut self, name: &str) -> &mut Self {
        self.columns.push(quoted(name));
        self
    }

    pub fn order(&mut self, name: &str, asc: bool) -> &mut Self {
        let dir = if asc { "ASC" } else { "DESC" };
        self.sorts.push(format!("{} {}", quoted(name), dir));
        self
    }

    pub fn limit(&mut self, n: u32) -> &mut Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(&mut self, n: u32) -> &mut Self {
        self.offset = Some(n);
        self
    }

    /// Register a parameter and return its 1-based placeholder number.
    pub fn push_param(&mut self, v: BindValue) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Append a rendered predicate fragment at the current nesting level,
    /// joined with OR or AND against any fragment already there.
    pub fn where_fragment(&mut self, fragment: String, or: bool) {
        if self.predicate.is_empty() {
            self.predicate = fragment;
        } else {
            self.predicate.push_str(if or { " OR " } else { " AND " });
            self.predicate.push_str(&fragment);
        }
    }

    /// Collect everything `f` appends into one parenthesized group and
    /// append it at the current level. A group that renders nothing is
    /// dropped so it cannot corrupt the enclosing predicate.
    pub fn where_group(&mut self, or: bool, f: impl FnOnce(&mut SelectBuilder)) {
        let enclosing = std::mem::take(&mut self.predicate);
        f(self);
        let inner = std::mem::replace(&mut self.predicate, enclosing);
        if inner.is_empty() {
            return;
        }
        self.where_fragment(format!("({inner})"), or);
    }

    fn where_clause(&self) -> String {
        if self.predicate.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.predicate)
        }
    }

    pub fn build(&self) -> QueryBuf {
        let cols = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        };
        let order = if self.sorts.is_empty() {
            String::new()
        } else {
            format!(" ORDER BY {}", self.sorts.join(", "))
        };
        let limit = self
            .limit
            .map(|n| format!(" LIMIT {n}"))
            .unwrap_or_default();
        let offset = self
            .offset
            .map(|n| format!(" OFFSET {n}"))
            .unwrap_or_default();
        QueryBuf {
            sql: format!(
                "SELECT {} FROM {}{}{}{}{}",
                cols,
                self.table,
                self.where_clause(),
                order,
                limit,
                offset
            ),
            params: self.params.clone(),
        }
    }

    pub fn build_count(&self) -> QueryBuf {
        QueryBuf {
            sql: format!("SELECT COUNT(*) FROM {}{}", self.table, self.where_clause()),
            params: self.params.clone(),
        }
    }
}

/// SELECT by primary key with an explicit projection.
pub fn select_by_pk(resource: &Resource, fields: &[String], key: BindValue) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(key);
    let cols = fields
        .iter()
        .map(|f| quoted(f))
        .collect::<Vec<_>>()
        .join(", ");
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = ${}",
        cols,
        quoted(resource.table()),
        quoted(resource.pk()),
        n
    );
    q
}

/// SELECT rows whose `column` equals `value`, used for batch-loading
/// related rows.
pub fn select_by_column(resource: &Resource, fields: &[String], column: &str, value: BindValue) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(value);
    let cols = fields
        .iter()
        .map(|f| quoted(f))
        .collect::<Vec<_>>()
        .join(", ");
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = ${} ORDER BY {}",
        cols,
        quoted(resource.table()),
        quoted(column),
        n,
        quoted(resource.pk())
    );
    q
}

/// INSERT from the entity body. Columns with a database default are
/// omitted when the body does not provide a value, so the default applies;
/// the generated row flows back via RETURNING.
pub fn insert(resource: &Resource, body: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in resource.columns() {
        let val = body.get(&c.name);
        if val.is_none() && c.has_default {
            continue;
        }
        let bound = val.map(BindValue::from_json).unwrap_or(BindValue::Null);
        let n = q.push_param(bound);
        cols.push(quoted(&c.name));
        placeholders.push(format!("${n}"));
    }
    let returning = all_columns(resource);
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        quoted(resource.table()),
        cols.join(", "),
        placeholders.join(", "),
        returning
    );
    q
}

/// UPDATE by primary key: SET only columns present in the body, in
/// registry column order. The key is always the last parameter.
pub fn update_by_pk(resource: &Resource, body: &Map<String, Value>, key: BindValue) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for c in resource.columns() {
        if c.name == resource.pk() {
            continue;
        }
        let Some(val) = body.get(&c.name) else {
            continue;
        };
        let n = q.push_param(BindValue::from_json(val));
        sets.push(format!("{} = ${}", quoted(&c.name), n));
    }
    let returning = all_columns(resource);
    if sets.is_empty() {
        // Nothing to change; degrade to the pk lookup so the caller still
        // observes whether the row exists.
        let n = q.push_param(key);
        q.sql = format!(
            "SELECT {} FROM {} WHERE {} = ${}",
            returning,
            quoted(resource.table()),
            quoted(resource.pk()),
            n
        );
        return q;
    }
    let n = q.push_param(key);
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = ${} RETURNING {}",
        quoted(resource.table()),
        sets.join(", "),
        quoted(resource.pk()),
        n,
        returning
    );
    q
}

/// DELETE by primary key, returning the deleted row.
pub fn delete_by_pk(resource: &Resource, key: BindValue) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(key);
    q.sql = format!(
        "DELETE FROM {} WHERE {} = ${} RETURNING {}",
        quoted(resource.table()),
        quoted(resource.pk()),
        n,
        all_columns(resource)
    );
    q
}

fn all_columns(resource: &Resource) -> String {
    resource
        .columns()
        .iter()
        .map(|c| quoted(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::PkType;
    use serde_json::json;

    fn todos() -> Resource {
        Resource::new("todos", "todos", "id", PkType::BigInt)
            .with_column("title")
            .with_column("done")
    }

    #[test]
    fn select_with_predicate_and_pagination() {
        let mut b = SelectBuilder::new("todos");
        b.column("id").column("title");
        let n = b.push_param(BindValue::Bool(false));
        b.where_fragment(format!("{} = ${}", quoted("done"), n), false);
        b.order("title", true).limit(10).offset(5);
        let q = b.build();
        assert_eq!(
            q.sql,
            "SELECT \"id\", \"title\" FROM \"todos\" WHERE \"done\" = $1 \
             ORDER BY \"title\" ASC LIMIT 10 OFFSET 5"
        );
        assert_eq!(q.params, vec![BindValue::Bool(false)]);

        let count = b.build_count();
        assert_eq!(count.sql, "SELECT COUNT(*) FROM \"todos\" WHERE \"done\" = $1");
        assert_eq!(count.params, q.params);
    }

    #[test]
    fn empty_group_is_dropped() {
        let mut b = SelectBuilder::new("todos");
        let n = b.push_param(BindValue::I64(1));
        b.where_fragment(format!("{} = ${}", quoted("id"), n), false);
        b.where_group(false, |_| {});
        let q = b.build();
        assert_eq!(q.sql, "SELECT * FROM \"todos\" WHERE \"id\" = $1");
    }

    #[test]
    fn insert_omits_defaulted_columns_without_values() {
        let body = json!({"title": "write tests"});
        let q = insert(&todos(), body.as_object().expect("object"));
        assert_eq!(
            q.sql,
            "INSERT INTO \"todos\" (\"title\", \"done\") VALUES ($1, $2) \
             RETURNING \"id\", \"title\", \"done\""
        );
        assert_eq!(
            q.params,
            vec![BindValue::Text("write tests".to_string()), BindValue::Null]
        );
    }

    #[test]
    fn insert_keeps_supplied_key() {
        let body = json!({"id": 7, "title": "x", "done": true});
        let q = insert(&todos(), body.as_object().expect("object"));
        assert!(q.sql.starts_with("INSERT INTO \"todos\" (\"id\", \"title\", \"done\")"));
        assert_eq!(
            q.params,
            vec![
                BindValue::I64(7),
                BindValue::Text("x".to_string()),
                BindValue::Bool(true)
            ]
        );
    }

    #[test]
    fn update_sets_only_body_columns() {
        let body = json!({"done": true});
        let q = update_by_pk(&todos(), body.as_object().expect("object"), BindValue::I64(3));
        assert_eq!(
            q.sql,
            "UPDATE \"todos\" SET \"done\" = $1 WHERE \"id\" = $2 \
             RETURNING \"id\", \"title\", \"done\""
        );
        assert_eq!(q.params, vec![BindValue::Bool(true), BindValue::I64(3)]);
    }

    #[test]
    fn update_without_changes_degrades_to_lookup() {
        let body = json!({});
        let q = update_by_pk(&todos(), body.as_object().expect("object"), BindValue::I64(3));
        assert!(q.sql.starts_with("SELECT"));
        assert_eq!(q.params, vec![BindValue::I64(3)]);
    }

    #[test]
    fn delete_returns_row() {
        let q = delete_by_pk(&todos(), BindValue::I64(3));
        assert_eq!(
            q.sql,
            "DELETE FROM \"todos\" WHERE \"id\" = $1 RETURNING \"id\", \"title\", \"done\""
        );
    }
}
