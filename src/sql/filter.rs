//! Translation of a filter tree into parameterized predicate fragments on
//! an in-flight select.

use crate::filter::{Filter, GroupOp, Op};
use crate::sql::builder::{quoted, SelectBuilder};
use crate::sql::params::BindValue;
use serde_json::Value;

/// Apply `filter` to the builder. Group nodes recurse with their own
/// operator as the new parent operator and wrap their children in one
/// predicate group; the parent operator decides whether the resulting
/// predicate joins its siblings with AND or OR. Top-level callers pass
/// `GroupOp::And`.
pub fn apply_filter(builder: &mut SelectBuilder, filter: Option<&Filter>, parent: GroupOp) {
    let Some(filter) = filter else {
        return;
    };
    match filter {
        Filter::Group { op, filters } => {
            builder.where_group(parent == GroupOp::Or, |b| {
                for sub in filters {
                    apply_filter(b, Some(sub), *op);
                }
            });
        }
        Filter::Leaf { op, attr, value } => apply_leaf(builder, *op, attr, value, parent),
    }
}

fn apply_leaf(builder: &mut SelectBuilder, op: Op, attr: &str, value: &Value, parent: GroupOp) {
    let or = parent == GroupOp::Or;
    let ident = quoted(attr);
    let fragment = match op {
        Op::Eq => binary(builder, &ident, "=", value),
        Op::Neq => binary(builder, &ident, "!=", value),
        Op::Gt => binary(builder, &ident, ">", value),
        Op::Gte => binary(builder, &ident, ">=", value),
        Op::Lt => binary(builder, &ident, "<", value),
        Op::Lte => binary(builder, &ident, "<=", value),
        Op::Like => binary(builder, &ident, "LIKE", value),
        Op::NotLike => binary(builder, &ident, "NOT LIKE", value),
        Op::SimilarTo => binary(builder, &ident, "SIMILAR TO", value),
        Op::NotSimilarTo => binary(builder, &ident, "NOT SIMILAR TO", value),
        Op::ILike => {
            let n = builder.push_param(BindValue::from_json(value));
            format!("lower({ident}) LIKE lower(${n})")
        }
        Op::NotILike => {
            let n = builder.push_param(BindValue::from_json(value));
            format!("lower({ident}) NOT LIKE lower(${n})")
        }
        Op::ILikeUnaccent => {
            let n = builder.push_param(BindValue::from_json(value));
            format!("lower(unaccent({ident})) LIKE lower(unaccent(${n}))")
        }
        Op::NotILikeUnaccent => {
            let n = builder.push_param(BindValue::from_json(value));
            format!("lower(unaccent({ident})) NOT LIKE lower(unaccent(${n}))")
        }
        Op::In => in_list(builder, &ident, value, false),
        Op::Nin => in_list(builder, &ident, value, true),
        Op::IsNull => format!("{ident} IS NULL"),
        Op::IsNotNull => format!("{ident} IS NOT NULL"),
    };
    builder.where_fragment(fragment, or);
}

fn binary(builder: &mut SelectBuilder, ident: &str, sql_op: &str, value: &Value) -> String {
    let n = builder.push_param(BindValue::from_json(value));
    format!("{ident} {sql_op} ${n}")
}

/// Expand a list value into one placeholder per element. Empty lists are
/// vacuous: nothing is IN an empty set, everything is NOT IN it.
fn in_list(builder: &mut SelectBuilder, ident: &str, value: &Value, negated: bool) -> String {
    let elements: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        scalar => vec![scalar],
    };
    if elements.is_empty() {
        return if negated { "1 = 1" } else { "1 = 0" }.to_string();
    }
    let placeholders: Vec<String> = elements
        .iter()
        .map(|v| {
            let n = builder.push_param(BindValue::from_json(v));
            format!("${n}")
        })
        .collect();
    let keyword = if negated { "NOT IN" } else { "IN" };
    format!("{} {} ({})", ident, keyword, placeholders.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sql_of(filter: &Filter) -> (String, Vec<BindValue>) {
        let mut b = SelectBuilder::new("t");
        b.column("id");
        apply_filter(&mut b, Some(filter), GroupOp::And);
        let q = b.build();
        (q.sql, q.params)
    }

    #[test]
    fn leaf_eq() {
        let (sql, params) = sql_of(&Filter::eq("title", json!("x")));
        assert_eq!(sql, "SELECT \"id\" FROM \"t\" WHERE \"title\" = $1");
        assert_eq!(params, vec![BindValue::Text("x".to_string())]);
    }

    #[test]
    fn or_group_joins_children_with_or() {
        let f = Filter::or(vec![
            Filter::like("title", "%lo%"),
            Filter::like("title", "%ta%"),
        ]);
        let (sql, params) = sql_of(&f);
        assert_eq!(
            sql,
            "SELECT \"id\" FROM \"t\" WHERE (\"title\" LIKE $1 OR \"title\" LIKE $2)"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn nested_groups_preserve_precedence() {
        // (a = 1 OR b = 2) AND c = 3 must not translate as a OR (b AND c).
        let f = Filter::and(vec![
            Filter::or(vec![Filter::eq("a", json!(1)), Filter::eq("b", json!(2))]),
            Filter::eq("c", json!(3)),
        ]);
        let (sql, _) = sql_of(&f);
        assert_eq!(
            sql,
            "SELECT \"id\" FROM \"t\" WHERE ((\"a\" = $1 OR \"b\" = $2) AND \"c\" = $3)"
        );
    }

    #[test]
    fn depth_three_nesting() {
        let f = Filter::or(vec![
            Filter::and(vec![
                Filter::or(vec![Filter::eq("a", json!(1)), Filter::eq("b", json!(2))]),
                Filter::eq("c", json!(3)),
            ]),
            Filter::eq("d", json!(4)),
        ]);
        let (sql, params) = sql_of(&f);
        assert_eq!(
            sql,
            "SELECT \"id\" FROM \"t\" WHERE (((\"a\" = $1 OR \"b\" = $2) AND \"c\" = $3) OR \"d\" = $4)"
        );
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn empty_group_is_vacuous() {
        let f = Filter::and(vec![]);
        let (sql, params) = sql_of(&f);
        assert_eq!(sql, "SELECT \"id\" FROM \"t\"");
        assert!(params.is_empty());

        // An empty group among siblings must not leave a dangling joiner.
        let f = Filter::and(vec![Filter::eq("a", json!(1)), Filter::or(vec![])]);
        let (sql, _) = sql_of(&f);
        assert_eq!(sql, "SELECT \"id\" FROM \"t\" WHERE (\"a\" = $1)");
    }

    #[test]
    fn in_expands_to_parameter_list() {
        let f = Filter::leaf(Op::In, "id", json!([1, 2, 3]));
        let (sql, params) = sql_of(&f);
        assert_eq!(sql, "SELECT \"id\" FROM \"t\" WHERE \"id\" IN ($1, $2, $3)");
        assert_eq!(
            params,
            vec![BindValue::I64(1), BindValue::I64(2), BindValue::I64(3)]
        );
    }

    #[test]
    fn empty_in_lists_are_vacuous() {
        let (sql, params) = sql_of(&Filter::leaf(Op::In, "id", json!([])));
        assert_eq!(sql, "SELECT \"id\" FROM \"t\" WHERE 1 = 0");
        assert!(params.is_empty());

        let (sql, _) = sql_of(&Filter::leaf(Op::Nin, "id", json!([])));
        assert_eq!(sql, "SELECT \"id\" FROM \"t\" WHERE 1 = 1");
    }

    #[test]
    fn null_operators_carry_no_parameter() {
        let (sql, params) = sql_of(&Filter::leaf(Op::IsNull, "done", json!(null)));
        assert_eq!(sql, "SELECT \"id\" FROM \"t\" WHERE \"done\" IS NULL");
        assert!(params.is_empty());

        let (sql, _) = sql_of(&Filter::leaf(Op::IsNotNull, "done", json!(null)));
        assert_eq!(sql, "SELECT \"id\" FROM \"t\" WHERE \"done\" IS NOT NULL");
    }

    #[test]
    fn case_insensitive_like_wraps_both_sides() {
        let (sql, _) = sql_of(&Filter::leaf(Op::ILike, "title", json!("%A%")));
        assert_eq!(
            sql,
            "SELECT \"id\" FROM \"t\" WHERE lower(\"title\") LIKE lower($1)"
        );
    }

    #[test]
    fn identifier_quotes_are_doubled() {
        let (sql, _) = sql_of(&Filter::eq("na\"me", json!(1)));
        assert_eq!(sql, "SELECT \"id\" FROM \"t\" WHERE \"na\"\"me\" = $1");
    }
}
