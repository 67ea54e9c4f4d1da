//! Filter tree: leaf comparisons combined by AND/OR groups.
//!
//! Wire format is `{op, attr, value}` for leaves and `{op, filters}` for
//! groups. Unknown operators and leaf/group shape mismatches are rejected at
//! deserialization time.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Operator combining the children of a filter group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupOp {
    And,
    Or,
}

impl GroupOp {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupOp::And => "and",
            GroupOp::Or => "or",
        }
    }
}

impl fmt::Display for GroupOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leaf comparison operator. Each maps to exactly one SQL template.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Eq,
    Neq,
    In,
    Nin,
    Gt,
    Gte,
    Lt,
    Lte,
    /// LIKE
    Like,
    /// NOT LIKE
    NotLike,
    /// lower() LIKE lower()
    ILike,
    /// NOT lower() LIKE lower()
    NotILike,
    /// SIMILAR TO
    SimilarTo,
    /// NOT SIMILAR TO
    NotSimilarTo,
    /// lower(unaccent()) LIKE lower(unaccent())
    ILikeUnaccent,
    NotILikeUnaccent,
    IsNull,
    IsNotNull,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Eq => "eq",
            Op::Neq => "neq",
            Op::In => "in",
            Op::Nin => "nin",
            Op::Gt => "gt",
            Op::Gte => "gte",
            Op::Lt => "lt",
            Op::Lte => "lte",
            Op::Like => "lk",
            Op::NotLike => "nlk",
            Op::ILike => "ilk",
            Op::NotILike => "nilk",
            Op::SimilarTo => "sim",
            Op::NotSimilarTo => "nsim",
            Op::ILikeUnaccent => "ilkua",
            Op::NotILikeUnaccent => "nilkua",
            Op::IsNull => "null",
            Op::IsNotNull => "nnull",
        }
    }

    /// Whether the operator expects a list value.
    pub fn takes_list(self) -> bool {
        matches!(self, Op::In | Op::Nin)
    }

    /// Whether the operator carries no value at all.
    pub fn takes_no_value(self) -> bool {
        matches!(self, Op::IsNull | Op::IsNotNull)
    }
}

impl FromStr for Op {
    type Err = UnknownOp;

    fn from_str(s: &str) -> Result<Self, UnknownOp> {
        Ok(match s {
            "eq" => Op::Eq,
            "neq" => Op::Neq,
            "in" => Op::In,
            "nin" => Op::Nin,
            "gt" => Op::Gt,
            "gte" => Op::Gte,
            "lt" => Op::Lt,
            "lte" => Op::Lte,
            "lk" => Op::Like,
            "nlk" => Op::NotLike,
            "ilk" => Op::ILike,
            "nilk" => Op::NotILike,
            "sim" => Op::SimilarTo,
            "nsim" => Op::NotSimilarTo,
            "ilkua" => Op::ILikeUnaccent,
            "nilkua" => Op::NotILikeUnaccent,
            "null" => Op::IsNull,
            "nnull" => Op::IsNotNull,
            other => return Err(UnknownOp(other.to_string())),
        })
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct UnknownOp(pub String);

impl fmt::Display for UnknownOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown filter operator '{}'", self.0)
    }
}

/// A query predicate: either a single comparison or an AND/OR group of
/// sub-filters. Group nodes never carry an attribute or value; leaf nodes
/// never carry children.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Group { op: GroupOp, filters: Vec<Filter> },
    Leaf { op: Op, attr: String, value: Value },
}

impl Filter {
    pub fn group(op: GroupOp, filters: Vec<Filter>) -> Self {
        Filter::Group { op, filters }
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::group(GroupOp::And, filters)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::group(GroupOp::Or, filters)
    }

    pub fn leaf(op: Op, attr: impl Into<String>, value: Value) -> Self {
        Filter::Leaf {
            op,
            attr: attr.into(),
            value,
        }
    }

    pub fn eq(attr: impl Into<String>, value: Value) -> Self {
        Filter::leaf(Op::Eq, attr, value)
    }

    pub fn like(attr: impl Into<String>, pattern: impl Into<String>) -> Self {
        Filter::leaf(Op::Like, attr, Value::String(pattern.into()))
    }

    /// Checks every referenced attribute against the known column set and
    /// every `in`/`nin` value for list shape. Called by the execution
    /// adapter before translation.
    pub fn validate(&self, columns: &HashSet<&str>) -> Result<(), crate::error::Error> {
        match self {
            Filter::Group { filters, .. } => {
                for f in filters {
                    f.validate(columns)?;
                }
                Ok(())
            }
            Filter::Leaf { op, attr, value } => {
                if !columns.contains(attr.as_str()) {
                    return Err(crate::error::Error::BadRequest(format!(
                        "unknown filter attribute '{attr}'"
                    )));
                }
                if op.takes_list() && !value.is_array() {
                    return Err(crate::error::Error::BadRequest(format!(
                        "operator '{op}' on '{attr}' expects a list value"
                    )));
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Group { op, filters } => {
                write!(f, "{op}(")?;
                for (i, sub) in filters.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{sub}")?;
                }
                f.write_str(")")
            }
            Filter::Leaf { op, attr, value } => write!(f, "{attr} {op} {value}"),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawFilter {
    op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attr: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    value: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    filters: Vec<RawFilter>,
}

impl TryFrom<RawFilter> for Filter {
    type Error = String;

    fn try_from(raw: RawFilter) -> Result<Self, String> {
        if raw.op == "and" || raw.op == "or" {
            if raw.attr.is_some() || !raw.value.is_null() {
                return Err(format!("group filter '{}' must not carry attr/value", raw.op));
            }
            let op = if raw.op == "and" { GroupOp::And } else { GroupOp::Or };
            let filters = raw
                .filters
                .into_iter()
                .map(Filter::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Filter::Group { op, filters });
        }
        let op = Op::from_str(&raw.op).map_err(|e| e.to_string())?;
        if !raw.filters.is_empty() {
            return Err(format!("leaf filter '{}' must not carry sub-filters", raw.op));
        }
        let attr = raw
            .attr
            .ok_or_else(|| format!("leaf filter '{}' requires an attr", raw.op))?;
        Ok(Filter::Leaf {
            op,
            attr,
            value: raw.value,
        })
    }
}

impl From<&Filter> for RawFilter {
    fn from(filter: &Filter) -> Self {
        match filter {
            Filter::Group { op, filters } => RawFilter {
                op: op.as_str().to_string(),
                attr: None,
                value: Value::Null,
                filters: filters.iter().map(RawFilter::from).collect(),
            },
            Filter::Leaf { op, attr, value } => RawFilter {
                op: op.as_str().to_string(),
                attr: Some(attr.clone()),
                value: value.clone(),
                filters: Vec::new(),
            },
        }
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RawFilter::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawFilter::deserialize(deserializer)?;
        Filter::try_from(raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserialize_leaf() {
        let f: Filter = serde_json::from_value(json!({"op": "eq", "attr": "title", "value": "x"}))
            .expect("leaf");
        assert_eq!(f, Filter::eq("title", json!("x")));
    }

    #[test]
    fn deserialize_group() {
        let f: Filter = serde_json::from_value(json!({
            "op": "or",
            "filters": [
                {"op": "lk", "attr": "title", "value": "%lo%"},
                {"op": "null", "attr": "done"},
            ]
        }))
        .expect("group");
        match &f {
            Filter::Group { op, filters } => {
                assert_eq!(*op, GroupOp::Or);
                assert_eq!(filters.len(), 2);
            }
            other => panic!("expected group, got {other}"),
        }
    }

    #[test]
    fn unknown_op_is_rejected() {
        let err = serde_json::from_value::<Filter>(json!({"op": "between", "attr": "a", "value": 1}));
        assert!(err.is_err());
    }

    #[test]
    fn group_with_attr_is_rejected() {
        let err = serde_json::from_value::<Filter>(json!({"op": "and", "attr": "a"}));
        assert!(err.is_err());
    }

    #[test]
    fn serialize_round_trip() {
        let f = Filter::and(vec![
            Filter::or(vec![Filter::eq("a", json!(1)), Filter::eq("b", json!(2))]),
            Filter::leaf(Op::In, "c", json!([1, 2, 3])),
        ]);
        let wire = serde_json::to_value(&f).expect("serialize");
        let back: Filter = serde_json::from_value(wire).expect("deserialize");
        assert_eq!(back, f);
    }

    #[test]
    fn validate_rejects_unknown_attr_and_scalar_in() {
        let columns: std::collections::HashSet<&str> = ["title"].into_iter().collect();
        assert!(Filter::eq("title", json!("x")).validate(&columns).is_ok());
        assert!(Filter::eq("nope", json!("x")).validate(&columns).is_err());
        assert!(Filter::leaf(Op::In, "title", json!("scalar"))
            .validate(&columns)
            .is_err());
    }
}
