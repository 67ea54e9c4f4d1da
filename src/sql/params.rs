//! Backend-neutral bind values converted from serde_json::Value.

use serde_json::Value;

/// A value bound to one `$n` placeholder. Each backend maps these onto its
/// own parameter encoding.
#[derive(Clone, Debug, PartialEq)]
pub enum BindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
    Uuid(uuid::Uuid),
    Json(Value),
}

impl BindValue {
    /// Lossless mapping from a JSON scalar; arrays and objects bind as
    /// JSON documents. Strings are never uuid-sniffed here; key parsing
    /// handles uuids from the resource's declared pk type.
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => BindValue::Null,
            Value::Bool(b) => BindValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    BindValue::I64(i)
                } else {
                    BindValue::F64(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => BindValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => BindValue::Json(v.clone()),
        }
    }
}
