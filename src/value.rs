//! Dynamic document value model.
//!
//! Source documents are schemaless; this tagged union is the common
//! currency every strategy transforms through on its way to a SQL row.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// An opaque mapping from field name to value, preserving insertion order
/// (useful for stable fixtures and deferred SQL emission; not semantically
/// required by any strategy).
pub type Document = IndexMap<String, Value>;

/// A single field value drawn from a source document.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(DateTime<Utc>),
    /// An opaque source identifier, stringified to its canonical form.
    Id(String),
    List(Vec<Value>),
    Map(Document),
}

impl Value {
    /// Look up a value by dotted path (`"a.b.c"`), descending through
    /// nested maps. Returns `None` if any segment is absent or the path
    /// traverses through a non-map value.
    #[must_use]
    pub fn get_path<'a>(&'a self, path: &str) -> Option<&'a Value> {
        let mut current = self;
        for segment in path.split('.') {
            match current {
                Value::Map(map) => current = map.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Stringify an identifier-bearing value to its canonical string form.
    ///
    /// Both `Id` and bare `Str` are accepted: source data stores nested
    /// references as canonical strings in some places and as opaque
    /// identifiers in others (see Open Question (a)); this operation does
    /// not distinguish which path produced the value.
    #[must_use]
    pub fn as_id_string(&self) -> Option<String> {
        match self {
            Value::Id(s) | Value::Str(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Render a nested `List`/`Map` value to `serde_json::Value` for
    /// storage in a `jsonb` column. Scalars convert through their natural
    /// JSON representation; `Timestamp` renders as an ISO-8601 string
    /// rather than a JSON number, matching how every other scalar path in
    /// this crate stringifies timestamps.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::Str(s) | Value::Id(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => {
                serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
        }
    }
}

impl From<bson::Bson> for Value {
    fn from(bson: bson::Bson) -> Self {
        match bson {
            bson::Bson::Null => Value::Null,
            bson::Bson::Boolean(b) => Value::Bool(b),
            bson::Bson::Int32(i) => Value::Int(i64::from(i)),
            bson::Bson::Int64(i) => Value::Int(i),
            bson::Bson::Double(f) => Value::Float(f),
            bson::Bson::String(s) => Value::Str(s),
            bson::Bson::ObjectId(oid) => Value::Id(oid.to_hex()),
            bson::Bson::DateTime(dt) => Value::Timestamp(dt.to_chrono()),
            bson::Bson::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            bson::Bson::Document(doc) => Value::Map(document_from_bson(doc)),
            other => Value::Str(other.to_string()),
        }
    }
}

/// Convert a raw `bson::Document` into our `Document` type.
#[must_use]
pub fn document_from_bson(doc: bson::Document) -> Document {
    doc.into_iter()
        .map(|(k, v)| (k, Value::from(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_path_descends_nested_maps() {
        let mut inner = Document::new();
        inner.insert("city".to_string(), Value::Str("Paris".to_string()));
        let mut outer = Document::new();
        outer.insert("address".to_string(), Value::Map(inner));
        let doc = Value::Map(outer);

        assert_eq!(
            doc.get_path("address.city"),
            Some(&Value::Str("Paris".to_string()))
        );
        assert_eq!(doc.get_path("address.zip"), None);
        assert_eq!(doc.get_path("missing.city"), None);
    }

    #[test]
    fn id_and_str_both_stringify() {
        assert_eq!(Value::Id("abc123".into()).as_id_string().as_deref(), Some("abc123"));
        assert_eq!(Value::Str("abc123".into()).as_id_string().as_deref(), Some("abc123"));
        assert_eq!(Value::Bool(true).as_id_string(), None);
    }

    #[test]
    fn to_json_renders_nested_list_and_map() {
        let mut inner = Document::new();
        inner.insert("active".to_string(), Value::Bool(true));
        let value = Value::List(vec![Value::Int(1), Value::Map(inner)]);
        let json = value.to_json();
        assert_eq!(json, serde_json::json!([1, {"active": true}]));
    }

    #[test]
    fn bson_conversion_roundtrips_primitives() {
        let bdoc = bson::doc! {
            "name": "Alice",
            "age": 30i32,
            "active": true,
            "tags": ["a", "b"],
        };
        let doc = document_from_bson(bdoc);
        assert_eq!(doc.get("name"), Some(&Value::Str("Alice".to_string())));
        assert_eq!(doc.get("age"), Some(&Value::Int(30)));
        assert_eq!(doc.get("active"), Some(&Value::Bool(true)));
        assert_eq!(
            doc.get("tags"),
            Some(&Value::List(vec![
                Value::Str("a".to_string()),
                Value::Str("b".to_string())
            ]))
        );
    }
}
