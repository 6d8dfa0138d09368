//! The field bag that flows between pipeline nodes.
//!
//! A [`Record`] is an ordered mapping from field name to [`Value`]. Nodes
//! communicate by convention over field names (`url`, `filename`, `path`,
//! `dataset`, ...) rather than through a fixed schema. A node that needs a
//! field asks for it with [`Record::require_str`]; absence surfaces as
//! [`Error::MissingField`] at consumption time.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Text (URLs, file names, page bodies, ...).
    Str(String),
    /// Integer value.
    Int(i64),
    /// Boolean flag.
    Bool(bool),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Nested mapping.
    Map(IndexMap<String, Value>),
}

impl Value {
    /// Returns the string slice if this is a [`Value::Str`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Short, human-readable name of the variant (used in errors).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Int(_) => "integer",
            Self::Bool(_) => "boolean",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{}", i),
            Self::Bool(b) => write!(f, "{}", b),
            Self::List(_) | Self::Map(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Ordered field-name to value mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: IndexMap<String, Value>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    /// Insert or overwrite a field, keeping the original position on overwrite.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    /// Remove a field, preserving the order of the remaining ones.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.shift_remove(field)
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Get a field as a string slice, if present and textual.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Get a string field, failing with [`Error::MissingField`] when absent.
    pub fn require_str(&self, field: &str) -> Result<&str> {
        match self.fields.get(field) {
            Some(Value::Str(s)) => Ok(s),
            Some(other) => Err(Error::NotAString {
                field: field.to_string(),
                found: other.kind(),
            }),
            None => Err(Error::MissingField {
                field: field.to_string(),
            }),
        }
    }

    /// Check that every listed field is present.
    pub fn require_fields(&self, fields: &[&str]) -> Result<()> {
        for field in fields {
            if !self.fields.contains_key(*field) {
                return Err(Error::MissingField {
                    field: (*field).to_string(),
                });
            }
        }
        Ok(())
    }

    /// Whether the record carries the field.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Return a copy of this record with `other`'s fields layered on top.
    pub fn updated(&self, other: &Record) -> Record {
        let mut merged = self.clone();
        for (k, v) in &other.fields {
            merged.fields.insert(k.clone(), v.clone());
        }
        merged
    }

    /// Iterate over `(field, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Field names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Record
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_is_preserved() {
        let record = Record::new()
            .with("url", "http://example.com/a")
            .with("dataset", "pvc-1")
            .with("filename", "a.tgz");
        let keys: Vec<_> = record.keys().collect();
        assert_eq!(keys, vec!["url", "dataset", "filename"]);
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let mut record = Record::from([("a", "1"), ("b", "2")]);
        record.insert("a", "3");
        let pairs: Vec<_> = record.iter().map(|(k, v)| (k, v.to_string())).collect();
        assert_eq!(pairs, vec![("a", "3".to_string()), ("b", "2".to_string())]);
    }

    #[test]
    fn test_require_str_missing() {
        let record = Record::new();
        let err = record.require_str("url").unwrap_err();
        assert!(matches!(err, Error::MissingField { ref field } if field == "url"));
    }

    #[test]
    fn test_require_str_wrong_kind() {
        let record = Record::new().with("depth", 2i64);
        let err = record.require_str("depth").unwrap_err();
        assert!(matches!(err, Error::NotAString { found: "integer", .. }));
    }

    #[test]
    fn test_require_fields() {
        let record = Record::from([("dataset", "pvc-1")]);
        assert!(record.require_fields(&["dataset"]).is_ok());
        assert!(record.require_fields(&["dataset", "dataset_category"]).is_err());
    }

    #[test]
    fn test_updated_layers_fields() {
        let base = Record::from([("url", "http://a"), ("dataset", "x")]);
        let extra = Record::from([("url", "http://b"), ("filename", "f")]);
        let merged = base.updated(&extra);
        assert_eq!(merged.get_str("url"), Some("http://b"));
        assert_eq!(merged.get_str("dataset"), Some("x"));
        assert_eq!(merged.get_str("filename"), Some("f"));
        // Original untouched
        assert_eq!(base.get_str("url"), Some("http://a"));
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut record = Record::from([("a", "1"), ("b", "2"), ("c", "3")]);
        record.remove("b");
        let keys: Vec<_> = record.keys().collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::from("x").to_string(), "x");
        assert_eq!(Value::from(3i64).to_string(), "3");
        assert_eq!(
            Value::List(vec![Value::from("a"), Value::from(1i64)]).to_string(),
            r#"["a",1]"#
        );
    }

    #[test]
    fn test_serde_roundtrip_is_transparent() {
        let record = Record::from([("url", "http://a")]).with("n", 1i64);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"url":"http://a","n":1}"#);
    }
}
