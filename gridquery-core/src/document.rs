//! Entity model used by the in-memory collaborators
//!
//! This module provides the data structures entities are made of:
//! - Document: a JSON-like entity with nested fields
//! - Value: the scalar and composite values a field can hold
//! - Path navigation that fans out across arrays, which is how multivalued
//!   (repeated) properties are represented

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Create a new random document ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a document ID from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value held by a document field, a query constant or a row column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 32-bit integer
    Int32(i32),
    /// 64-bit integer
    Int64(i64),
    /// 64-bit floating point
    Float64(f64),
    /// String value
    String(String),
    /// Binary data
    Binary(Vec<u8>),
    /// Array of values
    Array(Vec<Value>),
    /// Object with string keys
    Object(BTreeMap<String, Value>),
    /// DateTime with UTC timezone
    DateTime(DateTime<Utc>),
}

/// Static type of a property or a row column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    Int32,
    Int64,
    Float64,
    String,
    Binary,
    DateTime,
    Object,
    /// Type not known up front; values are compared dynamically
    Any,
}

impl ValueType {
    /// Whether values of this type are integers
    pub fn is_integral(&self) -> bool {
        matches!(self, ValueType::Int32 | ValueType::Int64)
    }

    /// Whether values of this type are numbers
    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueType::Int32 | ValueType::Int64 | ValueType::Float64)
    }
}

impl Value {
    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if value is a number (int or float)
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int32(_) | Value::Int64(_) | Value::Float64(_))
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(i) => Some(*i as i64),
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(i) => Some(*i as f64),
            Value::Int64(i) => Some(*i as f64),
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get as array reference
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Runtime type of this value, `None` for null and arrays
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null | Value::Array(_) => None,
            Value::Bool(_) => Some(ValueType::Bool),
            Value::Int32(_) => Some(ValueType::Int32),
            Value::Int64(_) => Some(ValueType::Int64),
            Value::Float64(_) => Some(ValueType::Float64),
            Value::String(_) => Some(ValueType::String),
            Value::Binary(_) => Some(ValueType::Binary),
            Value::Object(_) => Some(ValueType::Object),
            Value::DateTime(_) => Some(ValueType::DateTime),
        }
    }

    /// Compare two values of compatible types.
    ///
    /// Numbers compare across integer and float representations. Returns
    /// `None` when the values are not comparable (different kinds, nulls,
    /// composites), which predicates treat as "no match".
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),

            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Int32(a), Value::Int64(b)) => Some((*a as i64).cmp(b)),
            (Value::Int64(a), Value::Int32(b)) => Some(a.cmp(&(*b as i64))),

            (a, b) if a.is_number() && b.is_number() => {
                let (a, b) = (a.as_f64()?, b.as_f64()?);
                a.partial_cmp(&b)
            }

            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Binary(a), Value::Binary(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),

            _ => None,
        }
    }

    /// Total order used for sorting: nulls first, then by kind, then by value
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match self.compare(other) {
            Some(ordering) => ordering,
            None => match (self, other) {
                (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
                (Value::Array(a), Value::Array(b)) => {
                    for (x, y) in a.iter().zip(b.iter()) {
                        let ordering = x.total_cmp(y);
                        if ordering != Ordering::Equal {
                            return ordering;
                        }
                    }
                    a.len().cmp(&b.len())
                }
                _ => self.kind_rank().cmp(&other.kind_rank()),
            },
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int32(_) | Value::Int64(_) | Value::Float64(_) => 2,
            Value::String(_) => 3,
            Value::DateTime(_) => 4,
            Value::Binary(_) => 5,
            Value::Array(_) => 6,
            Value::Object(_) => 7,
        }
    }
}

/// Renders the value as a query literal
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int32(i) => write!(f, "{}", i),
            Value::Int64(i) => write!(f, "{}", i),
            Value::Float64(x) => write!(f, "{:?}", x),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Binary(b) => write!(f, "x'{}'", b.iter().map(|byte| format!("{:02x}", byte)).collect::<String>()),
            Value::Array(arr) => {
                write!(f, "(")?;
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, ")")
            }
            Value::Object(obj) => write!(f, "{{{} fields}}", obj.len()),
            Value::DateTime(dt) => write!(f, "'{}'", dt.to_rfc3339()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int32(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float64(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(arr: Vec<Value>) -> Self {
        Value::Array(arr)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int64(i),
                None => Value::Float64(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => Value::Array(arr.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(obj) => {
                Value::Object(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Document structure with nested fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique document identifier
    #[serde(rename = "_id")]
    pub id: DocumentId,

    /// Document fields stored in a BTreeMap for ordered iteration
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl Document {
    /// Create a new document with a random ID
    pub fn new() -> Self {
        Self {
            id: DocumentId::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Create a document from fields
    pub fn from_fields(fields: BTreeMap<String, Value>) -> Self {
        Self {
            id: DocumentId::new(),
            fields,
        }
    }

    /// Create a document from a JSON object
    pub fn from_json(json: serde_json::Value) -> Result<Self, DocumentError> {
        match Value::from(json) {
            Value::Object(fields) => Ok(Self::from_fields(fields)),
            other => Err(DocumentError::NotAnObject(format!("{:?}", other))),
        }
    }

    /// Builder-style field insertion
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Insert a field
    pub fn insert(&mut self, key: String, value: Value) -> Option<Value> {
        self.fields.insert(key, value)
    }

    /// Get a field by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get field by path (e.g., "user.address.city")
    pub fn get_by_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;

        for part in parts {
            match current {
                Value::Object(obj) => current = obj.get(part)?,
                Value::Array(arr) => current = arr.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            }
        }

        Some(current)
    }

    /// Collect every non-null value reachable through `path`.
    ///
    /// Arrays met along the way (including at the leaf) are flattened, so a
    /// repeated property yields one entry per element.
    pub fn collect_by_path<'a>(&'a self, path: &[String]) -> Vec<&'a Value> {
        let mut out = Vec::new();
        if let Some((first, rest)) = path.split_first() {
            if let Some(value) = self.fields.get(first) {
                collect_values(value, rest, &mut out);
            }
        }
        out
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_values<'a>(value: &'a Value, rest: &[String], out: &mut Vec<&'a Value>) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                collect_values(item, rest, out);
            }
        }
        Value::Object(obj) => match rest.split_first() {
            Some((next, tail)) => {
                if let Some(child) = obj.get(next) {
                    collect_values(child, tail, out);
                }
            }
            None => out.push(value),
        },
        scalar => {
            if rest.is_empty() {
                out.push(scalar);
            }
        }
    }
}

/// Document errors
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Document must be a JSON object, got {0}")]
    NotAnObject(String),
}
