//! Entity schemas and field index metadata
//!
//! The planner never inspects entities to learn what the index can do; it
//! asks a `FieldIndexMetadata` implementation. `EntitySchema` is the
//! declarative implementation used by the in-memory collaborators.

use crate::document::ValueType;
use crate::query::ast::PropertyPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the index knows about each property path of one entity type
pub trait FieldIndexMetadata: Send + Sync {
    /// Predicates over this path can be answered by the index
    fn is_indexed(&self, path: &PropertyPath) -> bool;

    /// The index can sort on this path
    fn is_sortable(&self, path: &PropertyPath) -> bool;

    /// The index can return this path's value without loading the entity
    fn is_projectable(&self, path: &PropertyPath) -> bool;

    /// The path may be the target of an aggregation function
    fn is_aggregable(&self, path: &PropertyPath) -> bool;

    /// The path is multivalued
    fn is_repeated(&self, path: &PropertyPath) -> bool;

    /// Declared type of the path
    fn property_type(&self, _path: &PropertyPath) -> ValueType {
        ValueType::Any
    }
}

/// Schema definition for one entity type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Entity type name
    pub name: String,
    /// Field definitions keyed by dotted path
    pub fields: BTreeMap<String, FieldDefinition>,
}

impl EntitySchema {
    /// Create a new empty schema
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field definition
    pub fn field(mut self, path: impl Into<String>, definition: FieldDefinition) -> Self {
        self.fields.insert(path.into(), definition);
        self
    }

    fn definition(&self, path: &PropertyPath) -> Option<&FieldDefinition> {
        self.fields.get(&path.as_string())
    }
}

impl FieldIndexMetadata for EntitySchema {
    fn is_indexed(&self, path: &PropertyPath) -> bool {
        self.definition(path).map(|d| d.indexed).unwrap_or(false)
    }

    fn is_sortable(&self, path: &PropertyPath) -> bool {
        self.definition(path).map(|d| d.sortable).unwrap_or(false)
    }

    fn is_projectable(&self, path: &PropertyPath) -> bool {
        self.definition(path).map(|d| d.projectable).unwrap_or(false)
    }

    fn is_aggregable(&self, path: &PropertyPath) -> bool {
        self.definition(path).map(|d| d.aggregable).unwrap_or(true)
    }

    // A path is repeated when it or any of its prefixes is
    fn is_repeated(&self, path: &PropertyPath) -> bool {
        let segments = path.segments();
        (1..=segments.len()).any(|len| {
            self.fields
                .get(&segments[..len].join("."))
                .map(|d| d.repeated)
                .unwrap_or(false)
        })
    }

    fn property_type(&self, path: &PropertyPath) -> ValueType {
        self.definition(path).map(|d| d.field_type).unwrap_or(ValueType::Any)
    }
}

/// Field definition with type and index capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Field type
    pub field_type: ValueType,
    /// Whether predicates on the field can use the index
    pub indexed: bool,
    /// Whether the index can sort on the field
    pub sortable: bool,
    /// Whether the index stores the field for projection
    pub projectable: bool,
    /// Whether the field can be aggregated
    pub aggregable: bool,
    /// Whether the field holds multiple values
    pub repeated: bool,
}

impl FieldDefinition {
    /// Create a new, non-indexed field definition
    pub fn new(field_type: ValueType) -> Self {
        Self {
            field_type,
            indexed: false,
            sortable: false,
            projectable: false,
            aggregable: true,
            repeated: false,
        }
    }

    /// Set as indexed
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Set as sortable by the index (implies indexed)
    pub fn sortable(mut self) -> Self {
        self.indexed = true;
        self.sortable = true;
        self
    }

    /// Set as projectable from the index (implies indexed)
    pub fn projectable(mut self) -> Self {
        self.indexed = true;
        self.projectable = true;
        self
    }

    /// Disallow aggregation functions other than COUNT
    pub fn not_aggregable(mut self) -> Self {
        self.aggregable = false;
        self
    }

    /// Set as multivalued
    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }
}

/// Schemas for every entity type the engine can query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, EntitySchema>,
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema, replacing any previous one with the same name
    pub fn register(&mut self, schema: EntitySchema) {
        self.schemas.insert(schema.name.clone(), schema);
    }

    /// Builder-style registration
    pub fn with(mut self, schema: EntitySchema) -> Self {
        self.register(schema);
        self
    }

    /// Look up the schema of an entity type
    pub fn get(&self, entity: &str) -> Option<&EntitySchema> {
        self.schemas.get(entity)
    }
}
