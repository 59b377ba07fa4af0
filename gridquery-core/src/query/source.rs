//! Collaborator interfaces for fetching candidate entities
//!
//! Plans never read storage directly. Unindexed plans scan an `EntitySource`,
//! indexed plans issue an `IndexQuery` to an `IndexSearch`. Both hand back a
//! `ResultIterator`, which may be backed by a remote or streaming resource and
//! therefore has to be closed once the caller is done with it.

use super::ast::{write_list, BooleanExpr, PropertyPath, SortField};
use super::filter::Instance;
use crate::schema::FieldIndexMetadata;
use std::fmt;

/// Errors raised by entity sources and index search
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error("Unknown entity type: {0}")]
    UnknownEntity(String),

    #[error("Property '{path}' cannot be {usage} by the index")]
    FieldNotIndexed { path: String, usage: &'static str },

    #[error("Index search failed: {0}")]
    IndexSearch(String),

    #[error("Scan failed: {0}")]
    Scan(String),

    #[error("Failed to close result iterator: {0}")]
    Close(String),
}

/// Streaming result sequence
pub trait ResultIterator: Iterator<Item = Result<Instance, SourceError>> + Send {
    /// Release the underlying resource
    fn close(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Total number of results, when the producer knows it up front
    fn total_hint(&self) -> Option<usize> {
        None
    }
}

/// Result iterator over an already materialized vector
#[derive(Debug)]
pub struct VecResultIterator {
    items: std::vec::IntoIter<Instance>,
    total: usize,
}

impl VecResultIterator {
    /// Create an iterator whose total is the vector length
    pub fn new(items: Vec<Instance>) -> Self {
        let total = items.len();
        Self::with_total(items, total)
    }

    /// Create an iterator reporting a total larger than the page it yields
    pub fn with_total(items: Vec<Instance>, total: usize) -> Self {
        Self {
            items: items.into_iter(),
            total,
        }
    }
}

impl Iterator for VecResultIterator {
    type Item = Result<Instance, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next().map(Ok)
    }
}

impl ResultIterator for VecResultIterator {
    fn total_hint(&self) -> Option<usize> {
        Some(self.total)
    }
}

/// Source of every entity of a type, used by unindexed plans
pub trait EntitySource: Send + Sync {
    /// Iterate over all entities of `entity`
    fn scan(&self, entity: &str) -> Result<Box<dyn ResultIterator>, SourceError>;
}

/// Lookup of field index metadata per entity type
pub trait MetadataProvider: Send + Sync {
    /// Metadata of an entity type, `None` when the type is unknown
    fn metadata(&self, entity: &str) -> Option<&dyn FieldIndexMetadata>;
}

impl MetadataProvider for crate::schema::SchemaRegistry {
    fn metadata(&self, entity: &str) -> Option<&dyn FieldIndexMetadata> {
        self.get(entity).map(|schema| schema as &dyn FieldIndexMetadata)
    }
}

/// Query issued to the index-search collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct IndexQuery {
    /// Entity type
    pub entity: String,
    /// Predicate over indexed properties only
    pub predicate: BooleanExpr,
    /// Properties to project; `None` returns entities
    pub projection: Option<Vec<PropertyPath>>,
    /// Sort order, empty for index order
    pub sort: Vec<SortField>,
    /// Number of leading results to skip
    pub first_result: usize,
    /// Page size, `None` for unlimited
    pub max_results: Option<usize>,
}

impl IndexQuery {
    /// Unsorted, unpaginated query returning entities
    pub fn new(entity: impl Into<String>, predicate: BooleanExpr) -> Self {
        Self {
            entity: entity.into(),
            predicate,
            projection: None,
            sort: Vec::new(),
            first_result: 0,
            max_results: None,
        }
    }

    /// Set the projection
    pub fn project(mut self, projection: Vec<PropertyPath>) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Set the sort order
    pub fn sort(mut self, sort: Vec<SortField>) -> Self {
        self.sort = sort;
        self
    }

    /// Set the page window
    pub fn page(mut self, first_result: usize, max_results: Option<usize>) -> Self {
        self.first_result = first_result;
        self.max_results = max_results;
        self
    }
}

impl fmt::Display for IndexQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(projection) = &self.projection {
            write!(f, "SELECT ")?;
            write_list(f, projection)?;
            write!(f, " ")?;
        }
        write!(f, "FROM {}", self.entity)?;
        if !self.predicate.is_true() {
            write!(f, " WHERE {}", self.predicate)?;
        }
        if !self.sort.is_empty() {
            write!(f, " ORDER BY ")?;
            write_list(f, &self.sort)?;
        }
        if self.first_result > 0 {
            write!(f, " OFFSET {}", self.first_result)?;
        }
        if let Some(max) = self.max_results {
            write!(f, " LIMIT {}", max)?;
        }
        Ok(())
    }
}

/// Hits returned by the index
pub struct IndexHits {
    /// Total number of matches, ignoring pagination
    pub total: usize,
    /// The requested page
    pub iterator: Box<dyn ResultIterator>,
}

impl fmt::Debug for IndexHits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexHits").field("total", &self.total).finish()
    }
}

/// Index-search collaborator
pub trait IndexSearch: Send + Sync {
    /// Run a query; sorting, projection and pagination are honored natively
    fn execute(&self, query: &IndexQuery) -> Result<IndexHits, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Value;

    #[test]
    fn test_index_query_text() {
        let query = IndexQuery::new("Person", BooleanExpr::gt("age", 30i32))
            .project(vec![PropertyPath::parse("name")])
            .sort(vec![SortField::asc("name")])
            .page(5, Some(10));

        assert_eq!(
            query.to_string(),
            "SELECT name FROM Person WHERE age > 30 ORDER BY name ASC OFFSET 5 LIMIT 10"
        );
        assert_eq!(IndexQuery::new("Person", BooleanExpr::TRUE).to_string(), "FROM Person");
    }

    #[test]
    fn test_vec_result_iterator() {
        let rows = vec![
            Instance::Row(vec![Value::Int32(1)]),
            Instance::Row(vec![Value::Int32(2)]),
        ];
        let mut iter = VecResultIterator::with_total(rows, 7);
        assert_eq!(iter.total_hint(), Some(7));
        assert_eq!(iter.by_ref().count(), 2);
        assert!(iter.close().is_ok());
    }
}
