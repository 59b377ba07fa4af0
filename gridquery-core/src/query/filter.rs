//! Object filters: the compiled form of a predicate, projection and sort
//!
//! A `Matcher` compiles a `FilterSpec` into an `ObjectFilter`. The filter is
//! evaluated once per candidate and yields either nothing (no match) or a
//! `FilterResult` holding the entity or its projection plus the values the
//! collector sorts on.

use super::aggregation::FieldAccumulator;
use super::ast::{write_list, BooleanExpr, PropertyPath, SortField};
use crate::document::{Document, Value};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Object filter compilation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    #[error("Invalid LIKE pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Unknown column '{0}'")]
    UnknownColumn(String),

    #[error("Parameter ':{0}' must be bound before compiling a filter")]
    UnboundParameter(String),

    #[error("Aggregation '{0}' cannot be evaluated per object")]
    UnexpectedAggregation(String),
}

/// A value flowing through a plan: an entity or a projected tuple
#[derive(Debug, Clone, PartialEq)]
pub enum Instance {
    /// Whole entity
    Entity(Arc<Document>),
    /// Projected tuple, or a synthetic row between aggregation phases
    Row(Vec<Value>),
}

impl Instance {
    /// The entity, if this is one
    pub fn entity(&self) -> Option<&Arc<Document>> {
        match self {
            Instance::Entity(doc) => Some(doc),
            Instance::Row(_) => None,
        }
    }

    /// The tuple, if this is one
    pub fn row(&self) -> Option<&[Value]> {
        match self {
            Instance::Entity(_) => None,
            Instance::Row(values) => Some(values),
        }
    }
}

impl From<Document> for Instance {
    fn from(doc: Document) -> Self {
        Instance::Entity(Arc::new(doc))
    }
}

/// Outcome of a successful filter evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct FilterResult {
    /// The entity when no projection was requested, the projection otherwise
    pub payload: Instance,
    /// Sort key, present when the filter sorts
    pub sort_projection: Option<Vec<Value>>,
}

impl FilterResult {
    /// Result without a sort key
    pub fn new(payload: Instance) -> Self {
        Self {
            payload,
            sort_projection: None,
        }
    }

    /// The matched entity, when not projected
    pub fn instance(&self) -> Option<&Arc<Document>> {
        self.payload.entity()
    }

    /// The projected values, when projected
    pub fn projection(&self) -> Option<&[Value]> {
        self.payload.row()
    }
}

/// Orders sort projections field by field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortComparator {
    ascending: Vec<bool>,
}

impl SortComparator {
    /// One direction flag per sort field
    pub fn new(ascending: Vec<bool>) -> Self {
        Self { ascending }
    }

    /// Compare two sort projections; nulls sort first in ascending order
    pub fn compare(&self, a: &[Value], b: &[Value]) -> Ordering {
        for ((x, y), ascending) in a.iter().zip(b).zip(&self.ascending) {
            let ordering = x.total_cmp(y);
            if ordering != Ordering::Equal {
                return if *ascending { ordering } else { ordering.reverse() };
            }
        }
        Ordering::Equal
    }

    /// Compare two filter results by their sort projections
    pub fn compare_results(&self, a: &FilterResult, b: &FilterResult) -> Ordering {
        match (&a.sort_projection, &b.sort_projection) {
            (Some(x), Some(y)) => self.compare(x, y),
            _ => Ordering::Equal,
        }
    }
}

/// Compiled predicate, projection and comparator
pub trait ObjectFilter: Send + Sync + fmt::Debug {
    /// Evaluate against one instance; `None` when it does not match
    fn filter(&self, instance: &Instance) -> Option<FilterResult>;

    /// Comparator over sort projections, `None` when unsorted
    fn comparator(&self) -> Option<SortComparator>;

    /// Names of the projected columns, empty when entities are returned
    fn projection_columns(&self) -> &[String];
}

/// What to compile: the object-filter equivalent of a query
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    /// Entity type, or `Row` for synthetic tuples
    pub entity: String,
    /// Projected properties; empty returns the instance itself
    pub projections: Vec<PropertyPath>,
    /// Predicate; `None` matches everything
    pub predicate: Option<BooleanExpr>,
    /// Sort order
    pub sort: Vec<SortField>,
}

impl FilterSpec {
    /// Match-everything spec over an entity type
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            projections: Vec::new(),
            predicate: None,
            sort: Vec::new(),
        }
    }

    /// Set the predicate; TRUE is stored as no predicate
    pub fn filter(mut self, predicate: BooleanExpr) -> Self {
        self.predicate = if predicate.is_true() { None } else { Some(predicate) };
        self
    }

    /// Set the projection
    pub fn project(mut self, projections: Vec<PropertyPath>) -> Self {
        self.projections = projections;
        self
    }

    /// Set the sort order
    pub fn sort(mut self, sort: Vec<SortField>) -> Self {
        self.sort = sort;
        self
    }

    /// Whether the compiled filter would accept and return instances unchanged
    pub fn is_pass_through(&self) -> bool {
        self.projections.is_empty() && self.predicate.is_none() && self.sort.is_empty()
    }
}

/// Canonical query text, used as the compiled-filter cache key
impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.projections.is_empty() {
            write!(f, "SELECT ")?;
            write_list(f, &self.projections)?;
            write!(f, " ")?;
        }
        write!(f, "FROM {}", self.entity)?;
        if let Some(predicate) = &self.predicate {
            write!(f, " WHERE {}", predicate)?;
        }
        if !self.sort.is_empty() {
            write!(f, " ORDER BY ")?;
            write_list(f, &self.sort)?;
        }
        Ok(())
    }
}

/// Which engine a filter was compiled for; part of the cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatcherKind {
    /// Filters over entities
    Document,
    /// Filters over synthetic rows with the given column signature
    Row(String),
}

impl fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatcherKind::Document => write!(f, "document"),
            MatcherKind::Row(signature) => write!(f, "row[{}]", signature),
        }
    }
}

/// Object-filter compiler
pub trait Matcher: Send + Sync + fmt::Debug {
    /// Engine kind, used to key the compiled-query cache
    fn kind(&self) -> MatcherKind;

    /// Compile a filter. `accumulators`, aligned with the projections, ask
    /// for a per-instance partial aggregation of multivalued columns.
    fn compile(
        &self,
        spec: &FilterSpec,
        accumulators: Option<&[Option<FieldAccumulator>]>,
    ) -> Result<Arc<dyn ObjectFilter>, FilterError>;
}
