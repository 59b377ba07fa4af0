//! In-memory index search
//!
//! Answers `IndexQuery`s over an `EntityStore` for the entity types of a
//! `SchemaRegistry`. It only accepts what the schema declares: predicates
//! over indexed paths, sorts on sortable paths and projections of
//! projectable paths. Anything else is rejected, so a plan that pushes an
//! unindexed predicate down fails loudly instead of silently scanning.

use crate::query::ast::{BooleanExpr, PropertyPath};
use crate::query::collector::collect_page;
use crate::query::filter::{FilterSpec, Instance, Matcher};
use crate::query::matcher::DocumentMatcher;
use crate::query::source::{IndexHits, IndexQuery, IndexSearch, SourceError, VecResultIterator};
use crate::schema::{FieldIndexMetadata, SchemaRegistry};
use crate::store::EntityStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Index search over an entity store
#[derive(Debug)]
pub struct MemoryIndex {
    store: Arc<EntityStore>,
    schemas: Arc<SchemaRegistry>,
    matcher: DocumentMatcher,
    queries: AtomicUsize,
    last_query: Mutex<Option<IndexQuery>>,
}

impl MemoryIndex {
    pub fn new(store: Arc<EntityStore>, schemas: Arc<SchemaRegistry>) -> Self {
        Self {
            store,
            schemas,
            matcher: DocumentMatcher::new(),
            queries: AtomicUsize::new(0),
            last_query: Mutex::new(None),
        }
    }

    /// Number of queries executed
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    /// Most recently executed query
    pub fn last_query(&self) -> Option<IndexQuery> {
        self.last_query.lock().clone()
    }

    fn validate(&self, query: &IndexQuery, metadata: &dyn FieldIndexMetadata) -> Result<(), SourceError> {
        let reject = |path: &PropertyPath, usage| SourceError::FieldNotIndexed {
            path: path.to_string(),
            usage,
        };

        let mut unindexed = None;
        query.predicate.for_each_atom(&mut |atom| {
            if let Some(path) = atom.atom_path() {
                if unindexed.is_none() && !metadata.is_indexed(path) {
                    unindexed = Some(path.clone());
                }
            }
        });
        if let Some(path) = unindexed {
            return Err(reject(&path, "searched"));
        }

        if let Some(field) = query.sort.iter().find(|s| !metadata.is_sortable(s.expr.path())) {
            return Err(reject(field.expr.path(), "sorted"));
        }
        if let Some(path) = query
            .projection
            .iter()
            .flatten()
            .find(|p| !metadata.is_projectable(p))
        {
            return Err(reject(path, "projected"));
        }
        Ok(())
    }
}

impl IndexSearch for MemoryIndex {
    fn execute(&self, query: &IndexQuery) -> Result<IndexHits, SourceError> {
        let metadata = self
            .schemas
            .get(&query.entity)
            .ok_or_else(|| SourceError::UnknownEntity(query.entity.clone()))?;
        self.validate(query, metadata)?;

        self.queries.fetch_add(1, Ordering::Relaxed);
        *self.last_query.lock() = Some(query.clone());

        let spec = FilterSpec::new(query.entity.as_str())
            .filter(query.predicate.clone())
            .project(query.projection.clone().unwrap_or_default())
            .sort(query.sort.clone());
        let filter = self
            .matcher
            .compile(&spec, None)
            .map_err(|e| SourceError::IndexSearch(e.to_string()))?;

        let documents = self.store.documents(&query.entity);
        let results = documents
            .into_iter()
            .filter_map(|document| filter.filter(&Instance::Entity(document)))
            .map(Ok::<_, SourceError>);
        let page = collect_page(results, filter.comparator().as_ref(), query.first_result, query.max_results)?;

        debug!(query = %query, total = page.total, returned = page.items.len(), "Index search");
        Ok(IndexHits {
            total: page.total,
            iterator: Box::new(VecResultIterator::with_total(page.items, page.total)),
        })
    }
}
