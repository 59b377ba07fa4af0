//! In-memory entity store using DashMap

use crate::document::Document;
use crate::query::filter::Instance;
use crate::query::source::{EntitySource, ResultIterator, SourceError, VecResultIterator};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Entities grouped by type, scanned by unindexed plans
#[derive(Debug, Default)]
pub struct EntityStore {
    entities: DashMap<String, Vec<Arc<Document>>>,
    scans: AtomicUsize,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity of type `entity`
    pub fn insert(&self, entity: &str, document: Document) -> Arc<Document> {
        let document = Arc::new(document);
        self.entities
            .entry(entity.to_string())
            .or_default()
            .push(document.clone());
        document
    }

    /// Add many entities of one type
    pub fn extend(&self, entity: &str, documents: impl IntoIterator<Item = Document>) {
        self.entities
            .entry(entity.to_string())
            .or_default()
            .extend(documents.into_iter().map(Arc::new));
    }

    /// Remove the entity with the same id as `document`
    pub fn remove(&self, entity: &str, document: &Document) -> bool {
        let Some(mut documents) = self.entities.get_mut(entity) else {
            return false;
        };
        let before = documents.len();
        documents.retain(|d| d.id != document.id);
        documents.len() != before
    }

    /// Snapshot of every entity of a type
    pub fn documents(&self, entity: &str) -> Vec<Arc<Document>> {
        self.entities
            .get(entity)
            .map(|documents| documents.value().clone())
            .unwrap_or_default()
    }

    pub fn len(&self, entity: &str) -> usize {
        self.entities.get(entity).map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entities.iter().all(|entry| entry.value().is_empty())
    }

    /// Number of scans served so far
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }
}

impl EntitySource for EntityStore {
    fn scan(&self, entity: &str) -> Result<Box<dyn ResultIterator>, SourceError> {
        self.scans.fetch_add(1, Ordering::Relaxed);
        let items: Vec<Instance> = self.documents(entity).into_iter().map(Instance::Entity).collect();
        trace!(entity, count = items.len(), "Scanning entities");
        Ok(Box::new(VecResultIterator::new(items)))
    }
}
