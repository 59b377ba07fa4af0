//! Query engine facade
//!
//! Wires the collaborators, the shared compiled-query cache and the
//! monitoring stack into a planner, and runs plans to completion.

use crate::cache::QueryCache;
use crate::config::EngineConfig;
use crate::document::Value;
use crate::monitoring::logging::SlowQueryLogger;
use crate::monitoring::metrics::QueryMetrics;
use crate::query::ast::ParsedQuery;
use crate::query::collector::Page;
use crate::query::filter::Matcher;
use crate::query::matcher::DocumentMatcher;
use crate::query::plan::{ExecutionContext, QueryExecutionError, QueryPlan};
use crate::query::planner::{QueryPlanError, QueryPlanner};
use crate::query::source::{EntitySource, IndexSearch, MetadataProvider};
use crate::schema::SchemaRegistry;
use crate::search::MemoryIndex;
use crate::store::EntityStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Errors from planning or running a query
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Planning failed: {0}")]
    Plan(#[from] QueryPlanError),

    #[error("Execution failed: {0}")]
    Execution(#[from] QueryExecutionError),
}

/// External collaborators of the engine
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn EntitySource>,
    /// Index search, `None` for unindexed caches
    pub index: Option<Arc<dyn IndexSearch>>,
    pub metadata: Arc<dyn MetadataProvider>,
    /// Compiler for entity filters
    pub matcher: Arc<dyn Matcher>,
}

/// Plans and executes parsed queries
pub struct QueryEngine {
    planner: QueryPlanner,
    ctx: ExecutionContext,
}

impl QueryEngine {
    /// Create an engine over `collaborators`.
    ///
    /// The cache is shared: engines built with the same cache reuse each
    /// other's compiled filters and classifications.
    pub fn new(
        config: &EngineConfig,
        collaborators: Collaborators,
        cache: Arc<QueryCache>,
        metrics: Arc<QueryMetrics>,
    ) -> Self {
        let ctx = ExecutionContext {
            source: collaborators.source,
            index: collaborators.index,
            matcher: collaborators.matcher,
            cache,
            slow_queries: Arc::new(config.logging.slow_query_logger()),
            metrics,
        };
        let planner = QueryPlanner::new(config.planner.clone(), ctx.clone(), collaborators.metadata);

        info!(
            indexed = ctx.index.is_some(),
            max_expansion_cofactors = config.planner.max_expansion_cofactors,
            cache_entries = ctx.cache.config().max_entries,
            "Query engine created"
        );
        Self { planner, ctx }
    }

    /// Engine over an entity store, indexed by a `MemoryIndex` on `schemas`
    /// when `indexed` is set
    pub fn in_memory(
        config: &EngineConfig,
        store: Arc<EntityStore>,
        schemas: Arc<SchemaRegistry>,
        indexed: bool,
    ) -> Result<Self, prometheus::Error> {
        let metrics = Arc::new(QueryMetrics::new()?);
        let cache = Arc::new(QueryCache::new(config.cache.clone()).with_metrics(metrics.clone()));
        let index = indexed.then(|| Arc::new(MemoryIndex::new(store.clone(), schemas.clone())) as Arc<dyn IndexSearch>);
        let collaborators = Collaborators {
            source: store,
            index,
            metadata: schemas,
            matcher: Arc::new(DocumentMatcher::new()),
        };
        Ok(Self::new(config, collaborators, cache, metrics))
    }

    /// Build the plan for a query without running it
    pub fn plan(
        &self,
        query: &ParsedQuery,
        params: &HashMap<String, Value>,
        offset: usize,
        max_results: Option<usize>,
    ) -> Result<QueryPlan, QueryPlanError> {
        self.planner.build_query(query, params, offset, max_results)
    }

    /// Plan and run a query, returning the requested page and the total
    /// number of matches
    pub fn execute(
        &self,
        query: &ParsedQuery,
        params: &HashMap<String, Value>,
        offset: usize,
        max_results: Option<usize>,
    ) -> Result<Page, EngineError> {
        let mut plan = self.plan(query, params, offset, max_results)?;
        let total = plan.size()?;
        let items = plan.list()?.to_vec();
        Ok(Page { items, total })
    }

    /// Render the plan chosen for a query
    pub fn explain(&self, query: &ParsedQuery, params: &HashMap<String, Value>) -> Result<String, QueryPlanError> {
        Ok(self.plan(query, params, 0, None)?.explain())
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.ctx.cache
    }

    pub fn metrics(&self) -> &Arc<QueryMetrics> {
        &self.ctx.metrics
    }

    pub fn slow_queries(&self) -> &Arc<SlowQueryLogger> {
        &self.ctx.slow_queries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, ValueType};
    use crate::query::ast::{BooleanExpr, SortField, ValueExpr};
    use crate::query::filter::Instance;
    use crate::query::plan::PlanKind;
    use crate::schema::{EntitySchema, FieldDefinition};

    fn engine(indexed: bool) -> QueryEngine {
        let store = Arc::new(EntityStore::new());
        for (name, age) in [("Ann", 41), ("Bob", 25), ("Cid", 35)] {
            store.insert("Person", Document::new().with("name", name).with("age", age));
        }
        let schemas = SchemaRegistry::new().with(
            EntitySchema::new("Person")
                .field("name", FieldDefinition::new(ValueType::String).indexed().sortable().projectable())
                .field("age", FieldDefinition::new(ValueType::Int32)),
        );
        QueryEngine::in_memory(&EngineConfig::default(), store, Arc::new(schemas), indexed).unwrap()
    }

    #[test]
    fn test_execute_page() {
        let engine = engine(true);
        let query = ParsedQuery::from_entity("Person")
            .filter(BooleanExpr::gt("age", 30i32))
            .select(vec![ValueExpr::property("name")])
            .order_by(vec![SortField::desc("name")]);

        let page = engine.execute(&query, &HashMap::new(), 0, Some(1)).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items, vec![Instance::Row(vec![Value::from("Cid")])]);
        assert_eq!(engine.metrics().plans_built(PlanKind::InMemory.as_str()), 1);
    }

    #[test]
    fn test_errors_are_wrapped() {
        let engine = engine(false);
        let query = ParsedQuery::from_entity("Person").filter(BooleanExpr::full_text("name", "ann"));
        assert_eq!(
            engine.execute(&query, &HashMap::new(), 0, None).unwrap_err(),
            EngineError::Plan(QueryPlanError::FullTextRequiresIndex)
        );
    }

    #[test]
    fn test_explain() {
        let engine = engine(true);
        let query = ParsedQuery::from_entity("Person").filter(BooleanExpr::eq("name", "Ann"));
        assert!(engine.explain(&query, &HashMap::new()).unwrap().starts_with("Indexed"));
    }
}
