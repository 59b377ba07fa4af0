//! Executable query plans
//!
//! A `QueryPlan` is built once by the planner and materialized lazily: the
//! first `list()` or `size()` runs it and memoizes the page, `reset()` drops
//! the page and the compiled filters so the next call runs it again. Every
//! variant hands its results to the top-K collector.
//!
//! Wrapped plans are consumed as streams when they neither sort nor
//! paginate, so a Hybrid over an Indexed plan never materializes the index
//! hits. Index and scan iterators are owned by drop guards and closed on
//! every exit path.

use super::aggregation::{accumulator_signature, FieldAccumulator};
use super::collector::{collect_page, Page, ScopedIterator};
use super::filter::{FilterError, FilterResult, FilterSpec, Instance, Matcher, ObjectFilter};
use super::grouper::Grouper;
use super::source::{EntitySource, IndexQuery, IndexSearch, SourceError};
use crate::cache::{ArtifactKind, CacheKey, QueryCache};
use crate::document::Value;
use crate::monitoring::logging::SlowQueryLogger;
use crate::monitoring::metrics::QueryMetrics;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

/// Plan execution errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryExecutionError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("No index search is available for entity type {0}")]
    IndexUnavailable(String),

    #[error("Aggregation failed: {0}")]
    Aggregation(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),
}

/// Collaborators and shared state every plan executes against
#[derive(Clone)]
pub struct ExecutionContext {
    pub source: Arc<dyn EntitySource>,
    /// Index search, `None` when the cache is not indexed
    pub index: Option<Arc<dyn IndexSearch>>,
    /// Compiler for filters over entities
    pub matcher: Arc<dyn Matcher>,
    pub cache: Arc<QueryCache>,
    pub slow_queries: Arc<SlowQueryLogger>,
    pub metrics: Arc<QueryMetrics>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("indexed", &self.index.is_some())
            .field("matcher", &self.matcher.kind())
            .finish_non_exhaustive()
    }
}

/// Plan variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanKind {
    Empty,
    InMemory,
    Indexed,
    Hybrid,
    Aggregating,
}

impl PlanKind {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanKind::Empty => "empty",
            PlanKind::InMemory => "in_memory",
            PlanKind::Indexed => "indexed",
            PlanKind::Hybrid => "hybrid",
            PlanKind::Aggregating => "aggregating",
        }
    }
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A filter spec together with the matcher that compiles it.
///
/// Compilation goes through the compiled-query cache and the result is kept
/// until the owning plan is reset.
#[derive(Debug)]
pub struct FilterSlot {
    spec: FilterSpec,
    matcher: Arc<dyn Matcher>,
    accumulators: Option<Vec<Option<FieldAccumulator>>>,
    compiled: Option<Arc<dyn ObjectFilter>>,
}

impl FilterSlot {
    pub fn new(spec: FilterSpec, matcher: Arc<dyn Matcher>) -> Self {
        Self {
            spec,
            matcher,
            accumulators: None,
            compiled: None,
        }
    }

    /// Partially aggregate projections, aligned with the spec's projections
    pub fn with_accumulators(mut self, accumulators: Vec<Option<FieldAccumulator>>) -> Self {
        self.accumulators = Some(accumulators);
        self
    }

    pub fn spec(&self) -> &FilterSpec {
        &self.spec
    }

    pub fn accumulators(&self) -> Option<&[Option<FieldAccumulator>]> {
        self.accumulators.as_deref()
    }

    /// Cache key of the compiled filter
    pub fn cache_key(&self) -> CacheKey {
        let key = CacheKey::new(self.spec.to_string(), ArtifactKind::Filter(self.matcher.kind()));
        match &self.accumulators {
            Some(accumulators) => key.with_accumulators(accumulator_signature(accumulators)),
            None => key,
        }
    }

    fn compiled(&mut self, cache: &QueryCache) -> Result<Arc<dyn ObjectFilter>, FilterError> {
        if let Some(filter) = &self.compiled {
            return Ok(filter.clone());
        }
        let key = self.cache_key();
        let (spec, matcher, accumulators) = (&self.spec, &self.matcher, self.accumulators.as_deref());
        let filter = cache.get_or_compile(key, || matcher.compile(spec, accumulators))?;
        self.compiled = Some(filter.clone());
        Ok(filter)
    }

    fn reset(&mut self) {
        self.compiled = None;
    }
}

/// Grouping performed by an Aggregating plan
#[derive(Debug, Clone, PartialEq)]
pub struct GroupingSpec {
    /// Number of leading group-key columns
    pub grouping_columns: usize,
    pub accumulators: Vec<FieldAccumulator>,
    /// Inputs are per-entity partials rather than raw values
    pub two_phase: bool,
    /// Width of the emitted rows
    pub width: usize,
}

#[derive(Debug)]
enum PlanNode {
    Empty,
    InMemory {
        filter: FilterSlot,
    },
    Indexed {
        query: IndexQuery,
        /// Requested projection position to deduplicated index column
        row_map: Option<Vec<usize>>,
    },
    Hybrid {
        base: Box<QueryPlan>,
        residual: FilterSlot,
    },
    Aggregating {
        base: Box<QueryPlan>,
        grouping: GroupingSpec,
        row_filter: FilterSlot,
    },
}

impl PlanNode {
    fn kind(&self) -> PlanKind {
        match self {
            PlanNode::Empty => PlanKind::Empty,
            PlanNode::InMemory { .. } => PlanKind::InMemory,
            PlanNode::Indexed { .. } => PlanKind::Indexed,
            PlanNode::Hybrid { .. } => PlanKind::Hybrid,
            PlanNode::Aggregating { .. } => PlanKind::Aggregating,
        }
    }
}

type InstanceStream = Box<dyn Iterator<Item = Result<Instance, QueryExecutionError>>>;

struct Stream {
    items: InstanceStream,
    /// Match count ignoring pagination, when known without draining
    total: Option<usize>,
}

impl Stream {
    fn from_page(page: Page) -> Self {
        Self {
            total: Some(page.total),
            items: Box::new(page.items.into_iter().map(Ok)),
        }
    }
}

/// Executable, lazily materialized query plan
#[derive(Debug)]
pub struct QueryPlan {
    query_text: String,
    entity: String,
    node: PlanNode,
    offset: usize,
    max_results: Option<usize>,
    ctx: ExecutionContext,
    results: Option<Page>,
}

impl QueryPlan {
    fn build(
        ctx: ExecutionContext,
        entity: String,
        query_text: String,
        node: PlanNode,
        offset: usize,
        max_results: Option<usize>,
    ) -> Self {
        Self {
            query_text,
            entity,
            node,
            offset,
            max_results,
            ctx,
            results: None,
        }
    }

    /// Plan that returns nothing
    pub fn empty(ctx: ExecutionContext, entity: impl Into<String>) -> Self {
        let entity = entity.into();
        let text = format!("FROM {} WHERE FALSE", entity);
        Self::build(ctx, entity, text, PlanNode::Empty, 0, Some(0))
    }

    /// Scan every entity and filter in memory
    pub fn in_memory(
        ctx: ExecutionContext,
        filter: FilterSlot,
        offset: usize,
        max_results: Option<usize>,
    ) -> Self {
        let entity = filter.spec.entity.clone();
        let text = filter.spec.to_string();
        Self::build(ctx, entity, text, PlanNode::InMemory { filter }, offset, max_results)
    }

    /// Answer entirely from the index. Pagination is part of `query`.
    pub fn indexed(ctx: ExecutionContext, query: IndexQuery, row_map: Option<Vec<usize>>) -> Self {
        let (offset, max_results) = (query.first_result, query.max_results);
        Self::build(
            ctx,
            query.entity.clone(),
            query.to_string(),
            PlanNode::Indexed { query, row_map },
            offset,
            max_results,
        )
    }

    /// Re-check, project and sort the results of `base` in memory
    pub fn hybrid(
        ctx: ExecutionContext,
        base: QueryPlan,
        residual: FilterSlot,
        offset: usize,
        max_results: Option<usize>,
    ) -> Self {
        let entity = residual.spec.entity.clone();
        let text = residual.spec.to_string();
        let node = PlanNode::Hybrid {
            base: Box::new(base),
            residual,
        };
        Self::build(ctx, entity, text, node, offset, max_results)
    }

    /// Group the rows of `base`, then filter, sort and paginate the groups.
    ///
    /// `base` must produce projected rows.
    pub fn aggregating(
        ctx: ExecutionContext,
        base: QueryPlan,
        grouping: GroupingSpec,
        row_filter: FilterSlot,
        offset: usize,
        max_results: Option<usize>,
    ) -> Result<Self, QueryExecutionError> {
        if !base.projects() {
            return Err(QueryExecutionError::InvalidPlan(format!(
                "aggregation base must project, got {}",
                base.query_text
            )));
        }
        let entity = base.entity.clone();
        let text = row_filter.spec.to_string();
        let node = PlanNode::Aggregating {
            base: Box::new(base),
            grouping,
            row_filter,
        };
        Ok(Self::build(ctx, entity, text, node, offset, max_results))
    }

    /// Replace the text reported in logs, usually with the original query
    pub fn with_query_text(mut self, text: impl Into<String>) -> Self {
        self.query_text = text.into();
        self
    }

    pub fn kind(&self) -> PlanKind {
        self.node.kind()
    }

    pub fn query_text(&self) -> &str {
        &self.query_text
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn max_results(&self) -> Option<usize> {
        self.max_results
    }

    /// Wrapped plan of a Hybrid or Aggregating plan
    pub fn base(&self) -> Option<&QueryPlan> {
        match &self.node {
            PlanNode::Hybrid { base, .. } | PlanNode::Aggregating { base, .. } => Some(base),
            _ => None,
        }
    }

    /// Query sent to the index by an Indexed plan
    pub fn index_query(&self) -> Option<&IndexQuery> {
        match &self.node {
            PlanNode::Indexed { query, .. } => Some(query),
            _ => None,
        }
    }

    /// In-memory filter: the scan filter, the residual or the row filter
    pub fn filter(&self) -> Option<&FilterSlot> {
        match &self.node {
            PlanNode::InMemory { filter } => Some(filter),
            PlanNode::Hybrid { residual, .. } => Some(residual),
            PlanNode::Aggregating { row_filter, .. } => Some(row_filter),
            _ => None,
        }
    }

    pub fn grouping(&self) -> Option<&GroupingSpec> {
        match &self.node {
            PlanNode::Aggregating { grouping, .. } => Some(grouping),
            _ => None,
        }
    }

    /// Whether results are memoized
    pub fn is_materialized(&self) -> bool {
        self.results.is_some()
    }

    fn projects(&self) -> bool {
        match &self.node {
            PlanNode::Empty | PlanNode::Aggregating { .. } => true,
            PlanNode::InMemory { filter } => !filter.spec.projections.is_empty(),
            PlanNode::Indexed { query, .. } => query.projection.is_some(),
            PlanNode::Hybrid { base, residual } => !residual.spec.projections.is_empty() || base.projects(),
        }
    }

    /// The requested page, materialized on first use
    pub fn list(&mut self) -> Result<&[Instance], QueryExecutionError> {
        Ok(&self.materialize()?.items)
    }

    /// Number of matches ignoring pagination
    pub fn size(&mut self) -> Result<usize, QueryExecutionError> {
        Ok(self.materialize()?.total)
    }

    /// Discard memoized results and compiled filters, keeping the plan shape
    pub fn reset(&mut self) {
        self.results = None;
        match &mut self.node {
            PlanNode::Empty | PlanNode::Indexed { .. } => {}
            PlanNode::InMemory { filter } => filter.reset(),
            PlanNode::Hybrid { base, residual } => {
                residual.reset();
                base.reset();
            }
            PlanNode::Aggregating { base, row_filter, .. } => {
                row_filter.reset();
                base.reset();
            }
        }
    }

    /// Render the plan tree, one node per line
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_into(&mut out, 0);
        out
    }

    fn explain_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let page = match (self.offset, self.max_results) {
            (0, None) => String::new(),
            (offset, None) => format!(" [offset={}]", offset),
            (offset, Some(max)) => format!(" [offset={}, max={}]", offset, max),
        };
        let _ = match &self.node {
            PlanNode::Empty => writeln!(out, "{}Empty: {}", indent, self.entity),
            PlanNode::InMemory { filter } => writeln!(out, "{}InMemory{}: {}", indent, page, filter.spec),
            PlanNode::Indexed { query, .. } => writeln!(out, "{}Indexed: {}", indent, query),
            PlanNode::Hybrid { residual, .. } => {
                writeln!(out, "{}Hybrid{}: {}", indent, page, residual.spec)
            }
            PlanNode::Aggregating {
                grouping,
                row_filter,
                ..
            } => {
                let accumulators: Vec<String> = grouping.accumulators.iter().map(ToString::to_string).collect();
                writeln!(
                    out,
                    "{}Aggregating{}: groups={} accumulators=[{}] two_phase={} filter: {}",
                    indent,
                    page,
                    grouping.grouping_columns,
                    accumulators.join(", "),
                    grouping.two_phase,
                    row_filter.spec
                )
            }
        };
        if let Some(base) = self.base() {
            base.explain_into(out, depth + 1);
        }
    }

    fn materialize(&mut self) -> Result<&Page, QueryExecutionError> {
        let QueryPlan {
            query_text,
            entity,
            node,
            offset,
            max_results,
            ctx,
            results,
        } = self;

        let page = match results.take() {
            Some(page) => page,
            None => {
                let kind = node.kind();
                let tracker = ctx
                    .slow_queries
                    .start_query(query_text.as_str(), entity.as_str(), kind.as_str());
                let outcome = execute(node, ctx, *offset, *max_results);
                let elapsed = ctx.slow_queries.finish_query(tracker);

                match outcome {
                    Ok(page) => {
                        ctx.metrics.record_execution(kind.as_str(), elapsed);
                        debug!(
                            plan = %kind,
                            entity = %entity,
                            returned = page.items.len(),
                            total = page.total,
                            elapsed_us = elapsed.as_micros() as u64,
                            "Plan materialized"
                        );
                        page
                    }
                    Err(e) => {
                        ctx.metrics.record_error();
                        return Err(e);
                    }
                }
            }
        };

        Ok(results.insert(page))
    }

    // Results as a stream, without materializing when nothing needs sorting or paging
    fn stream(&mut self) -> Result<Stream, QueryExecutionError> {
        if self.results.is_none() && self.offset == 0 && self.max_results.is_none() {
            if let Some(stream) = open_stream(&mut self.node, &self.ctx)? {
                return Ok(stream);
            }
        }
        let page = self.materialize()?.clone();
        Ok(Stream::from_page(page))
    }
}

fn scan(ctx: &ExecutionContext, entity: &str) -> Result<InstanceStream, QueryExecutionError> {
    let iterator = ScopedIterator::new(ctx.source.scan(entity)?);
    Ok(Box::new(iterator.map(|item| item.map_err(QueryExecutionError::from))))
}

fn search(
    ctx: &ExecutionContext,
    query: &IndexQuery,
    row_map: Option<&[usize]>,
) -> Result<Stream, QueryExecutionError> {
    let index = ctx
        .index
        .as_ref()
        .ok_or_else(|| QueryExecutionError::IndexUnavailable(query.entity.clone()))?;
    let hits = index.execute(query)?;
    debug!(query = %query, total = hits.total, "Index search");

    let total = hits.total;
    let row_map = row_map.map(<[usize]>::to_vec);
    let iterator = ScopedIterator::new(hits.iterator);
    let items = iterator.map(move |item| {
        item.map(|instance| remap(instance, row_map.as_deref()))
            .map_err(QueryExecutionError::from)
    });
    Ok(Stream {
        items: Box::new(items),
        total: Some(total),
    })
}

fn remap(instance: Instance, row_map: Option<&[usize]>) -> Instance {
    match (instance, row_map) {
        (Instance::Row(values), Some(map)) => Instance::Row(
            map.iter()
                .map(|&column| values.get(column).cloned().unwrap_or(Value::Null))
                .collect(),
        ),
        (instance, _) => instance,
    }
}

fn filtered(
    items: InstanceStream,
    filter: Arc<dyn ObjectFilter>,
) -> impl Iterator<Item = Result<FilterResult, QueryExecutionError>> {
    items.filter_map(move |item| match item {
        Ok(instance) => filter.filter(&instance).map(Ok),
        Err(e) => Some(Err(e)),
    })
}

fn payloads(results: impl Iterator<Item = Result<FilterResult, QueryExecutionError>> + 'static) -> InstanceStream {
    Box::new(results.map(|result| result.map(|r| r.payload)))
}

fn open_stream(node: &mut PlanNode, ctx: &ExecutionContext) -> Result<Option<Stream>, QueryExecutionError> {
    Ok(match node {
        PlanNode::Empty => Some(Stream::from_page(Page::empty())),
        PlanNode::Indexed { query, row_map } => Some(search(ctx, query, row_map.as_deref())?),
        PlanNode::InMemory { filter } if filter.spec.sort.is_empty() => {
            let compiled = filter.compiled(&ctx.cache)?;
            let items = scan(ctx, &filter.spec.entity)?;
            Some(Stream {
                items: payloads(filtered(items, compiled)),
                total: None,
            })
        }
        PlanNode::Hybrid { base, residual } if residual.spec.sort.is_empty() => {
            let base_stream = base.stream()?;
            let compiled = residual.compiled(&ctx.cache)?;
            let total = if residual.spec.predicate.is_none() {
                base_stream.total
            } else {
                None
            };
            Some(Stream {
                items: payloads(filtered(base_stream.items, compiled)),
                total,
            })
        }
        _ => None,
    })
}

fn execute(
    node: &mut PlanNode,
    ctx: &ExecutionContext,
    offset: usize,
    max_results: Option<usize>,
) -> Result<Page, QueryExecutionError> {
    match node {
        PlanNode::Empty => Ok(Page::empty()),
        PlanNode::InMemory { filter } => {
            let compiled = filter.compiled(&ctx.cache)?;
            let comparator = compiled.comparator();
            let items = scan(ctx, &filter.spec.entity)?;
            collect_page(filtered(items, compiled), comparator.as_ref(), offset, max_results)
        }
        PlanNode::Indexed { query, row_map } => {
            let stream = search(ctx, query, row_map.as_deref())?;
            let items = stream.items.collect::<Result<Vec<_>, _>>()?;
            let total = stream.total.unwrap_or(items.len());
            Ok(Page { items, total })
        }
        PlanNode::Hybrid { base, residual } => {
            let base_stream = base.stream()?;
            let compiled = residual.compiled(&ctx.cache)?;
            let comparator = compiled.comparator();
            let mut page = collect_page(
                filtered(base_stream.items, compiled),
                comparator.as_ref(),
                offset,
                max_results,
            )?;
            // a predicate-free residual over a paginated base keeps the base's count
            if residual.spec.predicate.is_none() {
                if let Some(total) = base_stream.total {
                    page.total = total;
                }
            }
            Ok(page)
        }
        PlanNode::Aggregating {
            base,
            grouping,
            row_filter,
        } => {
            let base_stream = base.stream()?;
            let mut grouper = Grouper::new(
                grouping.grouping_columns,
                grouping.accumulators.clone(),
                grouping.two_phase,
                grouping.width,
            );
            for item in base_stream.items {
                match item? {
                    Instance::Row(row) => grouper.add(&row),
                    Instance::Entity(doc) => {
                        return Err(QueryExecutionError::Aggregation(format!(
                            "expected a projected row, got entity {}",
                            doc.id
                        )))
                    }
                }
            }
            debug!(groups = grouper.group_count(), two_phase = grouping.two_phase, "Grouping complete");

            let compiled = row_filter.compiled(&ctx.cache)?;
            let comparator = compiled.comparator();
            let results = grouper
                .finish()
                .into_iter()
                .filter_map(|row| compiled.filter(&Instance::Row(row)).map(Ok));
            collect_page(results, comparator.as_ref(), offset, max_results)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryCacheConfig;
    use crate::document::{Document, ValueType};
    use crate::query::aggregation::ColumnMetadata;
    use crate::query::ast::{AggregationFunction, BooleanExpr, PropertyPath, SortField};
    use crate::query::matcher::{DocumentMatcher, RowMatcher};
    use crate::query::source::{IndexHits, ResultIterator, VecResultIterator};
    use crate::store::EntityStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> Arc<EntityStore> {
        let store = EntityStore::new();
        for (name, age, dept) in [("Ann", 41, "eng"), ("Bob", 25, "ops"), ("Cid", 35, "eng"), ("Dee", 52, "ops")] {
            store.insert("Person", Document::new().with("name", name).with("age", age).with("dept", dept));
        }
        Arc::new(store)
    }

    fn context(store: Arc<EntityStore>, index: Option<Arc<dyn IndexSearch>>) -> ExecutionContext {
        ExecutionContext {
            source: store,
            index,
            matcher: Arc::new(DocumentMatcher::new()),
            cache: Arc::new(QueryCache::new(QueryCacheConfig::default())),
            slow_queries: Arc::new(SlowQueryLogger::disabled()),
            metrics: Arc::new(QueryMetrics::new().unwrap()),
        }
    }

    fn slot(ctx: &ExecutionContext, spec: FilterSpec) -> FilterSlot {
        FilterSlot::new(spec, ctx.matcher.clone())
    }

    fn names(items: &[Instance]) -> Vec<String> {
        items
            .iter()
            .map(|i| match i {
                Instance::Row(row) => row[0].to_string(),
                Instance::Entity(doc) => doc.get("name").map(ToString::to_string).unwrap_or_default(),
            })
            .collect()
    }

    #[test]
    fn test_in_memory_is_memoized() {
        let store = store();
        let ctx = context(store.clone(), None);
        let spec = FilterSpec::new("Person")
            .filter(BooleanExpr::gt("age", 30i32))
            .project(vec![PropertyPath::parse("name")])
            .sort(vec![SortField::asc("name")]);
        let mut plan = QueryPlan::in_memory(ctx.clone(), slot(&ctx, spec), 0, None);

        let first = plan.list().unwrap().to_vec();
        assert_eq!(names(&first), vec!["'Ann'", "'Cid'", "'Dee'"]);
        assert_eq!(plan.size().unwrap(), 3);
        assert_eq!(plan.list().unwrap(), &first[..]);
        assert_eq!(store.scan_count(), 1);

        plan.reset();
        assert!(!plan.is_materialized());
        assert_eq!(plan.list().unwrap(), &first[..]);
        assert_eq!(store.scan_count(), 2);
        assert_eq!(ctx.metrics.executions("in_memory"), 2);
    }

    #[test]
    fn test_empty_plan() {
        let store = store();
        let mut plan = QueryPlan::empty(context(store.clone(), None), "Person");
        assert_eq!(plan.size().unwrap(), 0);
        assert!(plan.list().unwrap().is_empty());
        assert_eq!(store.scan_count(), 0);
    }

    #[derive(Default)]
    struct RecordingIndex {
        closed: Arc<AtomicUsize>,
    }

    struct Hits {
        inner: VecResultIterator,
        closed: Arc<AtomicUsize>,
    }

    impl Iterator for Hits {
        type Item = Result<Instance, SourceError>;
        fn next(&mut self) -> Option<Self::Item> {
            self.inner.next()
        }
    }

    impl ResultIterator for Hits {
        fn close(&mut self) -> Result<(), SourceError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    // Returns every person whose dept is 'eng', paginated, with a fixed total
    impl IndexSearch for RecordingIndex {
        fn execute(&self, query: &IndexQuery) -> Result<IndexHits, SourceError> {
            let people = vec![
                Instance::from(Document::new().with("name", "Ann").with("age", 41).with("dept", "eng")),
                Instance::from(Document::new().with("name", "Cid").with("age", 35).with("dept", "eng")),
                Instance::from(Document::new().with("name", "Eve").with("age", 19).with("dept", "eng")),
            ];
            let page: Vec<Instance> = people
                .into_iter()
                .skip(query.first_result)
                .take(query.max_results.unwrap_or(usize::MAX))
                .collect();
            Ok(IndexHits {
                total: 3,
                iterator: Box::new(Hits {
                    inner: VecResultIterator::new(page),
                    closed: self.closed.clone(),
                }),
            })
        }
    }

    #[test]
    fn test_hybrid_rechecks_index_hits() {
        let index = Arc::new(RecordingIndex::default());
        let closed = index.closed.clone();
        let ctx = context(store(), Some(index as Arc<dyn IndexSearch>));

        let base = QueryPlan::indexed(ctx.clone(), IndexQuery::new("Person", BooleanExpr::eq("dept", "eng")), None);
        let residual = FilterSpec::new("Person")
            .filter(BooleanExpr::and(vec![BooleanExpr::eq("dept", "eng"), BooleanExpr::gt("age", 30i32)]))
            .project(vec![PropertyPath::parse("name")]);
        let mut plan = QueryPlan::hybrid(ctx.clone(), base, slot(&ctx, residual), 0, None);

        assert_eq!(names(plan.list().unwrap()), vec!["'Ann'", "'Cid'"]);
        assert_eq!(plan.size().unwrap(), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(!plan.base().unwrap().is_materialized());
    }

    #[test]
    fn test_projection_only_hybrid_keeps_index_total() {
        let ctx = context(store(), Some(Arc::new(RecordingIndex::default()) as Arc<dyn IndexSearch>));
        let query = IndexQuery::new("Person", BooleanExpr::eq("dept", "eng")).page(1, Some(1));
        let base = QueryPlan::indexed(ctx.clone(), query, None);
        let residual = FilterSpec::new("Person").project(vec![PropertyPath::parse("name")]);
        let mut plan = QueryPlan::hybrid(ctx.clone(), base, slot(&ctx, residual), 0, None);

        assert_eq!(names(plan.list().unwrap()), vec!["'Cid'"]);
        assert_eq!(plan.size().unwrap(), 3);
    }

    #[test]
    fn test_indexed_row_map() {
        struct Rows;
        impl IndexSearch for Rows {
            fn execute(&self, _query: &IndexQuery) -> Result<IndexHits, SourceError> {
                let rows = vec![Instance::Row(vec![Value::from("Ann"), Value::Int32(41)])];
                Ok(IndexHits {
                    total: 1,
                    iterator: Box::new(VecResultIterator::new(rows)),
                })
            }
        }

        let ctx = context(store(), Some(Arc::new(Rows) as Arc<dyn IndexSearch>));
        let query = IndexQuery::new("Person", BooleanExpr::TRUE)
            .project(vec![PropertyPath::parse("name"), PropertyPath::parse("age")]);
        let mut plan = QueryPlan::indexed(ctx, query, Some(vec![1, 0, 1]));
        assert_eq!(
            plan.list().unwrap(),
            &[Instance::Row(vec![Value::Int32(41), Value::from("Ann"), Value::Int32(41)])]
        );
    }

    #[test]
    fn test_indexed_without_index_fails() {
        let ctx = context(store(), None);
        let mut plan = QueryPlan::indexed(ctx.clone(), IndexQuery::new("Person", BooleanExpr::TRUE), None);
        assert_eq!(
            plan.list().unwrap_err(),
            QueryExecutionError::IndexUnavailable("Person".to_string())
        );
        assert!(!plan.is_materialized());
    }

    fn aggregation(ctx: &ExecutionContext, base: QueryPlan) -> Result<QueryPlan, QueryExecutionError> {
        let columns = vec![
            ColumnMetadata::new(0, ValueType::String),
            ColumnMetadata::new(1, ValueType::Float64),
        ];
        let grouping = GroupingSpec {
            grouping_columns: 1,
            accumulators: vec![FieldAccumulator::new(AggregationFunction::Avg, 1, 1, ValueType::Float64)],
            two_phase: false,
            width: 2,
        };
        let row_filter = FilterSpec::new("Person")
            .project(vec![PropertyPath::parse("C0"), PropertyPath::parse("C1")])
            .sort(vec![SortField::asc("C0")]);
        QueryPlan::aggregating(
            ctx.clone(),
            base,
            grouping,
            FilterSlot::new(row_filter, Arc::new(RowMatcher::new(columns))),
            0,
            None,
        )
    }

    #[test]
    fn test_aggregating_plan() {
        let ctx = context(store(), None);
        let base_spec = FilterSpec::new("Person").project(vec![PropertyPath::parse("dept"), PropertyPath::parse("age")]);
        let base = QueryPlan::in_memory(ctx.clone(), slot(&ctx, base_spec), 0, None);
        let mut plan = aggregation(&ctx, base).unwrap();

        assert_eq!(
            plan.list().unwrap(),
            &[
                Instance::Row(vec![Value::from("eng"), Value::Float64(38.0)]),
                Instance::Row(vec![Value::from("ops"), Value::Float64(38.5)]),
            ]
        );
        assert!(plan.explain().contains("AVG(C1->C1)"));
    }

    #[test]
    fn test_aggregating_requires_projecting_base() {
        let ctx = context(store(), None);
        let base = QueryPlan::in_memory(ctx.clone(), slot(&ctx, FilterSpec::new("Person")), 0, None);
        assert!(matches!(aggregation(&ctx, base), Err(QueryExecutionError::InvalidPlan(_))));
    }

    #[test]
    fn test_compiled_filters_come_from_cache() {
        let ctx = context(store(), None);
        let spec = FilterSpec::new("Person").filter(BooleanExpr::gt("age", 30i32));
        let mut first = QueryPlan::in_memory(ctx.clone(), slot(&ctx, spec.clone()), 0, None);
        let mut second = QueryPlan::in_memory(ctx.clone(), slot(&ctx, spec), 0, None);
        first.size().unwrap();
        second.size().unwrap();
        assert_eq!(ctx.cache.stats().hits(), 1);
        assert_eq!(ctx.cache.len(), 1);
    }

    #[test]
    fn test_explain_tree() {
        let ctx = context(store(), Some(Arc::new(RecordingIndex::default()) as Arc<dyn IndexSearch>));
        let base = QueryPlan::indexed(ctx.clone(), IndexQuery::new("Person", BooleanExpr::eq("dept", "eng")), None);
        let residual = FilterSpec::new("Person").filter(BooleanExpr::gt("age", 30i32));
        let plan = QueryPlan::hybrid(ctx.clone(), base, slot(&ctx, residual), 5, Some(10));
        assert_eq!(
            plan.explain(),
            "Hybrid [offset=5, max=10]: FROM Person WHERE age > 30\n  Indexed: FROM Person WHERE dept = 'eng'\n"
        );
    }
}
