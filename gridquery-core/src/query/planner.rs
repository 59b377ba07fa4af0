//! Query planner
//!
//! Turns a parsed query into an executable [`QueryPlan`]. Plain selections
//! are routed by the Shannon expansion of their WHERE clause onto the index
//! capabilities of the target entity:
//!
//! | expansion     | plan                                              |
//! |---------------|---------------------------------------------------|
//! | identity      | Indexed, possibly wrapped by a projecting Hybrid  |
//! | TRUE          | InMemory                                          |
//! | narrowed `E`  | Hybrid(Indexed(E), full predicate)                |
//! | FALSE         | Empty                                             |
//!
//! Grouping and aggregation queries are rewritten into phases that exchange
//! synthetic rows; see [`QueryPlanner::build_query`].

use super::aggregation::{ColumnMetadata, FieldAccumulator};
use super::ast::{
    AggregationFunction, BooleanExpr, MissingParameter, ParsedQuery, PropertyPath, SortField,
    StatementKind, ValueExpr,
};
use super::expansion::{BooleanShannonExpansion, Expansion, DEFAULT_MAX_EXPANSION_COFACTORS};
use super::filter::FilterSpec;
use super::matcher::RowMatcher;
use super::normalizer::BooleanNormalizer;
use super::plan::{ExecutionContext, FilterSlot, GroupingSpec, QueryPlan};
use super::source::{IndexQuery, MetadataProvider};
use crate::cache::{ArtifactKind, CacheKey};
use crate::document::{Value, ValueType};
use crate::schema::FieldIndexMetadata;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Fatal planning errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryPlanError {
    #[error("Full-text predicates require an indexed cache")]
    FullTextRequiresIndex,

    #[error("Multivalued property '{0}' cannot be used in ORDER BY")]
    MultivaluedInOrderBy(String),

    #[error("Multivalued property '{0}' cannot be projected")]
    MultivaluedProjection(String),

    #[error("Multivalued property '{0}' cannot be used in GROUP BY")]
    MultivaluedGroupBy(String),

    #[error("Grouping and aggregation require a projection")]
    AggregationRequiresProjection,

    #[error("Aggregation '{0}' cannot be used in GROUP BY")]
    AggregationInGroupBy(String),

    #[error("'{0}' must appear in GROUP BY or be used in an aggregate function")]
    NotGroupedOrAggregated(String),

    #[error("Property '{0}' cannot be aggregated")]
    NotAggregable(String),

    #[error(transparent)]
    MissingParameter(#[from] MissingParameter),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Planner tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Cofactor count past which the expansion gives up and scans in memory
    pub max_expansion_cofactors: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_expansion_cofactors: DEFAULT_MAX_EXPANSION_COFACTORS,
        }
    }
}

// Metadata of entity types without a schema: nothing is indexed or repeated
struct Unindexed;

impl FieldIndexMetadata for Unindexed {
    fn is_indexed(&self, _path: &PropertyPath) -> bool {
        false
    }

    fn is_sortable(&self, _path: &PropertyPath) -> bool {
        false
    }

    fn is_projectable(&self, _path: &PropertyPath) -> bool {
        false
    }

    fn is_aggregable(&self, _path: &PropertyPath) -> bool {
        true
    }

    fn is_repeated(&self, _path: &PropertyPath) -> bool {
        false
    }
}

/// Entity type being planned and what the index knows about it
#[derive(Clone, Copy)]
struct Target<'a> {
    entity: &'a str,
    metadata: &'a dyn FieldIndexMetadata,
    /// An index collaborator exists and knows this entity type
    indexed: bool,
}

/// A selection without grouping: one phase of a plan
struct Selection<'a> {
    predicate: Option<&'a BooleanExpr>,
    projections: Vec<PropertyPath>,
    sort: Vec<SortField>,
}

/// Row columns of an aggregation, in assignment order
#[derive(Default)]
struct ColumnRegistry {
    columns: Vec<(ValueExpr, ColumnMetadata)>,
}

impl ColumnRegistry {
    fn find(&self, expr: &ValueExpr) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|(e, _)| e == expr).map(|(_, c)| c)
    }

    fn add(&mut self, expr: &ValueExpr, value_type: ValueType) -> ColumnMetadata {
        if let Some(column) = self.find(expr) {
            return column.clone();
        }
        let column = ColumnMetadata::new(self.columns.len(), value_type);
        self.columns.push((expr.clone(), column.clone()));
        column
    }

    fn len(&self) -> usize {
        self.columns.len()
    }
}

/// Builds query plans against one execution context
pub struct QueryPlanner {
    config: PlannerConfig,
    ctx: ExecutionContext,
    metadata: Arc<dyn MetadataProvider>,
}

impl QueryPlanner {
    /// Create a planner
    pub fn new(config: PlannerConfig, ctx: ExecutionContext, metadata: Arc<dyn MetadataProvider>) -> Self {
        Self { config, ctx, metadata }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Build the plan for `query` with `params` bound.
    ///
    /// Aggregations are planned in phases over synthetic rows whose first
    /// `k` columns are the GROUP BY key:
    ///
    /// - simple case: an ordinary plan projecting every aggregated and
    ///   grouped path, then an Aggregating plan;
    /// - when an aggregation targets a multivalued path: an entity plan,
    ///   a Hybrid that projects one row per entity with multivalued columns
    ///   partially aggregated, then a two-phase Aggregating plan.
    ///
    /// The final phase filters by HAVING, sorts and paginates.
    pub fn build_query(
        &self,
        query: &ParsedQuery,
        params: &HashMap<String, Value>,
        offset: usize,
        max_results: Option<usize>,
    ) -> Result<QueryPlan, QueryPlanError> {
        let bound = query.bind(params)?;
        let schema = self.metadata.metadata(&bound.target_entity);
        let target = Target {
            entity: &bound.target_entity,
            metadata: schema.unwrap_or(&Unindexed),
            indexed: schema.is_some() && self.ctx.index.is_some(),
        };

        let aggregating = bound.has_grouping_or_aggregations();
        if bound.statement_kind == StatementKind::Delete && (aggregating || !bound.projections.is_empty()) {
            return Err(QueryPlanError::InvalidQuery(
                "DELETE cannot project, group or aggregate".to_string(),
            ));
        }

        let plan = if aggregating {
            self.build_aggregation(&bound, target, offset, max_results)?
        } else {
            let projections = bound.projections.iter().map(|p| p.path().clone()).collect();
            let selection = Selection {
                predicate: bound.where_clause.as_ref(),
                projections,
                sort: bound.sort_fields.clone(),
            };
            self.build_selection(selection, target, offset, max_results)?
        };

        self.ctx.metrics.record_plan(plan.kind().as_str());
        debug!(entity = %target.entity, plan = %plan.kind(), "Query planned");
        Ok(plan.with_query_text(bound.to_string()))
    }

    fn filter_slot(&self, spec: FilterSpec) -> FilterSlot {
        FilterSlot::new(spec, self.ctx.matcher.clone())
    }

    fn build_selection(
        &self,
        selection: Selection<'_>,
        target: Target<'_>,
        offset: usize,
        max_results: Option<usize>,
    ) -> Result<QueryPlan, QueryPlanError> {
        let Selection {
            predicate,
            projections,
            sort,
        } = selection;
        let metadata = target.metadata;

        if let Some(field) = sort.iter().find(|s| metadata.is_repeated(s.expr.path())) {
            return Err(QueryPlanError::MultivaluedInOrderBy(field.expr.path().to_string()));
        }
        if let Some(path) = projections.iter().find(|p| metadata.is_repeated(p)) {
            return Err(QueryPlanError::MultivaluedProjection(path.to_string()));
        }
        if !target.indexed && predicate.map(BooleanExpr::contains_full_text).unwrap_or(false) {
            return Err(QueryPlanError::FullTextRequiresIndex);
        }

        let normalized = BooleanNormalizer::with_metadata(metadata).normalize_opt(predicate);
        if normalized.is_false() {
            debug!(entity = %target.entity, "WHERE is unsatisfiable");
            return Ok(QueryPlan::empty(self.ctx.clone(), target.entity));
        }

        let spec = FilterSpec::new(target.entity)
            .filter(normalized.clone())
            .project(projections.clone())
            .sort(sort.clone());

        if !target.indexed {
            return Ok(QueryPlan::in_memory(self.ctx.clone(), self.filter_slot(spec), offset, max_results));
        }

        let expansion = self.expand(target, &normalized);
        debug!(entity = %target.entity, expansion = ?expansion, "Classified WHERE clause");

        Ok(match expansion {
            Expansion::Identity => {
                let sortable = sort.iter().all(|s| metadata.is_sortable(s.expr.path()));
                let projectable = projections.iter().all(|p| metadata.is_projectable(p));
                let query = IndexQuery::new(target.entity, normalized);

                if sortable && projectable {
                    let mut query = query.sort(sort).page(offset, max_results);
                    let mut row_map = None;
                    if !projections.is_empty() {
                        let (unique, map) = dedup_projections(&projections);
                        query = query.project(unique);
                        row_map = map;
                    }
                    QueryPlan::indexed(self.ctx.clone(), query, row_map)
                } else if sortable {
                    let base = QueryPlan::indexed(self.ctx.clone(), query.sort(sort).page(offset, max_results), None);
                    let residual = FilterSpec::new(target.entity).project(projections);
                    QueryPlan::hybrid(self.ctx.clone(), base, self.filter_slot(residual), 0, None)
                } else {
                    let base = QueryPlan::indexed(self.ctx.clone(), query, None);
                    let residual = FilterSpec::new(target.entity).project(projections).sort(sort);
                    QueryPlan::hybrid(self.ctx.clone(), base, self.filter_slot(residual), offset, max_results)
                }
            }
            Expansion::Full => QueryPlan::in_memory(self.ctx.clone(), self.filter_slot(spec), offset, max_results),
            Expansion::Narrowed(narrowed) => {
                let base = QueryPlan::indexed(self.ctx.clone(), IndexQuery::new(target.entity, narrowed), None);
                QueryPlan::hybrid(self.ctx.clone(), base, self.filter_slot(spec), offset, max_results)
            }
            Expansion::Contradiction => QueryPlan::empty(self.ctx.clone(), target.entity),
        })
    }

    fn expand(&self, target: Target<'_>, normalized: &BooleanExpr) -> Expansion {
        let key = CacheKey::new(
            format!(
                "FROM {} WHERE {} /* cofactors<={} */",
                target.entity, normalized, self.config.max_expansion_cofactors
            ),
            ArtifactKind::IndexPredicate,
        );
        if let Some(expansion) = self.ctx.cache.get::<Expansion>(&key) {
            return expansion;
        }
        let expansion =
            BooleanShannonExpansion::new(self.config.max_expansion_cofactors, target.metadata).expand(normalized);
        self.ctx.cache.put(key, expansion.clone());
        expansion
    }

    // Assign a column to a projected, sorted or HAVING expression
    fn register(
        &self,
        registry: &mut ColumnRegistry,
        expr: &ValueExpr,
        grouping_columns: usize,
        declared: ValueType,
        metadata: &dyn FieldIndexMetadata,
    ) -> Result<ColumnMetadata, QueryPlanError> {
        match expr {
            ValueExpr::Property(_) => registry
                .find(expr)
                .filter(|c| c.index < grouping_columns)
                .cloned()
                .ok_or_else(|| QueryPlanError::NotGroupedOrAggregated(expr.to_string())),
            ValueExpr::Aggregation { function, path } => {
                if *function != AggregationFunction::Count && !metadata.is_aggregable(path) {
                    return Err(QueryPlanError::NotAggregable(path.to_string()));
                }
                let mut output = FieldAccumulator::output_type(*function, metadata.property_type(path));
                if output == ValueType::Any {
                    output = declared;
                }
                Ok(registry.add(expr, output))
            }
        }
    }

    fn build_aggregation(
        &self,
        query: &ParsedQuery,
        target: Target<'_>,
        offset: usize,
        max_results: Option<usize>,
    ) -> Result<QueryPlan, QueryPlanError> {
        if query.projections.is_empty() {
            return Err(QueryPlanError::AggregationRequiresProjection);
        }
        let metadata = target.metadata;
        let mut registry = ColumnRegistry::default();

        for expr in &query.group_by {
            if expr.is_aggregation() {
                return Err(QueryPlanError::AggregationInGroupBy(expr.to_string()));
            }
            if metadata.is_repeated(expr.path()) {
                return Err(QueryPlanError::MultivaluedGroupBy(expr.path().to_string()));
            }
            registry.add(expr, metadata.property_type(expr.path()));
        }
        let grouping_columns = registry.len();

        let mut projected = Vec::with_capacity(query.projections.len());
        for (i, expr) in query.projections.iter().enumerate() {
            let declared = query.projected_types.get(i).copied().unwrap_or(ValueType::Any);
            let column = self.register(&mut registry, expr, grouping_columns, declared, metadata)?;
            projected.push(PropertyPath::parse(&column.name));
        }

        let mut sort = Vec::with_capacity(query.sort_fields.len());
        for field in &query.sort_fields {
            let column = self.register(&mut registry, &field.expr, grouping_columns, ValueType::Any, metadata)?;
            sort.push(SortField::by(ValueExpr::property(column.name.as_str()), field.ascending));
        }

        let having = match &query.having_clause {
            None => BooleanExpr::TRUE,
            Some(having) => {
                let normalized = BooleanNormalizer::new().normalize(having);
                if normalized.is_false() {
                    debug!(entity = %target.entity, "HAVING is unsatisfiable");
                    return Ok(QueryPlan::empty(self.ctx.clone(), target.entity));
                }
                normalized.try_map_operands(&mut |expr| {
                    let column = self.register(&mut registry, expr, grouping_columns, ValueType::Any, metadata)?;
                    Ok::<_, QueryPlanError>(ValueExpr::property(column.name.as_str()))
                })?
            }
        };

        let columns: Vec<ColumnMetadata> = registry.columns.iter().map(|(_, c)| c.clone()).collect();
        let width = columns.len();
        let row_spec = FilterSpec::new(target.entity)
            .project(projected)
            .filter(having)
            .sort(sort);
        let row_filter = FilterSlot::new(row_spec, Arc::new(RowMatcher::new(columns)));

        let repeated = registry
            .columns
            .iter()
            .any(|(expr, _)| expr.is_aggregation() && metadata.is_repeated(expr.path()));

        let where_clause = query.where_clause.as_ref();
        if BooleanNormalizer::with_metadata(metadata).normalize_opt(where_clause).is_false() {
            debug!(entity = %target.entity, "WHERE is unsatisfiable, aggregation skipped");
            return Ok(QueryPlan::empty(self.ctx.clone(), target.entity));
        }
        let (base, grouping) = if repeated {
            self.repeated_phases(&registry, where_clause, target, grouping_columns, width)?
        } else {
            self.simple_phase(&registry, where_clause, target, grouping_columns, width)?
        };

        debug!(
            entity = %target.entity,
            columns = width,
            grouping_columns,
            two_phase = grouping.two_phase,
            "Aggregation rewritten"
        );

        QueryPlan::aggregating(self.ctx.clone(), base, grouping, row_filter, offset, max_results)
            .map_err(|e| QueryPlanError::InvalidQuery(e.to_string()))
    }

    // Phase 1 projects each distinct input path once; accumulators read from it
    fn simple_phase(
        &self,
        registry: &ColumnRegistry,
        where_clause: Option<&BooleanExpr>,
        target: Target<'_>,
        grouping_columns: usize,
        width: usize,
    ) -> Result<(QueryPlan, GroupingSpec), QueryPlanError> {
        let mut in_columns: Vec<PropertyPath> = Vec::new();
        let mut accumulators = Vec::new();

        for (expr, column) in &registry.columns {
            let path = expr.path();
            let input = match in_columns.iter().position(|p| p == path) {
                Some(i) => i,
                None => {
                    in_columns.push(path.clone());
                    in_columns.len() - 1
                }
            };
            if let Some(function) = expr.aggregation() {
                accumulators.push(FieldAccumulator::new(function, input, column.index, column.value_type));
            }
        }

        let selection = Selection {
            predicate: where_clause,
            projections: in_columns,
            sort: Vec::new(),
        };
        let base = self.build_selection(selection, target, 0, None)?;
        let grouping = GroupingSpec {
            grouping_columns,
            accumulators,
            two_phase: false,
            width,
        };
        Ok((base, grouping))
    }

    // Entities, then one row per entity with repeated columns pre-aggregated
    fn repeated_phases(
        &self,
        registry: &ColumnRegistry,
        where_clause: Option<&BooleanExpr>,
        target: Target<'_>,
        grouping_columns: usize,
        width: usize,
    ) -> Result<(QueryPlan, GroupingSpec), QueryPlanError> {
        let metadata = target.metadata;
        let selection = Selection {
            predicate: where_clause,
            projections: Vec::new(),
            sort: Vec::new(),
        };
        let entities = self.build_selection(selection, target, 0, None)?;

        let mut projections = Vec::with_capacity(width);
        let mut partials = Vec::with_capacity(width);
        let mut accumulators = Vec::new();

        for (expr, column) in &registry.columns {
            projections.push(expr.path().clone());
            let Some(function) = expr.aggregation() else {
                partials.push(None);
                continue;
            };

            let repeated = metadata.is_repeated(expr.path());
            partials.push(
                repeated.then(|| FieldAccumulator::new(function, column.index, column.index, column.value_type)),
            );

            let merged = if repeated && function == AggregationFunction::Count {
                FieldAccumulator::count_merge(column.index, column.index)
            } else {
                FieldAccumulator::new(function, column.index, column.index, column.value_type)
            };
            accumulators.push(merged);
        }

        let rows = FilterSpec::new(target.entity).project(projections);
        let slot = self.filter_slot(rows).with_accumulators(partials);
        let base = QueryPlan::hybrid(self.ctx.clone(), entities, slot, 0, None);
        let grouping = GroupingSpec {
            grouping_columns,
            accumulators,
            two_phase: true,
            width,
        };
        Ok((base, grouping))
    }
}

/// Deduplicate projected paths, returning the unique paths and, when any
/// were dropped, the position of each requested path among them
fn dedup_projections(projections: &[PropertyPath]) -> (Vec<PropertyPath>, Option<Vec<usize>>) {
    let mut unique: Vec<PropertyPath> = Vec::new();
    let mut row_map = Vec::with_capacity(projections.len());
    for path in projections {
        let position = match unique.iter().position(|u| u == path) {
            Some(i) => i,
            None => {
                unique.push(path.clone());
                unique.len() - 1
            }
        };
        row_map.push(position);
    }
    let row_map = (unique.len() != projections.len()).then_some(row_map);
    (unique, row_map)
}
