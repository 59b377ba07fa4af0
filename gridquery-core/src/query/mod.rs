//! Query planning and execution
//!
//! A `ParsedQuery` is turned into a `QueryPlan` by the `QueryPlanner`, which
//! normalizes the WHERE clause, classifies it against the index capabilities
//! of the target entity and rewrites grouping and aggregation into phases.
//! Plans materialize one page at a time through the top-K collector.

pub mod aggregation;
pub mod ast;
pub mod collector;
pub mod expansion;
pub mod filter;
pub mod grouper;
pub mod matcher;
pub mod normalizer;
pub mod plan;
pub mod planner;
pub mod source;

pub use aggregation::{ColumnMetadata, FieldAccumulator};
pub use ast::{
    AggregationFunction, BooleanExpr, ComparisonOp, Constant, MissingParameter, ParsedQuery, PropertyPath,
    SortField, StatementKind, ValueExpr,
};
pub use collector::{collect_page, Page};
pub use expansion::{BooleanShannonExpansion, Expansion, DEFAULT_MAX_EXPANSION_COFACTORS};
pub use filter::{FilterError, FilterResult, FilterSpec, Instance, Matcher, MatcherKind, ObjectFilter};
pub use grouper::Grouper;
pub use matcher::{DocumentMatcher, RowMatcher};
pub use normalizer::BooleanNormalizer;
pub use plan::{ExecutionContext, FilterSlot, GroupingSpec, PlanKind, QueryExecutionError, QueryPlan};
pub use planner::{PlannerConfig, QueryPlanError, QueryPlanner};
pub use source::{
    EntitySource, IndexHits, IndexQuery, IndexSearch, MetadataProvider, ResultIterator, SourceError,
    VecResultIterator,
};
