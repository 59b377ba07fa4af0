//! Query Abstract Syntax Tree (AST) definitions
//!
//! Defines the parsed form of an object query: the boolean predicate tree,
//! value expressions, sort fields and the query itself. Every node renders
//! back to canonical query text through `Display`; that text is what the
//! compiled-query cache is keyed on.

use crate::document::{Value, ValueType};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Dotted property path, e.g. `address.city`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyPath(Vec<String>);

impl PropertyPath {
    /// Create a path from its segments
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Parse a dotted path
    pub fn parse(path: &str) -> Self {
        Self(path.split('.').map(str::to_string).collect())
    }

    /// Path segments
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Dotted string form
    pub fn as_string(&self) -> String {
        self.0.join(".")
    }
}

impl From<&str> for PropertyPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Aggregation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AggregationFunction {
    Sum,
    Count,
    Avg,
    Min,
    Max,
}

impl fmt::Display for AggregationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregationFunction::Sum => "SUM",
            AggregationFunction::Count => "COUNT",
            AggregationFunction::Avg => "AVG",
            AggregationFunction::Min => "MIN",
            AggregationFunction::Max => "MAX",
        };
        write!(f, "{}", name)
    }
}

/// Value expression: the operand side of a predicate, a projection or a sort key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueExpr {
    /// Plain property reference
    Property(PropertyPath),
    /// Aggregation over a property
    Aggregation {
        function: AggregationFunction,
        path: PropertyPath,
    },
}

impl ValueExpr {
    /// Create a property reference
    pub fn property(path: impl Into<PropertyPath>) -> Self {
        Self::Property(path.into())
    }

    /// Create an aggregation expression
    pub fn aggregate(function: AggregationFunction, path: impl Into<PropertyPath>) -> Self {
        Self::Aggregation {
            function,
            path: path.into(),
        }
    }

    /// The property this expression reads
    pub fn path(&self) -> &PropertyPath {
        match self {
            ValueExpr::Property(path) => path,
            ValueExpr::Aggregation { path, .. } => path,
        }
    }

    /// The aggregation function, if any
    pub fn aggregation(&self) -> Option<AggregationFunction> {
        match self {
            ValueExpr::Property(_) => None,
            ValueExpr::Aggregation { function, .. } => Some(*function),
        }
    }

    /// Whether this is an aggregation expression
    pub fn is_aggregation(&self) -> bool {
        matches!(self, ValueExpr::Aggregation { .. })
    }
}

impl fmt::Display for ValueExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueExpr::Property(path) => write!(f, "{}", path),
            ValueExpr::Aggregation { function, path } => write!(f, "{}({})", function, path),
        }
    }
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    /// Literal value
    Value(Value),
    /// Named parameter, bound before planning
    Param(String),
}

impl Constant {
    /// The literal value, `None` while still a parameter
    pub fn value(&self) -> Option<&Value> {
        match self {
            Constant::Value(v) => Some(v),
            Constant::Param(_) => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Value(v) => write!(f, "{}", v),
            Constant::Param(name) => write!(f, ":{}", name),
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    Less,
    LessOrEqual,
    Equal,
    NotEqual,
    GreaterOrEqual,
    Greater,
}

impl ComparisonOp {
    /// Operator with the opposite truth value: `!(a < b)` is `a >= b`
    pub fn negate(self) -> Self {
        match self {
            ComparisonOp::Less => ComparisonOp::GreaterOrEqual,
            ComparisonOp::LessOrEqual => ComparisonOp::Greater,
            ComparisonOp::Equal => ComparisonOp::NotEqual,
            ComparisonOp::NotEqual => ComparisonOp::Equal,
            ComparisonOp::GreaterOrEqual => ComparisonOp::Less,
            ComparisonOp::Greater => ComparisonOp::LessOrEqual,
        }
    }

    /// Operator for swapped operands: `a < b` is `b > a`
    pub fn reverse(self) -> Self {
        match self {
            ComparisonOp::Less => ComparisonOp::Greater,
            ComparisonOp::LessOrEqual => ComparisonOp::GreaterOrEqual,
            ComparisonOp::Equal => ComparisonOp::Equal,
            ComparisonOp::NotEqual => ComparisonOp::NotEqual,
            ComparisonOp::GreaterOrEqual => ComparisonOp::LessOrEqual,
            ComparisonOp::Greater => ComparisonOp::Less,
        }
    }

    /// Whether an ordering of `left` against `right` satisfies `left op right`
    pub fn accepts(self, ordering: Ordering) -> bool {
        match self {
            ComparisonOp::Less => ordering == Ordering::Less,
            ComparisonOp::LessOrEqual => ordering != Ordering::Greater,
            ComparisonOp::Equal => ordering == Ordering::Equal,
            ComparisonOp::NotEqual => ordering != Ordering::Equal,
            ComparisonOp::GreaterOrEqual => ordering != Ordering::Less,
            ComparisonOp::Greater => ordering == Ordering::Greater,
        }
    }

    /// Whether this bounds the value from above (`<`, `<=`)
    pub fn is_upper_bound(self) -> bool {
        matches!(self, ComparisonOp::Less | ComparisonOp::LessOrEqual)
    }

    /// Whether this bounds the value from below (`>`, `>=`)
    pub fn is_lower_bound(self) -> bool {
        matches!(self, ComparisonOp::Greater | ComparisonOp::GreaterOrEqual)
    }

    fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Less => "<",
            ComparisonOp::LessOrEqual => "<=",
            ComparisonOp::Equal => "=",
            ComparisonOp::NotEqual => "!=",
            ComparisonOp::GreaterOrEqual => ">=",
            ComparisonOp::Greater => ">",
        }
    }
}

/// Boolean predicate tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args")]
pub enum BooleanExpr {
    /// Logical AND: all children must match
    And(Vec<BooleanExpr>),
    /// Logical OR: at least one child must match
    Or(Vec<BooleanExpr>),
    /// Logical NOT
    Not(Box<BooleanExpr>),
    /// `operand op constant`
    Comparison {
        operand: ValueExpr,
        op: ComparisonOp,
        value: Constant,
    },
    /// `operand IS NULL`
    IsNull(ValueExpr),
    /// SQL LIKE with `%` and `_` wildcards
    Like {
        operand: ValueExpr,
        pattern: String,
        escape: Option<char>,
    },
    /// Full-text term match, only answerable by an index
    FullText { path: PropertyPath, terms: String },
    /// Boolean constant
    Constant(bool),
}

impl BooleanExpr {
    /// The constant TRUE predicate
    pub const TRUE: BooleanExpr = BooleanExpr::Constant(true);
    /// The constant FALSE predicate
    pub const FALSE: BooleanExpr = BooleanExpr::Constant(false);

    fn comparison(path: impl Into<PropertyPath>, op: ComparisonOp, value: impl Into<Value>) -> Self {
        Self::Comparison {
            operand: ValueExpr::Property(path.into()),
            op,
            value: Constant::Value(value.into()),
        }
    }

    /// Create an equality predicate
    pub fn eq(path: impl Into<PropertyPath>, value: impl Into<Value>) -> Self {
        Self::comparison(path, ComparisonOp::Equal, value)
    }

    /// Create a not-equal predicate
    pub fn ne(path: impl Into<PropertyPath>, value: impl Into<Value>) -> Self {
        Self::comparison(path, ComparisonOp::NotEqual, value)
    }

    /// Create a less-than predicate
    pub fn lt(path: impl Into<PropertyPath>, value: impl Into<Value>) -> Self {
        Self::comparison(path, ComparisonOp::Less, value)
    }

    /// Create a less-than-or-equal predicate
    pub fn lte(path: impl Into<PropertyPath>, value: impl Into<Value>) -> Self {
        Self::comparison(path, ComparisonOp::LessOrEqual, value)
    }

    /// Create a greater-than predicate
    pub fn gt(path: impl Into<PropertyPath>, value: impl Into<Value>) -> Self {
        Self::comparison(path, ComparisonOp::Greater, value)
    }

    /// Create a greater-than-or-equal predicate
    pub fn gte(path: impl Into<PropertyPath>, value: impl Into<Value>) -> Self {
        Self::comparison(path, ComparisonOp::GreaterOrEqual, value)
    }

    /// Create a comparison against a named parameter
    pub fn param(path: impl Into<PropertyPath>, op: ComparisonOp, name: impl Into<String>) -> Self {
        Self::Comparison {
            operand: ValueExpr::Property(path.into()),
            op,
            value: Constant::Param(name.into()),
        }
    }

    /// Create an IS NULL predicate
    pub fn is_null(path: impl Into<PropertyPath>) -> Self {
        Self::IsNull(ValueExpr::Property(path.into()))
    }

    /// Create a LIKE predicate
    pub fn like(path: impl Into<PropertyPath>, pattern: impl Into<String>) -> Self {
        Self::Like {
            operand: ValueExpr::Property(path.into()),
            pattern: pattern.into(),
            escape: None,
        }
    }

    /// Create a full-text predicate
    pub fn full_text(path: impl Into<PropertyPath>, terms: impl Into<String>) -> Self {
        Self::FullText {
            path: path.into(),
            terms: terms.into(),
        }
    }

    /// Create an AND
    pub fn and(children: Vec<BooleanExpr>) -> Self {
        Self::And(children)
    }

    /// Create an OR
    pub fn or(children: Vec<BooleanExpr>) -> Self {
        Self::Or(children)
    }

    /// Create a NOT
    #[allow(clippy::should_implement_trait)]
    pub fn not(child: BooleanExpr) -> Self {
        Self::Not(Box::new(child))
    }

    /// Whether this is the constant TRUE
    pub fn is_true(&self) -> bool {
        matches!(self, BooleanExpr::Constant(true))
    }

    /// Whether this is the constant FALSE
    pub fn is_false(&self) -> bool {
        matches!(self, BooleanExpr::Constant(false))
    }

    /// Whether this node is a primary predicate (not a boolean operator or constant)
    pub fn is_atom(&self) -> bool {
        matches!(
            self,
            BooleanExpr::Comparison { .. }
                | BooleanExpr::IsNull(_)
                | BooleanExpr::Like { .. }
                | BooleanExpr::FullText { .. }
        )
    }

    /// Property read by a primary predicate
    pub fn atom_path(&self) -> Option<&PropertyPath> {
        match self {
            BooleanExpr::Comparison { operand, .. }
            | BooleanExpr::IsNull(operand)
            | BooleanExpr::Like { operand, .. } => Some(operand.path()),
            BooleanExpr::FullText { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Visit every primary predicate in the tree, left to right
    pub fn for_each_atom<'a>(&'a self, visit: &mut dyn FnMut(&'a BooleanExpr)) {
        match self {
            BooleanExpr::And(children) | BooleanExpr::Or(children) => {
                for child in children {
                    child.for_each_atom(visit);
                }
            }
            BooleanExpr::Not(child) => child.for_each_atom(visit),
            BooleanExpr::Constant(_) => {}
            atom => visit(atom),
        }
    }

    /// Whether the tree contains a full-text predicate
    pub fn contains_full_text(&self) -> bool {
        let mut found = false;
        self.for_each_atom(&mut |atom| {
            if matches!(atom, BooleanExpr::FullText { .. }) {
                found = true;
            }
        });
        found
    }

    /// Rewrite every value expression in the tree
    pub fn try_map_operands<E>(
        &self,
        map: &mut dyn FnMut(&ValueExpr) -> Result<ValueExpr, E>,
    ) -> Result<BooleanExpr, E> {
        Ok(match self {
            BooleanExpr::And(children) => BooleanExpr::And(
                children.iter().map(|c| c.try_map_operands(map)).collect::<Result<_, _>>()?,
            ),
            BooleanExpr::Or(children) => BooleanExpr::Or(
                children.iter().map(|c| c.try_map_operands(map)).collect::<Result<_, _>>()?,
            ),
            BooleanExpr::Not(child) => BooleanExpr::Not(Box::new(child.try_map_operands(map)?)),
            BooleanExpr::Comparison { operand, op, value } => BooleanExpr::Comparison {
                operand: map(operand)?,
                op: *op,
                value: value.clone(),
            },
            BooleanExpr::IsNull(operand) => BooleanExpr::IsNull(map(operand)?),
            BooleanExpr::Like { operand, pattern, escape } => BooleanExpr::Like {
                operand: map(operand)?,
                pattern: pattern.clone(),
                escape: *escape,
            },
            BooleanExpr::FullText { path, terms } => {
                let path = match map(&ValueExpr::Property(path.clone()))? {
                    ValueExpr::Property(p) => p,
                    ValueExpr::Aggregation { path, .. } => path,
                };
                BooleanExpr::FullText { path, terms: terms.clone() }
            }
            BooleanExpr::Constant(b) => BooleanExpr::Constant(*b),
        })
    }

    /// Substitute named parameters with their values
    pub fn bind(&self, params: &HashMap<String, Value>) -> Result<BooleanExpr, MissingParameter> {
        Ok(match self {
            BooleanExpr::And(children) => {
                BooleanExpr::And(children.iter().map(|c| c.bind(params)).collect::<Result<_, _>>()?)
            }
            BooleanExpr::Or(children) => {
                BooleanExpr::Or(children.iter().map(|c| c.bind(params)).collect::<Result<_, _>>()?)
            }
            BooleanExpr::Not(child) => BooleanExpr::Not(Box::new(child.bind(params)?)),
            BooleanExpr::Comparison {
                operand,
                op,
                value: Constant::Param(name),
            } => {
                let value = params
                    .get(name)
                    .cloned()
                    .ok_or_else(|| MissingParameter(name.clone()))?;
                BooleanExpr::Comparison {
                    operand: operand.clone(),
                    op: *op,
                    value: Constant::Value(value),
                }
            }
            other => other.clone(),
        })
    }
}

impl fmt::Display for BooleanExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BooleanExpr::And(children) => write_joined(f, children, " AND "),
            BooleanExpr::Or(children) => write_joined(f, children, " OR "),
            BooleanExpr::Not(child) => write!(f, "NOT {}", child),
            BooleanExpr::Comparison { operand, op, value } => {
                write!(f, "{} {} {}", operand, op.symbol(), value)
            }
            BooleanExpr::IsNull(operand) => write!(f, "{} IS NULL", operand),
            BooleanExpr::Like { operand, pattern, escape } => {
                write!(f, "{} LIKE {}", operand, Value::from(pattern.as_str()))?;
                if let Some(escape) = escape {
                    write!(f, " ESCAPE '{}'", escape)?;
                }
                Ok(())
            }
            BooleanExpr::FullText { path, terms } => {
                write!(f, "{} : {}", path, Value::from(terms.as_str()))
            }
            BooleanExpr::Constant(true) => write!(f, "TRUE"),
            BooleanExpr::Constant(false) => write!(f, "FALSE"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, children: &[BooleanExpr], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{}", child)?;
    }
    write!(f, ")")
}

/// A named parameter had no bound value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("No value was provided for named parameter ':{0}'")]
pub struct MissingParameter(pub String);

/// Sort field: an expression and a direction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortField {
    pub expr: ValueExpr,
    pub ascending: bool,
}

impl SortField {
    /// Ascending sort on a property
    pub fn asc(path: impl Into<PropertyPath>) -> Self {
        Self {
            expr: ValueExpr::Property(path.into()),
            ascending: true,
        }
    }

    /// Descending sort on a property
    pub fn desc(path: impl Into<PropertyPath>) -> Self {
        Self {
            expr: ValueExpr::Property(path.into()),
            ascending: false,
        }
    }

    /// Sort on an arbitrary expression
    pub fn by(expr: ValueExpr, ascending: bool) -> Self {
        Self { expr, ascending }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.expr, if self.ascending { "ASC" } else { "DESC" })
    }
}

/// Statement kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    Select,
    Delete,
}

/// Parsed object query, as produced by the query-language parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedQuery {
    /// Entity type the query targets
    pub target_entity: String,
    /// WHERE clause
    pub where_clause: Option<BooleanExpr>,
    /// Projected expressions (empty = return entities)
    pub projections: Vec<ValueExpr>,
    /// Declared type of each projection
    pub projected_types: Vec<ValueType>,
    /// GROUP BY expressions
    pub group_by: Vec<ValueExpr>,
    /// HAVING clause
    pub having_clause: Option<BooleanExpr>,
    /// ORDER BY
    pub sort_fields: Vec<SortField>,
    /// Statement kind
    pub statement_kind: StatementKind,
}

impl ParsedQuery {
    /// Create a query returning every entity of a type
    pub fn from_entity(entity: impl Into<String>) -> Self {
        Self {
            target_entity: entity.into(),
            where_clause: None,
            projections: Vec::new(),
            projected_types: Vec::new(),
            group_by: Vec::new(),
            having_clause: None,
            sort_fields: Vec::new(),
            statement_kind: StatementKind::Select,
        }
    }

    /// Set the WHERE clause
    pub fn filter(mut self, predicate: BooleanExpr) -> Self {
        self.where_clause = Some(predicate);
        self
    }

    /// Set projections with unknown types
    pub fn select(mut self, projections: Vec<ValueExpr>) -> Self {
        self.projected_types = vec![ValueType::Any; projections.len()];
        self.projections = projections;
        self
    }

    /// Set projections with declared types
    pub fn select_typed(mut self, projections: Vec<(ValueExpr, ValueType)>) -> Self {
        let (exprs, types) = projections.into_iter().unzip();
        self.projections = exprs;
        self.projected_types = types;
        self
    }

    /// Set GROUP BY
    pub fn group_by(mut self, group_by: Vec<ValueExpr>) -> Self {
        self.group_by = group_by;
        self
    }

    /// Set HAVING
    pub fn having(mut self, predicate: BooleanExpr) -> Self {
        self.having_clause = Some(predicate);
        self
    }

    /// Set ORDER BY
    pub fn order_by(mut self, sort_fields: Vec<SortField>) -> Self {
        self.sort_fields = sort_fields;
        self
    }

    /// Set the statement kind
    pub fn statement(mut self, kind: StatementKind) -> Self {
        self.statement_kind = kind;
        self
    }

    /// Whether the query groups or aggregates
    pub fn has_grouping_or_aggregations(&self) -> bool {
        if !self.group_by.is_empty() || self.having_clause.is_some() {
            return true;
        }
        self.projections.iter().any(ValueExpr::is_aggregation)
            || self.sort_fields.iter().any(|s| s.expr.is_aggregation())
    }

    /// Substitute named parameters in WHERE and HAVING
    pub fn bind(&self, params: &HashMap<String, Value>) -> Result<ParsedQuery, MissingParameter> {
        let mut bound = self.clone();
        bound.where_clause = self.where_clause.as_ref().map(|w| w.bind(params)).transpose()?;
        bound.having_clause = self.having_clause.as_ref().map(|h| h.bind(params)).transpose()?;
        Ok(bound)
    }
}

impl fmt::Display for ParsedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.statement_kind == StatementKind::Delete {
            write!(f, "DELETE ")?;
        } else if !self.projections.is_empty() {
            write!(f, "SELECT ")?;
            write_list(f, &self.projections)?;
            write!(f, " ")?;
        }
        write!(f, "FROM {}", self.target_entity)?;
        if let Some(where_clause) = &self.where_clause {
            write!(f, " WHERE {}", where_clause)?;
        }
        if !self.group_by.is_empty() {
            write!(f, " GROUP BY ")?;
            write_list(f, &self.group_by)?;
        }
        if let Some(having) = &self.having_clause {
            write!(f, " HAVING {}", having)?;
        }
        if !self.sort_fields.is_empty() {
            write!(f, " ORDER BY ")?;
            write_list(f, &self.sort_fields)?;
        }
        Ok(())
    }
}

pub(crate) fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negate_and_reverse() {
        for op in [
            ComparisonOp::Less,
            ComparisonOp::LessOrEqual,
            ComparisonOp::Equal,
            ComparisonOp::NotEqual,
            ComparisonOp::GreaterOrEqual,
            ComparisonOp::Greater,
        ] {
            assert_eq!(op.negate().negate(), op);
            assert_eq!(op.reverse().reverse(), op);
            for ordering in [Ordering::Less, Ordering::Equal, Ordering::Greater] {
                assert_ne!(op.accepts(ordering), op.negate().accepts(ordering));
                assert_eq!(op.accepts(ordering), op.reverse().accepts(ordering.reverse()));
            }
        }
    }

    #[test]
    fn test_display_query_text() {
        let query = ParsedQuery::from_entity("Person")
            .select(vec![ValueExpr::property("name")])
            .filter(BooleanExpr::and(vec![
                BooleanExpr::gt("age", 30i32),
                BooleanExpr::not(BooleanExpr::like("name", "J%")),
            ]))
            .order_by(vec![SortField::desc("name")]);

        assert_eq!(
            query.to_string(),
            "SELECT name FROM Person WHERE (age > 30 AND NOT name LIKE 'J%') ORDER BY name DESC"
        );
    }

    #[test]
    fn test_has_grouping_or_aggregations() {
        let plain = ParsedQuery::from_entity("E").select(vec![ValueExpr::property("a")]);
        assert!(!plain.has_grouping_or_aggregations());

        let aggregated = ParsedQuery::from_entity("E")
            .select(vec![ValueExpr::aggregate(AggregationFunction::Count, "a")]);
        assert!(aggregated.has_grouping_or_aggregations());
    }

    #[test]
    fn test_bind_parameters() {
        let query = ParsedQuery::from_entity("E")
            .filter(BooleanExpr::param("age", ComparisonOp::Greater, "minAge"));

        let mut params = HashMap::new();
        assert_eq!(
            query.bind(&params).unwrap_err(),
            MissingParameter("minAge".to_string())
        );

        params.insert("minAge".to_string(), Value::Int32(18));
        let bound = query.bind(&params).unwrap();
        assert_eq!(bound.where_clause, Some(BooleanExpr::gt("age", 18i32)));
    }

    #[test]
    fn test_contains_full_text() {
        let expr = BooleanExpr::or(vec![
            BooleanExpr::eq("a", 1i32),
            BooleanExpr::not(BooleanExpr::full_text("body", "rust")),
        ]);
        assert!(expr.contains_full_text());
        assert!(!BooleanExpr::eq("a", 1i32).contains_full_text());
    }
}
