//! In-memory object filter compilers
//!
//! `DocumentMatcher` evaluates filters over entities, resolving dotted paths
//! and fanning out across arrays. `RowMatcher` evaluates filters over the
//! synthetic rows exchanged by aggregation phases, resolving `C<n>` column
//! names. Both produce a `CompiledFilter`.
//!
//! A predicate over a multivalued property matches when any of its values
//! does. `IS NULL` matches when the path resolves to no value at all.

use super::aggregation::{ColumnMetadata, FieldAccumulator};
use super::ast::{BooleanExpr, ComparisonOp, Constant, ValueExpr};
use super::filter::{
    FilterError, FilterResult, FilterSpec, Instance, Matcher, MatcherKind, ObjectFilter,
    SortComparator,
};
use crate::document::Value;
use regex::Regex;
use std::sync::Arc;

/// Where a value comes from
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    /// Dotted path into an entity
    Path(Vec<String>),
    /// Column of a row
    Column(usize),
}

impl Operand {
    fn values<'a>(&self, instance: &'a Instance) -> Vec<&'a Value> {
        match (self, instance) {
            (Operand::Path(path), Instance::Entity(doc)) => doc.collect_by_path(path),
            (Operand::Column(index), Instance::Row(row)) => {
                row.get(*index).filter(|v| !v.is_null()).into_iter().collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Predicate tree with operands resolved and patterns compiled
#[derive(Debug, Clone)]
enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare {
        operand: Operand,
        op: ComparisonOp,
        value: Value,
    },
    IsNull(Operand),
    Like {
        operand: Operand,
        regex: Regex,
    },
    FullText {
        operand: Operand,
        terms: Vec<String>,
    },
    Constant(bool),
}

impl Predicate {
    fn compile(
        expr: &BooleanExpr,
        resolve: &dyn Fn(&ValueExpr) -> Result<Operand, FilterError>,
    ) -> Result<Self, FilterError> {
        Ok(match expr {
            BooleanExpr::And(children) => Predicate::And(
                children
                    .iter()
                    .map(|c| Predicate::compile(c, resolve))
                    .collect::<Result<_, _>>()?,
            ),
            BooleanExpr::Or(children) => Predicate::Or(
                children
                    .iter()
                    .map(|c| Predicate::compile(c, resolve))
                    .collect::<Result<_, _>>()?,
            ),
            BooleanExpr::Not(child) => Predicate::Not(Box::new(Predicate::compile(child, resolve)?)),
            BooleanExpr::Comparison { operand, op, value } => {
                let value = match value {
                    Constant::Value(v) => v.clone(),
                    Constant::Param(name) => return Err(FilterError::UnboundParameter(name.clone())),
                };
                Predicate::Compare {
                    operand: resolve(operand)?,
                    op: *op,
                    value,
                }
            }
            BooleanExpr::IsNull(operand) => Predicate::IsNull(resolve(operand)?),
            BooleanExpr::Like {
                operand,
                pattern,
                escape,
            } => Predicate::Like {
                operand: resolve(operand)?,
                regex: like_to_regex(pattern, *escape)?,
            },
            BooleanExpr::FullText { path, terms } => Predicate::FullText {
                operand: resolve(&ValueExpr::Property(path.clone()))?,
                terms: tokenize(terms),
            },
            BooleanExpr::Constant(b) => Predicate::Constant(*b),
        })
    }

    fn matches(&self, instance: &Instance) -> bool {
        match self {
            Predicate::And(children) => children.iter().all(|c| c.matches(instance)),
            Predicate::Or(children) => children.iter().any(|c| c.matches(instance)),
            Predicate::Not(child) => !child.matches(instance),
            Predicate::Compare { operand, op, value } => operand
                .values(instance)
                .into_iter()
                .any(|v| v.compare(value).map(|o| op.accepts(o)).unwrap_or(false)),
            Predicate::IsNull(operand) => operand.values(instance).is_empty(),
            Predicate::Like { operand, regex } => operand
                .values(instance)
                .into_iter()
                .any(|v| v.as_str().map(|s| regex.is_match(s)).unwrap_or(false)),
            Predicate::FullText { operand, terms } => operand.values(instance).into_iter().any(|v| {
                v.as_str()
                    .map(|s| {
                        let tokens = tokenize(s);
                        terms.iter().all(|t| tokens.contains(t))
                    })
                    .unwrap_or(false)
            }),
            Predicate::Constant(b) => *b,
        }
    }
}

/// Translate a LIKE pattern into an anchored regex
fn like_to_regex(pattern: &str, escape: Option<char>) -> Result<Regex, FilterError> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str("(?s)^");

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if Some(c) == escape {
            match chars.next() {
                Some(literal) => re.push_str(&regex::escape(literal.encode_utf8(&mut [0; 4]))),
                None => {
                    return Err(FilterError::InvalidPattern {
                        pattern: pattern.to_string(),
                        reason: "pattern ends with the escape character".to_string(),
                    })
                }
            }
            continue;
        }
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    re.push('$');

    Regex::new(&re).map_err(|e| FilterError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Filter produced by the in-memory matchers
#[derive(Debug)]
pub struct CompiledFilter {
    predicate: Option<Predicate>,
    projections: Vec<Operand>,
    projection_names: Vec<String>,
    accumulators: Option<Vec<Option<FieldAccumulator>>>,
    sort: Vec<Operand>,
    comparator: Option<SortComparator>,
}

impl CompiledFilter {
    fn compile(
        spec: &FilterSpec,
        accumulators: Option<&[Option<FieldAccumulator>]>,
        resolve: &dyn Fn(&ValueExpr) -> Result<Operand, FilterError>,
    ) -> Result<Self, FilterError> {
        let predicate = spec
            .predicate
            .as_ref()
            .map(|p| Predicate::compile(p, resolve))
            .transpose()?;

        let projections = spec
            .projections
            .iter()
            .map(|p| resolve(&ValueExpr::Property(p.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        let sort = spec
            .sort
            .iter()
            .map(|s| resolve(&s.expr))
            .collect::<Result<Vec<_>, _>>()?;

        let comparator = if spec.sort.is_empty() {
            None
        } else {
            Some(SortComparator::new(spec.sort.iter().map(|s| s.ascending).collect()))
        };

        Ok(Self {
            predicate,
            projections,
            projection_names: spec.projections.iter().map(|p| p.as_string()).collect(),
            accumulators: accumulators.map(<[_]>::to_vec),
            sort,
            comparator,
        })
    }

    fn project(&self, instance: &Instance) -> Instance {
        if self.projections.is_empty() {
            return instance.clone();
        }
        let row = self
            .projections
            .iter()
            .enumerate()
            .map(|(i, operand)| {
                let values = operand.values(instance);
                let accumulator = self
                    .accumulators
                    .as_ref()
                    .and_then(|accs| accs.get(i).copied().flatten());
                match accumulator {
                    Some(acc) => acc.partial(&values),
                    None => values.first().map(|v| (*v).clone()).unwrap_or(Value::Null),
                }
            })
            .collect();
        Instance::Row(row)
    }
}

impl ObjectFilter for CompiledFilter {
    fn filter(&self, instance: &Instance) -> Option<FilterResult> {
        if let Some(predicate) = &self.predicate {
            if !predicate.matches(instance) {
                return None;
            }
        }

        let sort_projection = self.comparator.as_ref().map(|_| {
            self.sort
                .iter()
                .map(|operand| {
                    operand
                        .values(instance)
                        .first()
                        .map(|v| (*v).clone())
                        .unwrap_or(Value::Null)
                })
                .collect()
        });

        Some(FilterResult {
            payload: self.project(instance),
            sort_projection,
        })
    }

    fn comparator(&self) -> Option<SortComparator> {
        self.comparator.clone()
    }

    fn projection_columns(&self) -> &[String] {
        &self.projection_names
    }
}

/// Compiles filters over entities
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentMatcher;

impl DocumentMatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Matcher for DocumentMatcher {
    fn kind(&self) -> MatcherKind {
        MatcherKind::Document
    }

    fn compile(
        &self,
        spec: &FilterSpec,
        accumulators: Option<&[Option<FieldAccumulator>]>,
    ) -> Result<Arc<dyn ObjectFilter>, FilterError> {
        let resolve = |expr: &ValueExpr| match expr {
            ValueExpr::Property(path) => Ok(Operand::Path(path.segments().to_vec())),
            aggregation => Err(FilterError::UnexpectedAggregation(aggregation.to_string())),
        };
        Ok(Arc::new(CompiledFilter::compile(spec, accumulators, &resolve)?))
    }
}

/// Compiles filters over synthetic rows
#[derive(Debug, Clone)]
pub struct RowMatcher {
    columns: Vec<ColumnMetadata>,
}

impl RowMatcher {
    /// Matcher over rows with the given columns
    pub fn new(columns: Vec<ColumnMetadata>) -> Self {
        Self { columns }
    }

    /// Row columns
    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }
}

impl Matcher for RowMatcher {
    fn kind(&self) -> MatcherKind {
        let signature = self
            .columns
            .iter()
            .map(|c| format!("{}:{:?}", c.name, c.value_type))
            .collect::<Vec<_>>()
            .join(",");
        MatcherKind::Row(signature)
    }

    fn compile(
        &self,
        spec: &FilterSpec,
        accumulators: Option<&[Option<FieldAccumulator>]>,
    ) -> Result<Arc<dyn ObjectFilter>, FilterError> {
        let resolve = |expr: &ValueExpr| match expr {
            ValueExpr::Property(path) => {
                let name = path.as_string();
                self.columns
                    .iter()
                    .find(|c| c.name == name)
                    .map(|c| Operand::Column(c.index))
                    .ok_or(FilterError::UnknownColumn(name))
            }
            aggregation => Err(FilterError::UnexpectedAggregation(aggregation.to_string())),
        };
        Ok(Arc::new(CompiledFilter::compile(spec, accumulators, &resolve)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, ValueType};
    use crate::query::ast::{AggregationFunction, PropertyPath, SortField};

    fn person(name: &str, age: i32) -> Instance {
        Document::new().with("name", name).with("age", age).into()
    }

    fn compile(spec: FilterSpec) -> Arc<dyn ObjectFilter> {
        DocumentMatcher::new().compile(&spec, None).unwrap()
    }

    #[test]
    fn test_comparison_and_projection() {
        let filter = compile(
            FilterSpec::new("Person")
                .filter(BooleanExpr::gt("age", 30i32))
                .project(vec![PropertyPath::parse("name")])
                .sort(vec![SortField::desc("age")]),
        );

        assert!(filter.filter(&person("Ann", 25)).is_none());

        let result = filter.filter(&person("Bob", 41)).unwrap();
        assert_eq!(result.projection(), Some(&[Value::from("Bob")][..]));
        assert_eq!(result.sort_projection, Some(vec![Value::Int32(41)]));
        assert_eq!(filter.projection_columns(), &["name".to_string()]);
        assert!(filter.comparator().is_some());
    }

    #[test]
    fn test_like_patterns() {
        let cases = vec![
            ("J%", "John", true),
            ("J%", "Ajax", false),
            ("_ob", "Bob", true),
            ("_ob", "Boob", false),
            ("100%", "100 percent", true),
            ("a.c", "abc", false),
            ("a.c", "a.c", true),
        ];
        for (pattern, input, expected) in cases {
            let regex = like_to_regex(pattern, None).unwrap();
            assert_eq!(regex.is_match(input), expected, "{} LIKE {}", input, pattern);
        }

        let escaped = like_to_regex("50!%", Some('!')).unwrap();
        assert!(escaped.is_match("50%"));
        assert!(!escaped.is_match("500"));
        assert!(like_to_regex("oops!", Some('!')).is_err());
    }

    #[test]
    fn test_multivalued_any_match() {
        let doc: Instance = Document::new()
            .with("tags", vec![Value::from("rust"), Value::from("db")])
            .into();

        let filter = compile(FilterSpec::new("Article").filter(BooleanExpr::eq("tags", "db")));
        assert!(filter.filter(&doc).is_some());

        let filter = compile(FilterSpec::new("Article").filter(BooleanExpr::is_null("tags")));
        assert!(filter.filter(&doc).is_none());
        assert!(filter.filter(&Document::new().into()).is_some());
    }

    #[test]
    fn test_full_text_terms() {
        let doc: Instance = Document::new()
            .with("body", "Fast, safe systems programming")
            .into();
        let hit = compile(FilterSpec::new("A").filter(BooleanExpr::full_text("body", "SAFE systems")));
        let miss = compile(FilterSpec::new("A").filter(BooleanExpr::full_text("body", "safe python")));
        assert!(hit.filter(&doc).is_some());
        assert!(miss.filter(&doc).is_none());
    }

    #[test]
    fn test_unbound_parameter_is_rejected() {
        let spec = FilterSpec::new("Person").filter(BooleanExpr::param("age", ComparisonOp::Less, "max"));
        let err = DocumentMatcher::new().compile(&spec, None).unwrap_err();
        assert_eq!(err, FilterError::UnboundParameter("max".to_string()));
    }

    #[test]
    fn test_partial_accumulation() {
        let doc: Instance = Document::new()
            .with("category", "books")
            .with("tags", vec![Value::from("a"), Value::from("b"), Value::from("c")])
            .into();
        let count = FieldAccumulator::new(AggregationFunction::Count, 1, 1, ValueType::Int64);
        let spec = FilterSpec::new("Item")
            .project(vec![PropertyPath::parse("category"), PropertyPath::parse("tags")]);
        let filter = DocumentMatcher::new().compile(&spec, Some(&[None, Some(count)])).unwrap();

        let result = filter.filter(&doc).unwrap();
        assert_eq!(
            result.projection(),
            Some(&[Value::from("books"), Value::Int64(3)][..])
        );
    }

    #[test]
    fn test_row_matcher_columns() {
        let matcher = RowMatcher::new(vec![
            ColumnMetadata::new(0, ValueType::String),
            ColumnMetadata::new(1, ValueType::Int64),
        ]);
        let spec = FilterSpec::new("Row")
            .filter(BooleanExpr::gt("C1", 1i32))
            .project(vec![PropertyPath::parse("C1"), PropertyPath::parse("C0")]);
        let filter = matcher.compile(&spec, None).unwrap();

        let row = Instance::Row(vec![Value::from("x"), Value::Int64(2)]);
        assert_eq!(
            filter.filter(&row).unwrap().payload,
            Instance::Row(vec![Value::Int64(2), Value::from("x")])
        );
        assert!(filter.filter(&Instance::Row(vec![Value::from("x"), Value::Int64(1)])).is_none());

        let bad = FilterSpec::new("Row").filter(BooleanExpr::is_null("C7"));
        assert_eq!(matcher.compile(&bad, None).unwrap_err(), FilterError::UnknownColumn("C7".into()));
        assert_ne!(matcher.kind(), MatcherKind::Document);
    }
}
