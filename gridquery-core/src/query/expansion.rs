//! Boolean Shannon expansion of a predicate onto its indexed atoms
//!
//! Atoms over non-indexed properties are the expansion variables. Each one is
//! eliminated in turn by replacing the expression with the disjunction of its
//! two cofactors (the variable set to TRUE and to FALSE). What remains only
//! mentions indexed atoms and matches a superset of what the original
//! matches, so it can drive an index search whose hits are then re-checked
//! in memory.

use super::ast::BooleanExpr;
use super::normalizer::BooleanNormalizer;
use crate::schema::FieldIndexMetadata;
use tracing::debug;

/// Default upper bound on the number of cofactors
pub const DEFAULT_MAX_EXPANSION_COFACTORS: usize = 16;

/// Outcome of expanding a normalized predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Expansion {
    /// Every atom is indexed; the index answers the predicate exactly
    Identity,
    /// Nothing useful for the index; scan everything in memory
    Full,
    /// Index-only over-approximation of the predicate
    Narrowed(BooleanExpr),
    /// The expansion is FALSE; nothing can match
    Contradiction,
}

/// Expands predicates against the indexing metadata of one entity type
pub struct BooleanShannonExpansion<'a> {
    max_cofactors: usize,
    metadata: &'a dyn FieldIndexMetadata,
}

impl<'a> BooleanShannonExpansion<'a> {
    /// Create an expander that gives up past `max_cofactors` cofactors
    pub fn new(max_cofactors: usize, metadata: &'a dyn FieldIndexMetadata) -> Self {
        Self {
            max_cofactors,
            metadata,
        }
    }

    fn is_indexed(&self, atom: &BooleanExpr) -> bool {
        match atom {
            BooleanExpr::Comparison { operand, .. }
            | BooleanExpr::IsNull(operand)
            | BooleanExpr::Like { operand, .. } => {
                !operand.is_aggregation() && self.metadata.is_indexed(operand.path())
            }
            BooleanExpr::FullText { path, .. } => self.metadata.is_indexed(path),
            _ => false,
        }
    }

    /// Expand a predicate that has already been normalized
    pub fn expand(&self, expr: &BooleanExpr) -> Expansion {
        if let BooleanExpr::Constant(_) = expr {
            return Expansion::Identity;
        }

        let mut has_indexed = false;
        let mut variables: Vec<&BooleanExpr> = Vec::new();
        expr.for_each_atom(&mut |atom| {
            if self.is_indexed(atom) {
                has_indexed = true;
            } else if !variables.contains(&atom) {
                variables.push(atom);
            }
        });

        if !has_indexed {
            return Expansion::Full;
        }
        if variables.is_empty() {
            return Expansion::Identity;
        }

        let normalizer = BooleanNormalizer::with_metadata(self.metadata);
        let mut current = expr.clone();
        let mut cofactors = 1usize;

        for variable in variables {
            if !mentions(&current, variable) {
                continue;
            }

            let when_true = normalizer.normalize(&substitute(&current, variable, true));
            let when_false = normalizer.normalize(&substitute(&current, variable, false));

            if when_true.is_true() || when_false.is_true() {
                return Expansion::Full;
            }
            current = if when_true.is_false() {
                when_false
            } else if when_false.is_false() {
                when_true
            } else {
                cofactors = cofactors.saturating_mul(2);
                if cofactors > self.max_cofactors {
                    debug!(cofactors, max = self.max_cofactors, "Expansion exceeds cofactor cap");
                    return Expansion::Full;
                }
                normalizer.normalize(&BooleanExpr::Or(vec![when_true, when_false]))
            };
        }

        match current {
            BooleanExpr::Constant(true) => Expansion::Full,
            BooleanExpr::Constant(false) => Expansion::Contradiction,
            narrowed => Expansion::Narrowed(narrowed),
        }
    }
}

fn mentions(expr: &BooleanExpr, variable: &BooleanExpr) -> bool {
    let mut found = false;
    expr.for_each_atom(&mut |atom| {
        if atom == variable {
            found = true;
        }
    });
    found
}

fn substitute(expr: &BooleanExpr, variable: &BooleanExpr, value: bool) -> BooleanExpr {
    if expr == variable {
        return BooleanExpr::Constant(value);
    }
    match expr {
        BooleanExpr::And(children) => {
            BooleanExpr::And(children.iter().map(|c| substitute(c, variable, value)).collect())
        }
        BooleanExpr::Or(children) => {
            BooleanExpr::Or(children.iter().map(|c| substitute(c, variable, value)).collect())
        }
        BooleanExpr::Not(child) => BooleanExpr::Not(Box::new(substitute(child, variable, value))),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ValueType;
    use crate::schema::{EntitySchema, FieldDefinition};

    fn schema() -> EntitySchema {
        EntitySchema::new("Person")
            .field("name", FieldDefinition::new(ValueType::String).sortable())
            .field("city", FieldDefinition::new(ValueType::String).indexed())
            .field("age", FieldDefinition::new(ValueType::Int32))
            .field("nick", FieldDefinition::new(ValueType::String))
    }

    fn expand(expr: BooleanExpr, cap: usize) -> Expansion {
        let schema = schema();
        let normalized = BooleanNormalizer::with_metadata(&schema).normalize(&expr);
        BooleanShannonExpansion::new(cap, &schema).expand(&normalized)
    }

    #[test]
    fn test_all_indexed_is_identity() {
        let expr = BooleanExpr::and(vec![BooleanExpr::eq("name", "Ann"), BooleanExpr::eq("city", "Oslo")]);
        assert_eq!(expand(expr, 16), Expansion::Identity);
        assert_eq!(expand(BooleanExpr::TRUE, 16), Expansion::Identity);
    }

    #[test]
    fn test_nothing_indexed_is_full() {
        assert_eq!(expand(BooleanExpr::gt("age", 30i32), 16), Expansion::Full);
    }

    #[test]
    fn test_conjunction_keeps_indexed_part() {
        let expr = BooleanExpr::and(vec![BooleanExpr::eq("name", "Ann"), BooleanExpr::gt("age", 30i32)]);
        assert_eq!(expand(expr, 16), Expansion::Narrowed(BooleanExpr::eq("name", "Ann")));
    }

    #[test]
    fn test_disjunction_with_unindexed_branch_is_full() {
        let expr = BooleanExpr::or(vec![BooleanExpr::eq("name", "Ann"), BooleanExpr::gt("age", 30i32)]);
        assert_eq!(expand(expr, 16), Expansion::Full);
    }

    #[test]
    fn test_mixed_expansion_over_approximates() {
        // (name = Ann AND age > 30) OR (city = Oslo AND nick LIKE 'x%')
        let expr = BooleanExpr::or(vec![
            BooleanExpr::and(vec![BooleanExpr::eq("name", "Ann"), BooleanExpr::gt("age", 30i32)]),
            BooleanExpr::and(vec![BooleanExpr::eq("city", "Oslo"), BooleanExpr::like("nick", "x%")]),
        ]);
        assert_eq!(
            expand(expr, 16),
            Expansion::Narrowed(BooleanExpr::or(vec![
                BooleanExpr::eq("name", "Ann"),
                BooleanExpr::eq("city", "Oslo"),
            ]))
        );
    }

    #[test]
    fn test_cofactor_cap_degrades_to_full() {
        // each unindexed variable sits beside an indexed atom in a disjunction
        let expr = BooleanExpr::and(vec![
            BooleanExpr::or(vec![BooleanExpr::eq("name", "a"), BooleanExpr::gt("age", 1i32)]),
            BooleanExpr::or(vec![BooleanExpr::eq("city", "b"), BooleanExpr::like("nick", "x%")]),
        ]);
        assert!(matches!(expand(expr.clone(), 16), Expansion::Full | Expansion::Narrowed(_)));

        let expr = BooleanExpr::or(vec![
            BooleanExpr::and(vec![BooleanExpr::eq("name", "a"), BooleanExpr::gt("age", 1i32)]),
            BooleanExpr::and(vec![BooleanExpr::eq("city", "b"), BooleanExpr::lt("age", 1i32)]),
        ]);
        assert!(matches!(expand(expr.clone(), 16), Expansion::Narrowed(_)));
        assert_eq!(expand(expr, 1), Expansion::Full);
    }

    #[test]
    fn test_negated_unindexed_atom() {
        let expr = BooleanExpr::and(vec![
            BooleanExpr::eq("city", "Oslo"),
            BooleanExpr::not(BooleanExpr::like("nick", "x%")),
        ]);
        assert_eq!(expand(expr, 16), Expansion::Narrowed(BooleanExpr::eq("city", "Oslo")));
    }
}
