//! Boolean predicate normalization
//!
//! Brings a predicate to negation normal form and simplifies it:
//! - negations are pushed down with De Morgan's laws; comparisons are never
//!   negated, their operator is flipped instead
//! - boolean constants are folded with short-circuiting
//! - nested conjunctions/disjunctions of the same kind are absorbed and
//!   single-child nodes collapse into the child
//! - duplicate predicates are removed; contradictions and tautologies are
//!   detected
//! - overlapping interval predicates on the same property are merged
//!
//! Predicates over repeated properties are left alone by the last two steps:
//! "some element matches" does not obey the single-valued identities.

use super::ast::{BooleanExpr, ComparisonOp, Constant, ValueExpr};
use crate::document::Value;
use crate::schema::FieldIndexMetadata;
use std::cmp::Ordering;

/// Predicate normalizer
#[derive(Clone, Copy, Default)]
pub struct BooleanNormalizer<'a> {
    metadata: Option<&'a dyn FieldIndexMetadata>,
}

impl<'a> BooleanNormalizer<'a> {
    /// Normalizer that treats every property as single-valued
    pub fn new() -> Self {
        Self { metadata: None }
    }

    /// Normalizer that consults metadata to skip repeated properties
    pub fn with_metadata(metadata: &'a dyn FieldIndexMetadata) -> Self {
        Self {
            metadata: Some(metadata),
        }
    }

    /// Normalize an optional predicate; a missing predicate is TRUE
    pub fn normalize_opt(&self, expr: Option<&BooleanExpr>) -> BooleanExpr {
        expr.map(|e| self.normalize(e)).unwrap_or(BooleanExpr::TRUE)
    }

    /// Normalize a predicate
    pub fn normalize(&self, expr: &BooleanExpr) -> BooleanExpr {
        match expr {
            BooleanExpr::Not(child) => self.negate(child),
            BooleanExpr::And(children) => {
                self.junction(children.iter().map(|c| self.normalize(c)).collect(), true)
            }
            BooleanExpr::Or(children) => {
                self.junction(children.iter().map(|c| self.normalize(c)).collect(), false)
            }
            other => other.clone(),
        }
    }

    fn negate(&self, expr: &BooleanExpr) -> BooleanExpr {
        match expr {
            BooleanExpr::Constant(b) => BooleanExpr::Constant(!b),
            BooleanExpr::Not(child) => self.normalize(child),
            BooleanExpr::And(children) => {
                self.junction(children.iter().map(|c| self.negate(c)).collect(), false)
            }
            BooleanExpr::Or(children) => {
                self.junction(children.iter().map(|c| self.negate(c)).collect(), true)
            }
            BooleanExpr::Comparison { operand, op, value } => BooleanExpr::Comparison {
                operand: operand.clone(),
                op: op.negate(),
                value: value.clone(),
            },
            atom => BooleanExpr::Not(Box::new(atom.clone())),
        }
    }

    // Children are already normalized
    fn junction(&self, children: Vec<BooleanExpr>, is_conjunction: bool) -> BooleanExpr {
        let mut flat = Vec::with_capacity(children.len());

        for child in children {
            match child {
                BooleanExpr::Constant(b) => {
                    if b != is_conjunction {
                        // FALSE in a conjunction, TRUE in a disjunction
                        return BooleanExpr::Constant(b);
                    }
                }
                BooleanExpr::And(grandchildren) if is_conjunction => flat.extend(grandchildren),
                BooleanExpr::Or(grandchildren) if !is_conjunction => flat.extend(grandchildren),
                other => flat.push(other),
            }
        }

        if let Some(constant) = self.remove_redundant(&mut flat, is_conjunction) {
            return constant;
        }
        if let Some(constant) = self.merge_intervals(&mut flat, is_conjunction) {
            return constant;
        }

        match flat.len() {
            0 => BooleanExpr::Constant(is_conjunction),
            1 => flat.pop().unwrap_or(BooleanExpr::Constant(is_conjunction)),
            _ if is_conjunction => BooleanExpr::And(flat),
            _ => BooleanExpr::Or(flat),
        }
    }

    fn is_repeated(&self, expr: &BooleanExpr) -> bool {
        let atom = match expr {
            BooleanExpr::Not(child) => child.as_ref(),
            other => other,
        };
        match (atom, self.metadata) {
            (BooleanExpr::FullText { path, .. }, Some(metadata)) => metadata.is_repeated(path),
            (
                BooleanExpr::Comparison { operand, .. }
                | BooleanExpr::IsNull(operand)
                | BooleanExpr::Like { operand, .. },
                Some(metadata),
            ) => matches!(operand, ValueExpr::Property(path) if metadata.is_repeated(path)),
            _ => false,
        }
    }

    /// Drops duplicates; returns a constant when `X` meets `NOT X`.
    ///
    /// Comparison pairs are not handled here because their negation is an
    /// operator flip; `merge_intervals` covers them.
    fn remove_redundant(&self, children: &mut Vec<BooleanExpr>, is_conjunction: bool) -> Option<BooleanExpr> {
        let mut i = 0;
        while i < children.len() {
            if self.is_repeated(&children[i]) {
                i += 1;
                continue;
            }
            let mut j = i + 1;
            while j < children.len() {
                if children[i] == children[j] {
                    children.remove(j);
                    continue;
                }
                if !self.is_repeated(&children[j]) && are_opposite(&children[i], &children[j]) {
                    return Some(BooleanExpr::Constant(!is_conjunction));
                }
                j += 1;
            }
            i += 1;
        }
        None
    }

    fn merge_intervals(&self, children: &mut Vec<BooleanExpr>, is_conjunction: bool) -> Option<BooleanExpr> {
        let mut i = 0;
        while i < children.len() {
            if !matches!(children[i], BooleanExpr::Comparison { .. }) || self.is_repeated(&children[i]) {
                i += 1;
                continue;
            }
            let mut j = i + 1;
            while j < children.len() {
                if self.is_repeated(&children[j]) {
                    j += 1;
                    continue;
                }
                match merge_pair(&children[i], &children[j], is_conjunction) {
                    Some(Merged::Constant(b)) => return Some(BooleanExpr::Constant(b)),
                    Some(Merged::Replace(expr)) => {
                        children[i] = expr;
                        children.remove(j);
                    }
                    None => j += 1,
                }
            }
            i += 1;
        }
        None
    }
}

fn are_opposite(a: &BooleanExpr, b: &BooleanExpr) -> bool {
    match (a, b) {
        (BooleanExpr::Not(x), y) | (y, BooleanExpr::Not(x)) => x.as_ref() == y,
        _ => false,
    }
}

enum Merged {
    Constant(bool),
    Replace(BooleanExpr),
}

/// Merge two comparisons on the same operand.
///
/// The two constants split the ordered line into at most five regions (the
/// open intervals and the points themselves). Each comparison is either true
/// or false on a whole region, so the combination is a truth vector over the
/// regions, and a single comparison replaces the pair when one has the same
/// vector. Values that are null or of another kind fail every comparison, so
/// a disjunction covering the whole line is not TRUE and is left unmerged.
fn merge_pair(first: &BooleanExpr, second: &BooleanExpr, is_conjunction: bool) -> Option<Merged> {
    let (operand, op1, c1) = as_comparison(first)?;
    let (operand2, op2, c2) = as_comparison(second)?;
    if operand != operand2 {
        return None;
    }
    let order = c1.compare(c2)?;

    // ranks: constants sit on odd ranks, open intervals on even ones
    let (rank1, rank2, regions) = match order {
        Ordering::Less => (1, 3, 5),
        Ordering::Equal => (1, 1, 3),
        Ordering::Greater => (3, 1, 5),
    };
    let truth = |op: ComparisonOp, rank: usize| -> Vec<bool> {
        (0..regions).map(|region: usize| op.accepts(region.cmp(&rank))).collect()
    };

    let t1 = truth(op1, rank1);
    let t2 = truth(op2, rank2);
    let combined: Vec<bool> = t1
        .iter()
        .zip(&t2)
        .map(|(a, b)| if is_conjunction { *a && *b } else { *a || *b })
        .collect();

    if combined.iter().all(|b| !b) {
        return Some(Merged::Constant(false));
    }
    if combined == t1 {
        return Some(Merged::Replace(first.clone()));
    }
    if combined == t2 {
        return Some(Merged::Replace(second.clone()));
    }

    const OPS: [ComparisonOp; 6] = [
        ComparisonOp::Equal,
        ComparisonOp::NotEqual,
        ComparisonOp::Less,
        ComparisonOp::LessOrEqual,
        ComparisonOp::Greater,
        ComparisonOp::GreaterOrEqual,
    ];
    for (rank, constant) in [(rank1, c1), (rank2, c2)] {
        for op in OPS {
            if truth(op, rank) == combined {
                return Some(Merged::Replace(BooleanExpr::Comparison {
                    operand: operand.clone(),
                    op,
                    value: Constant::Value(constant.clone()),
                }));
            }
        }
    }
    None
}

fn as_comparison(expr: &BooleanExpr) -> Option<(&ValueExpr, ComparisonOp, &Value)> {
    match expr {
        BooleanExpr::Comparison {
            operand,
            op,
            value: Constant::Value(value),
        } => Some((operand, *op, value)),
        _ => None,
    }
}
