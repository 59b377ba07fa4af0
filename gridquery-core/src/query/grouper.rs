//! Grouping of synthetic rows
//!
//! The grouper consumes every input row before emitting anything: groups are
//! keyed by the leading `grouping_columns` values, kept in first-seen order,
//! and each group yields one output row.

use super::aggregation::{AccumulatorState, FieldAccumulator};
use crate::document::Value;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Group key with SQL-like equality: numbers compare by value across types
#[derive(Debug, Clone)]
struct GroupKey(Vec<Value>);

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(&other.0).all(|(a, b)| a.total_cmp(b).is_eq())
    }
}

impl Eq for GroupKey {}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in &self.0 {
            hash_value(value, state);
        }
    }
}

// Must agree with `Value::total_cmp` equality
fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        Value::Int32(_) | Value::Int64(_) | Value::Float64(_) => {
            2u8.hash(state);
            let f = value.as_f64().unwrap_or(0.0);
            // -0.0 == 0.0
            let f = if f == 0.0 { 0.0 } else { f };
            f.to_bits().hash(state);
        }
        Value::String(s) => {
            3u8.hash(state);
            s.hash(state);
        }
        Value::DateTime(dt) => {
            4u8.hash(state);
            dt.hash(state);
        }
        Value::Binary(bytes) => {
            5u8.hash(state);
            bytes.hash(state);
        }
        Value::Array(items) => {
            6u8.hash(state);
            items.len().hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(_) => 7u8.hash(state),
    }
}

/// Per-group accumulation over synthetic rows
#[derive(Debug)]
pub struct Grouper {
    grouping_columns: usize,
    accumulators: Vec<FieldAccumulator>,
    two_phase: bool,
    width: usize,
    index: HashMap<GroupKey, usize>,
    groups: Vec<(Vec<Value>, Vec<AccumulatorState>)>,
}

impl Grouper {
    /// Create a grouper emitting rows of `width` columns
    pub fn new(
        grouping_columns: usize,
        accumulators: Vec<FieldAccumulator>,
        two_phase: bool,
        width: usize,
    ) -> Self {
        Self {
            grouping_columns,
            accumulators,
            two_phase,
            width,
            index: HashMap::new(),
            groups: Vec::new(),
        }
    }

    /// Accumulate one input row
    pub fn add(&mut self, row: &[Value]) {
        let key: Vec<Value> = (0..self.grouping_columns)
            .map(|i| row.get(i).cloned().unwrap_or(Value::Null))
            .collect();

        let slot = match self.index.get(&GroupKey(key.clone())) {
            Some(slot) => *slot,
            None => {
                let states = self.accumulators.iter().map(FieldAccumulator::init).collect();
                self.groups.push((key.clone(), states));
                self.index.insert(GroupKey(key), self.groups.len() - 1);
                self.groups.len() - 1
            }
        };

        let states = &mut self.groups[slot].1;
        for (acc, state) in self.accumulators.iter().zip(states.iter_mut()) {
            if let Some(value) = row.get(acc.input_column) {
                acc.update(state, value, self.two_phase);
            }
        }
    }

    /// Number of groups seen so far
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Emit one row per group in first-seen order.
    ///
    /// Without grouping columns there is always exactly one group, even when
    /// no row was added.
    pub fn finish(mut self) -> Vec<Vec<Value>> {
        if self.groups.is_empty() && self.grouping_columns == 0 {
            let states = self.accumulators.iter().map(FieldAccumulator::init).collect();
            self.groups.push((Vec::new(), states));
        }

        let accumulators = self.accumulators;
        let width = self.width;
        self.groups
            .into_iter()
            .map(|(key, states)| {
                let mut row = vec![Value::Null; width];
                for (i, value) in key.into_iter().enumerate() {
                    if i < width {
                        row[i] = value;
                    }
                }
                for (acc, state) in accumulators.iter().zip(states) {
                    if acc.output_column < width {
                        row[acc.output_column] = acc.finish(state);
                    }
                }
                row
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ValueType;
    use crate::query::ast::AggregationFunction;

    fn row(values: &[Value]) -> Vec<Value> {
        values.to_vec()
    }

    #[test]
    fn test_groups_in_first_seen_order() {
        let avg = FieldAccumulator::new(AggregationFunction::Avg, 1, 1, ValueType::Float64);
        let mut grouper = Grouper::new(1, vec![avg], false, 2);

        grouper.add(&row(&[Value::from("b"), Value::Int32(10)]));
        grouper.add(&row(&[Value::from("a"), Value::Int32(4)]));
        grouper.add(&row(&[Value::from("b"), Value::Int32(20)]));
        assert_eq!(grouper.group_count(), 2);

        let rows = grouper.finish();
        assert_eq!(
            rows,
            vec![
                vec![Value::from("b"), Value::Float64(15.0)],
                vec![Value::from("a"), Value::Float64(4.0)],
            ]
        );
    }

    #[test]
    fn test_numeric_keys_group_across_types() {
        let count = FieldAccumulator::new(AggregationFunction::Count, 0, 1, ValueType::Int64);
        let mut grouper = Grouper::new(1, vec![count], false, 2);
        grouper.add(&[Value::Int32(1)]);
        grouper.add(&[Value::Int64(1)]);
        grouper.add(&[Value::Float64(1.0)]);
        assert_eq!(grouper.finish(), vec![vec![Value::Int32(1), Value::Int64(3)]]);
    }

    #[test]
    fn test_global_aggregation_over_no_rows() {
        let count = FieldAccumulator::new(AggregationFunction::Count, 0, 0, ValueType::Int64);
        let sum = FieldAccumulator::new(AggregationFunction::Sum, 0, 1, ValueType::Int64);
        let grouper = Grouper::new(0, vec![count, sum], false, 2);
        assert_eq!(grouper.finish(), vec![vec![Value::Int64(0), Value::Null]]);
    }

    #[test]
    fn test_grouped_aggregation_over_no_rows() {
        let count = FieldAccumulator::new(AggregationFunction::Count, 1, 1, ValueType::Int64);
        let grouper = Grouper::new(1, vec![count], false, 2);
        assert!(grouper.finish().is_empty());
    }

    #[test]
    fn test_two_phase_merges_partials() {
        // COUNT over a multivalued column, upgraded to SUM of per-entity counts
        let sum = FieldAccumulator::new(AggregationFunction::Sum, 1, 1, ValueType::Int64);
        let mut grouper = Grouper::new(1, vec![sum], true, 2);
        grouper.add(&[Value::from("x"), Value::Int64(3)]);
        grouper.add(&[Value::from("x"), Value::Int64(0)]);
        grouper.add(&[Value::from("y"), Value::Int64(2)]);
        assert_eq!(
            grouper.finish(),
            vec![
                vec![Value::from("x"), Value::Int64(3)],
                vec![Value::from("y"), Value::Int64(2)],
            ]
        );
    }
}
