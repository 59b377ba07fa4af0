//! Aggregation descriptors: row columns and field accumulators
//!
//! Aggregation phases exchange synthetic rows. Each row column is described by
//! a `ColumnMetadata`; the first `k` columns always hold the group key. A
//! `FieldAccumulator` is a stateless description of how one column is folded
//! into another; the state itself lives in the grouper.

use super::ast::AggregationFunction;
use crate::document::{Value, ValueType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column of a synthetic row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    /// Position in the row
    pub index: usize,
    /// Column name, `C<index>`
    pub name: String,
    /// Column type
    pub value_type: ValueType,
}

impl ColumnMetadata {
    /// Create column `index`
    pub fn new(index: usize, value_type: ValueType) -> Self {
        Self {
            index,
            name: format!("C{}", index),
            value_type,
        }
    }
}

/// Per-column aggregation operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAccumulator {
    pub function: AggregationFunction,
    /// Column read from the input row
    pub input_column: usize,
    /// Column written in the output row
    pub output_column: usize,
    /// Type of the produced value
    pub output_type: ValueType,
    /// Finish as zero instead of null when no value was folded
    #[serde(default)]
    pub empty_as_zero: bool,
}

impl FieldAccumulator {
    /// Create an accumulator; `output_type` is the type of the aggregated column
    pub fn new(
        function: AggregationFunction,
        input_column: usize,
        output_column: usize,
        output_type: ValueType,
    ) -> Self {
        Self {
            function,
            input_column,
            output_column,
            output_type,
            empty_as_zero: false,
        }
    }

    /// SUM of per-entity partial counts. Like COUNT, it is 0 over no input.
    pub fn count_merge(input_column: usize, output_column: usize) -> Self {
        Self {
            empty_as_zero: true,
            ..Self::new(AggregationFunction::Sum, input_column, output_column, ValueType::Int64)
        }
    }

    /// Result type of `function` applied to values of `input`
    pub fn output_type(function: AggregationFunction, input: ValueType) -> ValueType {
        match function {
            AggregationFunction::Count => ValueType::Int64,
            AggregationFunction::Avg => ValueType::Float64,
            AggregationFunction::Sum => {
                if input.is_integral() {
                    ValueType::Int64
                } else if input == ValueType::Any {
                    // decided by the values actually summed
                    ValueType::Any
                } else {
                    ValueType::Float64
                }
            }
            AggregationFunction::Min | AggregationFunction::Max => input,
        }
    }

    /// Fresh accumulation state
    pub fn init(&self) -> AccumulatorState {
        match self.function {
            AggregationFunction::Count => AccumulatorState::Count(0),
            AggregationFunction::Sum => AccumulatorState::Sum {
                integral: 0,
                float: 0.0,
                all_integral: true,
                seen: false,
            },
            AggregationFunction::Avg => AccumulatorState::Avg { sum: 0.0, count: 0 },
            AggregationFunction::Min | AggregationFunction::Max => AccumulatorState::Extreme(None),
        }
    }

    /// Fold one value into `state`. Nulls are ignored.
    ///
    /// With `two_phase` set, AVG also accepts the `[sum, count]` partials
    /// produced by [`FieldAccumulator::partial`].
    pub fn update(&self, state: &mut AccumulatorState, value: &Value, two_phase: bool) {
        if value.is_null() {
            return;
        }
        match state {
            AccumulatorState::Count(count) => *count += 1,
            AccumulatorState::Sum {
                integral,
                float,
                all_integral,
                seen,
            } => {
                if let Some(i) = value.as_i64() {
                    *integral = integral.saturating_add(i);
                    *float += i as f64;
                    *seen = true;
                } else if let Some(f) = value.as_f64() {
                    *float += f;
                    *all_integral = false;
                    *seen = true;
                }
            }
            AccumulatorState::Avg { sum, count } => match value {
                Value::Array(parts) if two_phase => {
                    if let [partial_sum, partial_count] = parts.as_slice() {
                        if let (Some(s), Some(c)) = (partial_sum.as_f64(), partial_count.as_i64()) {
                            *sum += s;
                            *count += c;
                        }
                    }
                }
                other => {
                    if let Some(f) = other.as_f64() {
                        *sum += f;
                        *count += 1;
                    }
                }
            },
            AccumulatorState::Extreme(current) => {
                let replace = match current {
                    None => true,
                    Some(existing) => {
                        let ordering = value.total_cmp(existing);
                        if self.function == AggregationFunction::Min {
                            ordering.is_lt()
                        } else {
                            ordering.is_gt()
                        }
                    }
                };
                if replace {
                    *current = Some(value.clone());
                }
            }
        }
    }

    /// Final value of `state`
    pub fn finish(&self, state: AccumulatorState) -> Value {
        match state {
            AccumulatorState::Count(count) => Value::Int64(count),
            AccumulatorState::Sum { seen: false, .. } if self.empty_as_zero => Value::Int64(0),
            AccumulatorState::Sum { seen: false, .. } => Value::Null,
            AccumulatorState::Sum {
                integral,
                float,
                all_integral,
                ..
            } => match self.output_type {
                ValueType::Int64 | ValueType::Int32 => Value::Int64(integral),
                ValueType::Any if all_integral => Value::Int64(integral),
                _ => Value::Float64(float),
            },
            AccumulatorState::Avg { count: 0, .. } => Value::Null,
            AccumulatorState::Avg { sum, count } => Value::Float64(sum / count as f64),
            AccumulatorState::Extreme(value) => value.unwrap_or(Value::Null),
        }
    }

    /// Partial aggregate over the values one entity holds for a multivalued
    /// column. The grouper combines partials with `two_phase` set.
    pub fn partial(&self, values: &[&Value]) -> Value {
        let mut state = self.init();
        for value in values {
            self.update(&mut state, value, false);
        }
        match state {
            AccumulatorState::Avg { count: 0, .. } => Value::Null,
            AccumulatorState::Avg { sum, count } => {
                Value::Array(vec![Value::Float64(sum), Value::Int64(count)])
            }
            other => self.finish(other),
        }
    }
}

/// Renders as `SUM(C1->C3)`; used in accumulator cache signatures
impl fmt::Display for FieldAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(C{}->C{})", self.function, self.input_column, self.output_column)
    }
}

/// Running state of one accumulator in one group
#[derive(Debug, Clone, PartialEq)]
pub enum AccumulatorState {
    Count(i64),
    Sum {
        integral: i64,
        float: f64,
        all_integral: bool,
        seen: bool,
    },
    Avg {
        sum: f64,
        count: i64,
    },
    Extreme(Option<Value>),
}

/// Signature of an accumulator list, `-` marking columns without one
pub fn accumulator_signature(accumulators: &[Option<FieldAccumulator>]) -> String {
    accumulators
        .iter()
        .map(|acc| acc.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string()))
        .collect::<Vec<_>>()
        .join(",")
}
