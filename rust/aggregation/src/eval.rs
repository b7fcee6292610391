//! Aggregates over `eval(...)` expressions.
//!
//! An expression is evaluated row by row over the raw values a segment carries for
//! each referenced column. Cross-segment state that cannot live in the measure's
//! result itself (sum and count for averages, extremes for ranges, unique sets)
//! is kept in an [`EvalAccumulator`] keyed by the measure's display string.

use sift_error::{ErrorCodes, SiftError};
use sift_types::{
    AggregationFunction, ArithOp, ColumnStats, CompareOp, EvalExpr, ExactSum, MeasureAggregator,
    MeasureValue, Number, ScalarValue,
};
use std::{
    cmp::Ordering,
    collections::{BTreeSet, HashMap},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Measure {measure} has no eval expression")]
    MissingExpression { measure: String },
    #[error("Expression of {measure} references no columns")]
    NoFields { measure: String },
    #[error("Column {column} referenced by {measure} is missing from the segment")]
    MissingColumn { measure: String, column: String },
    #[error("Columns referenced by {measure} carry different record counts")]
    MisalignedColumns { measure: String },
    #[error("Cannot apply {op} to non-numeric value {value:?} in {measure}")]
    NonNumeric {
        measure: String,
        op: ArithOp,
        value: String,
    },
    #[error("Function {function} is not supported for eval measure {measure}")]
    UnsupportedFunction {
        measure: String,
        function: AggregationFunction,
    },
    #[error("Running state of {measure} has an unexpected shape")]
    AccumulatorMismatch { measure: String },
}

impl SiftError for EvalError {
    fn code(&self) -> ErrorCodes {
        match self {
            EvalError::UnsupportedFunction { .. } => ErrorCodes::Unimplemented,
            EvalError::AccumulatorMismatch { .. } => ErrorCodes::Internal,
            _ => ErrorCodes::InvalidArgument,
        }
    }
}

/// Cross-segment running state of one eval measure.
#[derive(Clone, Debug, PartialEq)]
pub enum EvalAccumulator {
    Sum(ExactSum),
    SumCount { sum: ExactSum, count: u64 },
    MinMax { min: Number, max: Number },
    Distinct(BTreeSet<String>),
    List(Vec<String>),
}

fn evaluate(
    measure: &str,
    expr: &EvalExpr,
    row: &HashMap<&str, &ScalarValue>,
) -> Result<ScalarValue, EvalError> {
    match expr {
        EvalExpr::Field(name) => Ok(row
            .get(name.as_str())
            .map(|value| (*value).clone())
            .unwrap_or(ScalarValue::Null)),
        EvalExpr::Number(v) => Ok(ScalarValue::Float(*v)),
        EvalExpr::Text(s) => Ok(ScalarValue::Text(s.clone())),
        EvalExpr::Arith { op, lhs, rhs } => {
            let lhs = evaluate(measure, lhs, row)?;
            let rhs = evaluate(measure, rhs, row)?;
            if lhs.is_null() || rhs.is_null() {
                return Ok(ScalarValue::Null);
            }
            let numeric = |value: &ScalarValue| {
                value.as_number().ok_or_else(|| EvalError::NonNumeric {
                    measure: measure.to_string(),
                    op: *op,
                    value: value.to_string(),
                })
            };
            let (a, b) = (numeric(&lhs)?, numeric(&rhs)?);
            let result = match op {
                ArithOp::Add => a.add(b),
                ArithOp::Sub => a.sub(b),
                ArithOp::Mul => a.mul(b),
                ArithOp::Div if b.as_f64() == 0.0 => return Ok(ScalarValue::Null),
                ArithOp::Div => a.div(b),
            };
            Ok(result.into())
        }
        EvalExpr::Compare { op, lhs, rhs } => {
            let lhs = evaluate(measure, lhs, row)?;
            let rhs = evaluate(measure, rhs, row)?;
            if lhs.is_null() || rhs.is_null() {
                return Ok(ScalarValue::Bool(false));
            }
            let ordering = match (lhs.as_number(), rhs.as_number()) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                _ => lhs.to_string().cmp(&rhs.to_string()),
            };
            let holds = match op {
                CompareOp::Eq => ordering == Ordering::Equal,
                CompareOp::NotEq => ordering != Ordering::Equal,
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::LtEq => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::GtEq => ordering != Ordering::Less,
            };
            Ok(ScalarValue::Bool(holds))
        }
    }
}

/// Evaluates the measure's expression for every record of the segment.
pub fn evaluate_rows(
    measure: &MeasureAggregator,
    stats: &HashMap<String, ColumnStats>,
) -> Result<Vec<ScalarValue>, EvalError> {
    let name = measure.to_string();
    let expr = measure
        .eval
        .as_ref()
        .ok_or_else(|| EvalError::MissingExpression {
            measure: name.clone(),
        })?;
    let fields = expr.fields();
    if fields.is_empty() {
        return Err(EvalError::NoFields { measure: name });
    }

    let mut columns = Vec::with_capacity(fields.len());
    for field in &fields {
        let column = stats.get(*field).ok_or_else(|| EvalError::MissingColumn {
            measure: name.clone(),
            column: field.to_string(),
        })?;
        columns.push((*field, &column.records));
    }
    let num_rows = columns[0].1.len();
    if columns.iter().any(|(_, records)| records.len() != num_rows) {
        return Err(EvalError::MisalignedColumns { measure: name });
    }

    let mut results = Vec::with_capacity(num_rows);
    for idx in 0..num_rows {
        let row: HashMap<&str, &ScalarValue> = columns
            .iter()
            .map(|(field, records)| (*field, &records[idx]))
            .collect();
        results.push(evaluate(&name, expr, &row)?);
    }
    Ok(results)
}

fn is_counted(value: &ScalarValue) -> bool {
    match value {
        ScalarValue::Bool(b) => *b,
        other => !other.is_null(),
    }
}

fn existing_number(results: &HashMap<String, MeasureValue>, key: &str) -> Option<Number> {
    match results.get(key) {
        Some(MeasureValue::Signed(v)) => Some(Number::Signed(*v)),
        Some(MeasureValue::Float(v)) => Some(Number::Float(*v)),
        _ => None,
    }
}

fn fold_numbers(values: &[ScalarValue], f: impl Fn(Number, Number) -> Number) -> Option<Number> {
    values
        .iter()
        .filter_map(ScalarValue::as_number)
        .reduce(f)
}

/// Folds one segment's contribution to an eval measure into `measure_results`.
pub fn apply_eval_measure(
    measure: &MeasureAggregator,
    stats: &HashMap<String, ColumnStats>,
    measure_results: &mut HashMap<String, MeasureValue>,
    accumulators: &mut HashMap<String, EvalAccumulator>,
    max_list_values: usize,
) -> Result<(), EvalError> {
    let key = measure.to_string();
    let mismatch = || EvalError::AccumulatorMismatch {
        measure: measure.to_string(),
    };
    if !measure.function.is_mergeable() {
        return Err(EvalError::UnsupportedFunction {
            measure: key,
            function: measure.function,
        });
    }
    let values = evaluate_rows(measure, stats)?;

    match measure.function {
        AggregationFunction::Min | AggregationFunction::Max => {
            let is_min = measure.function == AggregationFunction::Min;
            let pick = |a: Number, b: Number| if is_min { a.min(b) } else { a.max(b) };
            if let Some(segment_value) = fold_numbers(&values, pick) {
                let merged = match existing_number(measure_results, &key) {
                    Some(running) => pick(running, segment_value),
                    None => segment_value,
                };
                measure_results.insert(key, merged.into());
            }
        }
        AggregationFunction::Sum => {
            let mut numbers = values.iter().filter_map(ScalarValue::as_number).peekable();
            if numbers.peek().is_none() {
                return Ok(());
            }
            let accumulator = accumulators
                .entry(key.clone())
                .or_insert_with(|| EvalAccumulator::Sum(ExactSum::default()));
            let EvalAccumulator::Sum(sum) = accumulator else {
                return Err(mismatch());
            };
            numbers.for_each(|number| sum.add_number(number));
            measure_results.insert(key, sum.value().into());
        }
        AggregationFunction::Count => {
            let segment_count = values.iter().filter(|v| is_counted(v)).count() as i64;
            let running = match measure_results.get(&key) {
                Some(MeasureValue::Signed(v)) => *v,
                _ => 0,
            };
            measure_results.insert(key, MeasureValue::Signed(running + segment_count));
        }
        AggregationFunction::Avg => {
            let accumulator = accumulators
                .entry(key.clone())
                .or_insert_with(|| EvalAccumulator::SumCount {
                    sum: ExactSum::default(),
                    count: 0,
                });
            let EvalAccumulator::SumCount { sum, count } = accumulator else {
                return Err(mismatch());
            };
            for number in values.iter().filter_map(ScalarValue::as_number) {
                sum.add_number(number);
                *count += 1;
            }
            if *count > 0 {
                let avg = sum.value().as_f64() / *count as f64;
                measure_results.insert(key, MeasureValue::Float(avg));
            }
        }
        AggregationFunction::Range => {
            let Some(segment_min) = fold_numbers(&values, Number::min) else {
                return Ok(());
            };
            let segment_max = fold_numbers(&values, Number::max).unwrap_or(segment_min);
            let accumulator = accumulators
                .entry(key.clone())
                .or_insert(EvalAccumulator::MinMax {
                    min: segment_min,
                    max: segment_max,
                });
            let EvalAccumulator::MinMax { min, max } = accumulator else {
                return Err(mismatch());
            };
            *min = min.min(segment_min);
            *max = max.max(segment_max);
            measure_results.insert(key, max.sub(*min).into());
        }
        AggregationFunction::Cardinality | AggregationFunction::Values => {
            let accumulator = accumulators
                .entry(key.clone())
                .or_insert_with(|| EvalAccumulator::Distinct(BTreeSet::new()));
            let EvalAccumulator::Distinct(set) = accumulator else {
                return Err(mismatch());
            };
            set.extend(
                values
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(ToString::to_string),
            );
            let result = if measure.function == AggregationFunction::Cardinality {
                MeasureValue::Signed(set.len() as i64)
            } else {
                MeasureValue::TextList(set.iter().cloned().collect())
            };
            measure_results.insert(key, result);
        }
        AggregationFunction::List => {
            let accumulator = accumulators
                .entry(key.clone())
                .or_insert_with(|| EvalAccumulator::List(Vec::new()));
            let EvalAccumulator::List(list) = accumulator else {
                return Err(mismatch());
            };
            let room = max_list_values.saturating_sub(list.len());
            list.extend(
                values
                    .iter()
                    .filter(|v| !v.is_null())
                    .take(room)
                    .map(ToString::to_string),
            );
            measure_results.insert(key, MeasureValue::TextList(list.clone()));
        }
        AggregationFunction::Median | AggregationFunction::Mode => {
            return Err(EvalError::UnsupportedFunction {
                measure: key,
                function: measure.function,
            });
        }
    }
    Ok(())
}
