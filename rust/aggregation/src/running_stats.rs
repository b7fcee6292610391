use crate::eval::{apply_eval_measure, EvalAccumulator, EvalError};
use sift_error::{ErrorCodes, SiftError};
use sift_types::{
    AggregationFunction, ColumnStats, MeasureAggregator, MeasureValue, StatsCodecError,
};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatsMergeError {
    #[error("Function {function} of measure {measure} cannot be merged from segment statistics")]
    UnsupportedFunction {
        measure: String,
        function: AggregationFunction,
    },
    #[error("Statistics are final and can no longer be merged")]
    StatsAreFinal,
    #[error("Failed to merge measures: {0:?}")]
    MeasuresFailed(Vec<String>),
    #[error(transparent)]
    Codec(#[from] StatsCodecError),
}

impl SiftError for StatsMergeError {
    fn code(&self) -> ErrorCodes {
        match self {
            StatsMergeError::UnsupportedFunction { .. } => ErrorCodes::Unimplemented,
            StatsMergeError::StatsAreFinal => ErrorCodes::FailedPrecondition,
            StatsMergeError::MeasuresFailed(_) => ErrorCodes::InvalidArgument,
            StatsMergeError::Codec(e) => e.code(),
        }
    }
}

/// Final value of `function` given the merged statistics of its column.
pub fn measure_value(function: AggregationFunction, stats: &ColumnStats) -> MeasureValue {
    match function {
        AggregationFunction::Min => stats.min().map(Into::into).unwrap_or(MeasureValue::Null),
        AggregationFunction::Max => stats.max().map(Into::into).unwrap_or(MeasureValue::Null),
        AggregationFunction::Sum => stats.sum().map(Into::into).unwrap_or(MeasureValue::Null),
        AggregationFunction::Count => MeasureValue::Signed(stats.count as i64),
        AggregationFunction::Avg => match stats.sum() {
            Some(sum) if stats.count > 0 => MeasureValue::Float(sum.as_f64() / stats.count as f64),
            _ => MeasureValue::Null,
        },
        AggregationFunction::Range => match (stats.min(), stats.max()) {
            (Some(min), Some(max)) => max.sub(min).into(),
            _ => MeasureValue::Null,
        },
        AggregationFunction::Cardinality => MeasureValue::Signed(stats.cardinality() as i64),
        AggregationFunction::Values => {
            MeasureValue::TextList(stats.distinct.iter().cloned().collect())
        }
        AggregationFunction::List => MeasureValue::TextList(
            stats
                .records
                .iter()
                .filter(|v| !v.is_null())
                .map(ToString::to_string)
                .collect(),
        ),
        AggregationFunction::Median | AggregationFunction::Mode => MeasureValue::Null,
    }
}

/// Resolves the column a measure reads in one segment. `count(*)` picks a concrete
/// column present in the segment; the smallest name keeps the choice stable for
/// a given segment.
fn resolve_column<'a>(
    measure: &'a MeasureAggregator,
    stats: &'a HashMap<String, ColumnStats>,
) -> Option<&'a str> {
    if measure.is_wildcard_count() {
        stats.keys().min().map(String::as_str)
    } else {
        Some(measure.column.as_str())
    }
}

/// Running statistics of a segment-statistics query: one slot per measure plus
/// the materialized per-measure results.
#[derive(Debug, Default)]
pub struct RunningStatistics {
    slots: Vec<Option<ColumnStats>>,
    measure_results: HashMap<String, MeasureValue>,
    measure_functions: Vec<String>,
    group_by_cols: Vec<String>,
    eval_accumulators: HashMap<String, EvalAccumulator>,
}

impl RunningStatistics {
    pub fn new(measure_ops: &[MeasureAggregator]) -> Self {
        Self {
            slots: vec![None; measure_ops.len()],
            measure_results: HashMap::with_capacity(measure_ops.len()),
            measure_functions: measure_ops.iter().map(ToString::to_string).collect(),
            group_by_cols: Vec::new(),
            eval_accumulators: HashMap::new(),
        }
    }

    /// Folds one segment's column statistics in.
    ///
    /// Structural problems fail before anything is merged. Eval measures that cannot be
    /// evaluated are returned as failures while every other measure is still merged.
    pub fn update(
        &mut self,
        stats: &HashMap<String, ColumnStats>,
        measure_ops: &[MeasureAggregator],
        max_list_values: usize,
    ) -> Result<Vec<(String, EvalError)>, StatsMergeError> {
        if let Some(unsupported) = measure_ops.iter().find(|op| !op.function.is_mergeable()) {
            return Err(StatsMergeError::UnsupportedFunction {
                measure: unsupported.to_string(),
                function: unsupported.function,
            });
        }
        if self.slots.len() < measure_ops.len() {
            self.slots.resize(measure_ops.len(), None);
        }

        let mut failures = Vec::new();
        if stats.is_empty() {
            return Ok(failures);
        }

        for (idx, measure) in measure_ops.iter().enumerate() {
            if measure.eval.is_some() {
                if let Err(err) = apply_eval_measure(
                    measure,
                    stats,
                    &mut self.measure_results,
                    &mut self.eval_accumulators,
                    max_list_values,
                ) {
                    tracing::error!(measure = %measure, error = %err, "Failed to evaluate measure");
                    failures.push((measure.to_string(), err));
                }
                continue;
            }

            let Some(current) = resolve_column(measure, stats).and_then(|col| stats.get(col))
            else {
                tracing::debug!(measure = %measure, "Segment has no statistics for measure column");
                continue;
            };

            let running = self.slots[idx].get_or_insert_with(ColumnStats::default);
            running.merge_capped(current, max_list_values);
            self.measure_results
                .insert(measure.to_string(), measure_value(measure.function, running));
        }
        Ok(failures)
    }

    pub fn measure_results(&self) -> &HashMap<String, MeasureValue> {
        &self.measure_results
    }

    pub fn measure_functions(&self) -> &[String] {
        &self.measure_functions
    }

    pub fn group_by_cols(&self) -> &[String] {
        &self.group_by_cols
    }

    pub fn slots(&self) -> &[Option<ColumnStats>] {
        &self.slots
    }

    /// Replaces the results with ones computed elsewhere.
    pub(crate) fn set_final(
        &mut self,
        measure_functions: Vec<String>,
        measure_results: HashMap<String, MeasureValue>,
    ) {
        self.measure_functions = measure_functions;
        self.measure_results = measure_results;
        self.group_by_cols.clear();
    }
}
