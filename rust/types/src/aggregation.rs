use crate::{EvalExpr, WILDCARD_COLUMN};
use serde::{Deserialize, Serialize};
use sift_error::{ErrorCodes, SiftError};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationFunction {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    Range,
    Cardinality,
    Values,
    List,
    // Accepted by the query language but not mergeable from column statistics.
    Median,
    Mode,
}

impl AggregationFunction {
    pub fn name(&self) -> &'static str {
        match self {
            AggregationFunction::Count => "count",
            AggregationFunction::Sum => "sum",
            AggregationFunction::Min => "min",
            AggregationFunction::Max => "max",
            AggregationFunction::Avg => "avg",
            AggregationFunction::Range => "range",
            AggregationFunction::Cardinality => "cardinality",
            AggregationFunction::Values => "values",
            AggregationFunction::List => "list",
            AggregationFunction::Median => "median",
            AggregationFunction::Mode => "mode",
        }
    }

    pub fn is_mergeable(&self) -> bool {
        !matches!(self, AggregationFunction::Median | AggregationFunction::Mode)
    }
}

impl fmt::Display for AggregationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum AggregationSpecError {
    #[error("Unknown aggregation function: {0}")]
    UnknownFunction(String),
    #[error("Time histogram {0} has a zero interval")]
    ZeroInterval(String),
    #[error("Time histogram {name} ends before it starts ({start_ms} > {end_ms})")]
    InvertedTimeRange {
        name: String,
        start_ms: u64,
        end_ms: u64,
    },
    #[error("Group-by request {0} has no group-by columns")]
    NoGroupByColumns(String),
    #[error("Measure {0} has an empty column name")]
    EmptyMeasureColumn(String),
}

impl SiftError for AggregationSpecError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

impl FromStr for AggregationFunction {
    type Err = AggregationSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(AggregationFunction::Count),
            "sum" => Ok(AggregationFunction::Sum),
            "min" => Ok(AggregationFunction::Min),
            "max" => Ok(AggregationFunction::Max),
            "avg" => Ok(AggregationFunction::Avg),
            "range" => Ok(AggregationFunction::Range),
            "cardinality" | "dc" | "distinct_count" => Ok(AggregationFunction::Cardinality),
            "values" => Ok(AggregationFunction::Values),
            "list" => Ok(AggregationFunction::List),
            "median" => Ok(AggregationFunction::Median),
            "mode" => Ok(AggregationFunction::Mode),
            other => Err(AggregationSpecError::UnknownFunction(other.to_string())),
        }
    }
}

/// One requested measure, e.g. `avg(latency)` or `sum(eval(bytes * 8))`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasureAggregator {
    pub function: AggregationFunction,
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval: Option<EvalExpr>,
}

impl MeasureAggregator {
    pub fn new(function: AggregationFunction, column: impl Into<String>) -> Self {
        Self {
            function,
            column: column.into(),
            eval: None,
        }
    }

    pub fn parse(function: &str, column: impl Into<String>) -> Result<Self, AggregationSpecError> {
        Ok(Self::new(function.parse()?, column))
    }

    pub fn with_eval(function: AggregationFunction, expr: EvalExpr) -> Self {
        Self {
            function,
            column: expr.to_string(),
            eval: Some(expr),
        }
    }

    pub fn is_wildcard_count(&self) -> bool {
        self.function == AggregationFunction::Count
            && self.eval.is_none()
            && self.column == WILDCARD_COLUMN
    }
}

/// The stable identifier of a measure; used as the key of its result.
impl fmt::Display for MeasureAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.eval {
            Some(expr) => write!(f, "{}(eval({}))", self.function, expr),
            None => write!(f, "{}({})", self.function, self.column),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    pub ascending: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeHistogramRequest {
    pub agg_name: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub interval_ms: u64,
}

impl TimeHistogramRequest {
    /// Start of the bucket that `timestamp_ms` falls in.
    pub fn bucket_start(&self, timestamp_ms: u64) -> u64 {
        let offset = timestamp_ms.saturating_sub(self.start_ms);
        self.start_ms + offset - offset % self.interval_ms.max(1)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupByRequest {
    pub agg_name: String,
    pub group_by_columns: Vec<String>,
    pub measure_operations: Vec<MeasureAggregator>,
    /// Target number of distinct buckets; once reached a group-by query can stop scanning.
    pub bucket_count: usize,
}

/// Immutable description of what a query aggregates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryAggregators {
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub time_histogram: Option<TimeHistogramRequest>,
    #[serde(default)]
    pub group_by: Option<GroupByRequest>,
    #[serde(default)]
    pub measure_operations: Vec<MeasureAggregator>,
    pub early_exit: bool,
}

impl Default for QueryAggregators {
    fn default() -> Self {
        Self {
            sort: None,
            time_histogram: None,
            group_by: None,
            measure_operations: Vec::new(),
            early_exit: true,
        }
    }
}

impl QueryAggregators {
    pub fn with_sort(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.sort = Some(SortSpec {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn with_time_histogram(mut self, histogram: TimeHistogramRequest) -> Self {
        self.time_histogram = Some(histogram);
        self
    }

    pub fn with_group_by(mut self, group_by: GroupByRequest) -> Self {
        self.group_by = Some(group_by);
        self
    }

    pub fn with_measures(mut self, measures: Vec<MeasureAggregator>) -> Self {
        self.measure_operations = measures;
        self
    }

    pub fn with_early_exit(mut self, early_exit: bool) -> Self {
        self.early_exit = early_exit;
        self
    }

    pub fn validate(&self) -> Result<(), AggregationSpecError> {
        if let Some(histogram) = &self.time_histogram {
            if histogram.interval_ms == 0 {
                return Err(AggregationSpecError::ZeroInterval(histogram.agg_name.clone()));
            }
            if histogram.start_ms > histogram.end_ms {
                return Err(AggregationSpecError::InvertedTimeRange {
                    name: histogram.agg_name.clone(),
                    start_ms: histogram.start_ms,
                    end_ms: histogram.end_ms,
                });
            }
        }
        let group_measures = self
            .group_by
            .iter()
            .flat_map(|group_by| group_by.measure_operations.iter());
        if let Some(group_by) = &self.group_by {
            if group_by.group_by_columns.is_empty() {
                return Err(AggregationSpecError::NoGroupByColumns(
                    group_by.agg_name.clone(),
                ));
            }
        }
        for measure in self.measure_operations.iter().chain(group_measures) {
            if measure.eval.is_none() && measure.column.is_empty() {
                return Err(AggregationSpecError::EmptyMeasureColumn(measure.to_string()));
            }
        }
        Ok(())
    }
}
