use crate::{AggregationResult, BucketContributions, BucketRow, RawLog, RecordResultContainer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Shape of the query; decides which merge paths are legal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryType {
    RawRecord,
    GroupBy,
    SegmentStatistics,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchNodeType {
    /// The query matches every record; no filter has to be evaluated.
    MatchAll,
    Filtered,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl TimeRange {
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        Self { start_ms, end_ms }
    }
}

/// What a segment search worker knows about a segment before scanning it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentCandidate {
    pub time_range: TimeRange,
    pub node_type: SearchNodeType,
    pub other_aggs_present: bool,
    pub time_aggs: bool,
}

/// Matched records, match count and bucket contributions of one searched segment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentPartial {
    pub records: Vec<RecordResultContainer>,
    pub matched_count: u64,
    #[serde(default)]
    pub buckets: BucketContributions,
}

/// Partial result received from a peer query node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RemotePartial {
    pub records: Vec<RecordResultContainer>,
    /// Raw payload for every entry of `records`, index-aligned.
    pub raw_logs: Vec<RawLog>,
    pub all_columns: HashSet<String>,
    #[serde(default)]
    pub buckets: BucketContributions,
    pub remote_count: u64,
    pub early_exit: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountOp {
    Equals,
    GreaterThanOrEqual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCount {
    pub total_count: u64,
    pub early_exit_allowed: bool,
    pub op: CountOp,
}

/// Authoritative cross-node result pushed down by a coordinator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    #[serde(default)]
    pub group_by_cols: Vec<String>,
    #[serde(default)]
    pub histogram: BTreeMap<String, AggregationResult>,
    #[serde(default)]
    pub measure_results: Vec<BucketRow>,
    #[serde(default)]
    pub measure_functions: Vec<String>,
    #[serde(default)]
    pub columns_order: HashMap<String, usize>,
}
