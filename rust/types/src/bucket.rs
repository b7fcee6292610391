use crate::{ColumnStats, MeasureValue, ScalarValue};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Identity of one group-by or time-histogram bucket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BucketKey {
    Scalar(ScalarValue),
    Strings(Vec<String>),
    Mixed(Vec<ScalarValue>),
}

impl BucketKey {
    /// Group-by values in their canonical string form, one per key component.
    pub fn render(&self) -> Vec<String> {
        match self {
            BucketKey::Scalar(value) => vec![value.to_string()],
            BucketKey::Strings(values) => values.clone(),
            BucketKey::Mixed(values) => values.iter().map(ToString::to_string).collect(),
        }
    }

    /// Stable string used to identify the bucket in hash maps. Floats inside keys
    /// rule out deriving `Hash`. Every component carries its type, so `Signed(200)`
    /// and `Text("200")` stay distinct buckets, as do `Null` and `Text("null")`.
    pub fn hash_key(&self) -> String {
        let (tag, components) = match self {
            BucketKey::Scalar(value) => ("s", vec![typed_component(value)]),
            BucketKey::Strings(values) => ("v", values.iter().map(|v| format!("t{v}")).collect()),
            BucketKey::Mixed(values) => ("m", values.iter().map(typed_component).collect()),
        };
        format!("{tag}:{}", components.iter().join("\u{1f}"))
    }
}

fn typed_component(value: &ScalarValue) -> String {
    let tag = match value {
        ScalarValue::Null => "n",
        ScalarValue::Bool(_) => "b",
        ScalarValue::Signed(_) => "i",
        ScalarValue::Unsigned(_) => "u",
        ScalarValue::Float(_) => "f",
        ScalarValue::Text(_) => "t",
    };
    format!("{tag}{value}")
}

impl From<&str> for BucketKey {
    fn from(value: &str) -> Self {
        BucketKey::Scalar(ScalarValue::from(value))
    }
}

/// One segment's (or peer's) contribution to a group-by bucket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupByBucket {
    pub key: BucketKey,
    pub count: u64,
    #[serde(default)]
    pub columns: HashMap<String, ColumnStats>,
}

impl GroupByBucket {
    pub fn new(key: BucketKey, count: u64) -> Self {
        Self {
            key,
            count,
            columns: HashMap::new(),
        }
    }

    pub fn with_column(mut self, column: impl Into<String>, stats: ColumnStats) -> Self {
        self.columns.insert(column.into(), stats);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBucket {
    pub start_ms: u64,
    pub count: u64,
}

/// Bucket contributions shipped with a segment or peer partial result.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketContributions {
    #[serde(default)]
    pub time_buckets: Vec<TimeBucket>,
    #[serde(default)]
    pub group_by_buckets: Vec<GroupByBucket>,
}

impl BucketContributions {
    pub fn is_empty(&self) -> bool {
        self.time_buckets.is_empty() && self.group_by_buckets.is_empty()
    }
}

/// Final values of one bucket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BucketResult {
    pub key: BucketKey,
    pub count: u64,
    pub stat_res: BTreeMap<String, MeasureValue>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub is_date_histogram: bool,
    pub results: Vec<BucketResult>,
}

/// One externally consumable row: group-by values plus measure name to value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketRow {
    pub group_by_values: Vec<String>,
    pub measure_val: BTreeMap<String, MeasureValue>,
}
