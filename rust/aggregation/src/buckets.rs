use crate::running_stats::measure_value;
use sift_error::{ErrorCodes, SiftError};
use sift_types::{
    merge_column_stats_capped, AggregationResult, BucketContributions, BucketKey, BucketResult,
    GroupByBucket, GroupByRequest, MeasureAggregator, MeasureValue, QueryAggregators,
    ScalarValue,
};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

pub const TIME_BUCKET_COUNT_MEASURE: &str = "count";

#[derive(Debug, Error)]
pub enum BucketMergeError {
    #[error("Received time buckets but no time histogram was requested")]
    UnexpectedTimeBuckets,
    #[error("Received group-by buckets but no group-by was requested")]
    UnexpectedGroupByBuckets,
    #[error("Group-by bucket key {key} has {actual} values, expected {expected}")]
    KeyArity {
        key: String,
        expected: usize,
        actual: usize,
    },
}

impl SiftError for BucketMergeError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimeBuckets {
    pub all_running_buckets: BTreeMap<u64, u64>,
}

/// Group-by buckets in first-seen order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupByBuckets {
    pub all_running_buckets: Vec<GroupByBucket>,
    positions: HashMap<String, usize>,
}

impl GroupByBuckets {
    fn merge_bucket(&mut self, bucket: &GroupByBucket, max_records: usize) {
        let hash_key = bucket.key.hash_key();
        match self.positions.get(&hash_key) {
            Some(&idx) => {
                let running = &mut self.all_running_buckets[idx];
                running.count += bucket.count;
                merge_column_stats_capped(&mut running.columns, &bucket.columns, max_records);
            }
            None => {
                self.positions
                    .insert(hash_key, self.all_running_buckets.len());
                let mut fresh = GroupByBucket::new(bucket.key.clone(), bucket.count);
                merge_column_stats_capped(&mut fresh.columns, &bucket.columns, max_records);
                self.all_running_buckets.push(fresh);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.all_running_buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all_running_buckets.is_empty()
    }
}

fn key_arity(key: &BucketKey) -> usize {
    match key {
        BucketKey::Scalar(_) => 1,
        BucketKey::Strings(values) => values.len(),
        BucketKey::Mixed(values) => values.len(),
    }
}

/// Running time-histogram and group-by state of a query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunningBuckets {
    pub time_aggregation: Option<TimeBuckets>,
    pub group_by_aggregation: Option<GroupByBuckets>,
}

impl RunningBuckets {
    pub fn new(aggs: Option<&QueryAggregators>) -> Self {
        Self {
            time_aggregation: aggs
                .and_then(|aggs| aggs.time_histogram.as_ref())
                .map(|_| TimeBuckets::default()),
            group_by_aggregation: aggs
                .and_then(|aggs| aggs.group_by.as_ref())
                .map(|_| GroupByBuckets::default()),
        }
    }

    /// Merges bucket contributions. Each bucket merges on its own, so a failure
    /// leaves the buckets before it merged.
    pub fn merge(
        &mut self,
        contributions: &BucketContributions,
        group_by: Option<&GroupByRequest>,
        max_records: usize,
    ) -> Result<(), BucketMergeError> {
        if !contributions.time_buckets.is_empty() {
            let time = self
                .time_aggregation
                .as_mut()
                .ok_or(BucketMergeError::UnexpectedTimeBuckets)?;
            for bucket in &contributions.time_buckets {
                *time.all_running_buckets.entry(bucket.start_ms).or_insert(0) += bucket.count;
            }
        }

        if !contributions.group_by_buckets.is_empty() {
            let buckets = self
                .group_by_aggregation
                .as_mut()
                .ok_or(BucketMergeError::UnexpectedGroupByBuckets)?;
            let expected = group_by.map(|request| request.group_by_columns.len());
            for bucket in &contributions.group_by_buckets {
                let actual = key_arity(&bucket.key);
                if let Some(expected) = expected.filter(|expected| *expected != actual) {
                    return Err(BucketMergeError::KeyArity {
                        key: bucket.key.render().join(","),
                        expected,
                        actual,
                    });
                }
                buckets.merge_bucket(bucket, max_records);
            }
        }
        Ok(())
    }

    pub fn num_buckets(&self) -> usize {
        self.time_aggregation
            .as_ref()
            .map_or(0, |time| time.all_running_buckets.len())
            + self
                .group_by_aggregation
                .as_ref()
                .map_or(0, GroupByBuckets::len)
    }

    pub fn time_buckets(&self) -> AggregationResult {
        let results = self
            .time_aggregation
            .iter()
            .flat_map(|time| time.all_running_buckets.iter())
            .map(|(start_ms, count)| BucketResult {
                key: BucketKey::Scalar(ScalarValue::Unsigned(*start_ms)),
                count: *count,
                stat_res: BTreeMap::from([(
                    TIME_BUCKET_COUNT_MEASURE.to_string(),
                    MeasureValue::Signed(*count as i64),
                )]),
            })
            .collect();
        AggregationResult {
            is_date_histogram: true,
            results,
        }
    }

    pub fn group_by_buckets(&self, request: &GroupByRequest) -> AggregationResult {
        let results = self
            .group_by_aggregation
            .iter()
            .flat_map(|buckets| buckets.all_running_buckets.iter())
            .map(|bucket| BucketResult {
                key: bucket.key.clone(),
                count: bucket.count,
                stat_res: request
                    .measure_operations
                    .iter()
                    .map(|measure| (measure.to_string(), bucket_measure(measure, bucket)))
                    .collect(),
            })
            .collect();
        AggregationResult {
            is_date_histogram: false,
            results,
        }
    }

    /// Converts the running state into results keyed by aggregation name.
    pub fn convert(&self, aggs: Option<&QueryAggregators>) -> BTreeMap<String, AggregationResult> {
        let mut converted = BTreeMap::new();
        let Some(aggs) = aggs else {
            return converted;
        };
        if let (Some(histogram), Some(_)) = (&aggs.time_histogram, &self.time_aggregation) {
            converted.insert(histogram.agg_name.clone(), self.time_buckets());
        }
        if let (Some(request), Some(_)) = (&aggs.group_by, &self.group_by_aggregation) {
            converted.insert(request.agg_name.clone(), self.group_by_buckets(request));
        }
        converted
    }
}

/// Value of one measure in one bucket. Eval measures read the derived column the
/// bucket producer stored under the expression's text.
fn bucket_measure(measure: &MeasureAggregator, bucket: &GroupByBucket) -> MeasureValue {
    if measure.is_wildcard_count() {
        return MeasureValue::Signed(bucket.count as i64);
    }
    match bucket.columns.get(&measure.column) {
        Some(stats) => measure_value(measure.function, stats),
        None => MeasureValue::Null,
    }
}
