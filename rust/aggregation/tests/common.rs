#![allow(dead_code)]

use sift_aggregation::{QueryParams, SearchResults, SearchResultsConfig};
use sift_types::{
    AggregationFunction, BucketContributions, BucketKey, ColumnStats, GroupByBucket,
    GroupByRequest, MeasureAggregator, QueryAggregators, QueryType, RecordResultContainer,
    SegmentPartial,
};
use std::collections::HashMap;

pub fn search_results(
    size_limit: u64,
    query_type: QueryType,
    aggs: Option<QueryAggregators>,
) -> SearchResults {
    SearchResults::new(
        QueryParams {
            qid: 1,
            size_limit,
            query_type,
            aggs,
        },
        SearchResultsConfig::default(),
    )
    .unwrap()
}

pub fn records_partial(records: &[(&str, f64)]) -> SegmentPartial {
    SegmentPartial {
        records: records
            .iter()
            .map(|(id, value)| RecordResultContainer::new(*id, *value))
            .collect(),
        matched_count: records.len() as u64,
        buckets: BucketContributions::default(),
    }
}

pub fn group_by_request(bucket_count: usize) -> GroupByRequest {
    GroupByRequest {
        agg_name: "groupby".to_string(),
        group_by_columns: vec!["host".to_string()],
        measure_operations: vec![
            MeasureAggregator::new(AggregationFunction::Count, "*"),
            MeasureAggregator::new(AggregationFunction::Sum, "bytes"),
        ],
        bucket_count,
    }
}

pub fn host_bucket(host: &str, bytes: &[i64]) -> GroupByBucket {
    GroupByBucket::new(BucketKey::from(host), bytes.len() as u64).with_column(
        "bytes",
        ColumnStats::from_values(bytes.iter().copied()),
    )
}

pub fn group_by_partial(buckets: Vec<GroupByBucket>) -> SegmentPartial {
    SegmentPartial {
        records: Vec::new(),
        matched_count: buckets.iter().map(|bucket| bucket.count).sum(),
        buckets: BucketContributions {
            time_buckets: Vec::new(),
            group_by_buckets: buckets,
        },
    }
}

pub fn column_stats(columns: &[(&str, &[i64])]) -> HashMap<String, ColumnStats> {
    columns
        .iter()
        .map(|(name, values)| {
            (
                name.to_string(),
                ColumnStats::from_values(values.iter().copied()),
            )
        })
        .collect()
}
