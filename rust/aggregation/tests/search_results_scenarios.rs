mod common;

use common::{
    column_stats, group_by_partial, group_by_request, host_bucket, records_partial,
    search_results,
};
use sift_aggregation::{
    EarlyExitType, FinalizeError, QueryParams, SearchResults, SearchResultsConfig,
    StatsMergeError, StatsResults,
};
use sift_config::Configurable;
use sift_error::{ErrorCodes, SiftError};
use sift_types::{
    AggregationFunction, AggregationResult, ArithOp, BucketKey, BucketResult, BucketRow, ColumnStats,
    CountOp, EvalExpr, MeasureAggregator, MeasureValue, NodeResult, NumericStats, Number,
    QueryAggregators, QueryType, SearchNodeType, SegmentCandidate, TimeHistogramRequest,
    TimeRange,
};
use std::collections::{BTreeMap, HashMap};

fn ids(sr: &SearchResults) -> Vec<String> {
    sr.results().into_iter().map(|r| r.record_id).collect()
}

#[test]
fn test_top_k_keeps_smallest_ascending() {
    let sr = search_results(
        2,
        QueryType::RawRecord,
        Some(QueryAggregators::default().with_sort("e", true)),
    );
    sr.add_block_results(&records_partial(&[("id1", 5.0), ("id2", 1.0)]));
    sr.add_block_results(&records_partial(&[("id3", 3.0)]));

    assert_eq!(ids(&sr), vec!["id2", "id3"]);
    assert!(!sr.has_remote_log("id1"));
    assert_eq!(sr.total_count(), 3);
    assert!(!sr.should_continue_raw_search());
}

#[test]
fn test_average_merges_partial_sums() {
    let avg = MeasureAggregator::new(AggregationFunction::Avg, "x");
    let sr = search_results(
        10,
        QueryType::SegmentStatistics,
        Some(QueryAggregators::default().with_measures(vec![avg.clone()])),
    );
    for (sum, count) in [(10, 4), (7, 3)] {
        let stats = ColumnStats {
            is_numeric: true,
            count,
            numeric: Some(NumericStats {
                min: Number::Signed(0),
                max: Number::Signed(5),
                sum: Number::Signed(sum).into(),
            }),
            ..Default::default()
        };
        sr.add_segment_statistics(&HashMap::from([("x".to_string(), stats)]), &[avg.clone()])
            .unwrap();
    }
    assert_eq!(
        sr.segment_stats_measure_results()["avg(x)"],
        MeasureValue::Float(17.0 / 7.0)
    );
}

#[test]
fn test_block_merge_keeps_every_row_for_eval() {
    let ops = vec![
        MeasureAggregator::new(AggregationFunction::Sum, "x"),
        MeasureAggregator::with_eval(
            AggregationFunction::Sum,
            EvalExpr::arith(ArithOp::Mul, EvalExpr::field("x"), EvalExpr::Number(1.0)),
        ),
    ];
    let blocks = StatsResults::new();
    for _ in 0..3 {
        blocks.merge_seg_stats(&column_stats(&[("x", &[1; 60])]));
    }
    assert_eq!(blocks.seg_stats()["x"].records.len(), 180);

    let sr = search_results(
        10,
        QueryType::SegmentStatistics,
        Some(QueryAggregators::default().with_measures(ops.clone())),
    );
    sr.add_segment_statistics(&blocks.seg_stats(), &ops).unwrap();
    let results = sr.segment_stats_measure_results();
    assert_eq!(results["sum(x)"].as_f64(), Some(180.0));
    assert_eq!(results["sum(eval((x * 1)))"].as_f64(), Some(180.0));
}

#[test]
fn test_list_is_capped_across_segments() {
    let ops = vec![
        MeasureAggregator::new(AggregationFunction::List, "x"),
        MeasureAggregator::new(AggregationFunction::Sum, "x"),
    ];
    let sr = SearchResults::new(
        QueryParams {
            qid: 1,
            size_limit: 10,
            query_type: QueryType::SegmentStatistics,
            aggs: Some(QueryAggregators::default().with_measures(ops.clone())),
        },
        SearchResultsConfig {
            max_list_values: 3,
            ..Default::default()
        },
    )
    .unwrap();
    sr.add_segment_statistics(&column_stats(&[("x", &[1, 2])]), &ops)
        .unwrap();
    sr.add_segment_statistics(&column_stats(&[("x", &[3, 4, 5])]), &ops)
        .unwrap();

    let results = sr.segment_stats_measure_results();
    assert_eq!(
        results["list(x)"],
        MeasureValue::TextList(vec!["1".to_string(), "2".to_string(), "3".to_string()])
    );
    assert_eq!(results["sum(x)"], MeasureValue::Signed(15));
}

#[test]
fn test_group_by_early_exit_at_bucket_target() {
    let sr = search_results(
        0,
        QueryType::GroupBy,
        Some(QueryAggregators::default().with_group_by(group_by_request(3))),
    );
    let candidate = SegmentCandidate {
        time_range: TimeRange::new(0, 100),
        node_type: SearchNodeType::Filtered,
        other_aggs_present: true,
        time_aggs: false,
    };

    sr.add_block_results(&group_by_partial(vec![
        host_bucket("a", &[1]),
        host_bucket("b", &[2]),
    ]));
    assert_eq!(sr.should_search_segment(&candidate), EarlyExitType::ContinueScan);

    sr.add_block_results(&group_by_partial(vec![host_bucket("c", &[3])]));
    assert_eq!(sr.should_search_segment(&candidate), EarlyExitType::SkipEntirely);
}

#[test]
fn test_match_all_time_histogram_only_needs_aggregates() {
    let sr = search_results(
        1,
        QueryType::RawRecord,
        Some(
            QueryAggregators::default().with_time_histogram(TimeHistogramRequest {
                agg_name: "timechart".to_string(),
                start_ms: 0,
                end_ms: 10_000,
                interval_ms: 1_000,
            }),
        ),
    );
    sr.add_block_results(&records_partial(&[("a", 1.0), ("b", 2.0)]));
    let candidate = SegmentCandidate {
        time_range: TimeRange::new(0, 1_000),
        node_type: SearchNodeType::MatchAll,
        other_aggs_present: false,
        time_aggs: true,
    };
    assert_eq!(
        sr.should_search_segment(&candidate),
        EarlyExitType::AggregatesOnly
    );
    assert!(sr.should_search_range(0, 1_000));
}

#[test]
fn test_group_by_rows_and_idempotent_reads() {
    let sr = search_results(
        0,
        QueryType::GroupBy,
        Some(QueryAggregators::default().with_group_by(group_by_request(10))),
    );
    sr.add_block_results(&group_by_partial(vec![
        host_bucket("web-1", &[100, 200]),
        host_bucket("web-2", &[50]),
    ]));
    sr.add_block_results(&group_by_partial(vec![host_bucket("web-1", &[1_000])]));

    let first = sr.bucket_results();
    assert_eq!(first, sr.bucket_results());

    let rows = sr.group_by_buckets(10);
    assert_eq!(rows.added, 2);
    assert_eq!(rows.group_by_columns, vec!["host"]);
    assert_eq!(rows.measure_functions, vec!["count(*)", "sum(bytes)"]);
    assert_eq!(rows.rows[0].group_by_values, vec!["web-1"]);
    assert_eq!(rows.rows[0].measure_val["count(*)"], MeasureValue::Signed(3));
    assert_eq!(rows.rows[0].measure_val["sum(bytes)"], MeasureValue::Signed(1_300));
    assert_eq!(sr.num_buckets(), 2);

    // A new contribution invalidates the cached conversion.
    sr.add_block_results(&group_by_partial(vec![host_bucket("web-3", &[1])]));
    assert_eq!(sr.group_by_buckets(10).added, 3);
    assert_eq!(sr.group_by_buckets(1).added, 1);
}

#[test]
fn test_finalize_freezes_buckets() {
    let sr = search_results(
        0,
        QueryType::GroupBy,
        Some(QueryAggregators::default().with_group_by(group_by_request(10))),
    );
    sr.add_block_results(&group_by_partial(vec![host_bucket("local", &[1])]));

    let histogram = BTreeMap::from([(
        "groupby".to_string(),
        AggregationResult {
            is_date_histogram: false,
            results: vec![BucketResult {
                key: BucketKey::from("global"),
                count: 42,
                stat_res: BTreeMap::from([("count(*)".to_string(), MeasureValue::Signed(42))]),
            }],
        },
    )]);
    let node_result = NodeResult {
        group_by_cols: vec!["host".to_string()],
        histogram: histogram.clone(),
        columns_order: HashMap::from([("host".to_string(), 0)]),
        ..Default::default()
    };
    sr.finalize_from(&node_result).unwrap();
    assert!(sr.stats_are_final());

    sr.add_block_results(&group_by_partial(vec![host_bucket("late", &[1])]));
    assert_eq!(sr.bucket_results(), histogram);
    assert_eq!(sr.group_by_buckets(10).columns_order["host"], 0);

    let err = sr.finalize_from(&NodeResult::default()).unwrap_err();
    assert!(matches!(err, FinalizeError::AlreadyFinal { .. }));
    assert_eq!(sr.bucket_results(), histogram);
}

#[test]
fn test_finalize_parses_measure_strings() {
    let sr = search_results(0, QueryType::SegmentStatistics, None);
    let node_result = NodeResult {
        measure_functions: vec![
            "count(x)".to_string(),
            "avg(x)".to_string(),
            "values(y)".to_string(),
        ],
        measure_results: vec![BucketRow {
            group_by_values: vec!["*".to_string()],
            measure_val: BTreeMap::from([
                ("count(x)".to_string(), MeasureValue::Text("1,234".to_string())),
                ("avg(x)".to_string(), MeasureValue::Text("2.5".to_string())),
                ("values(y)".to_string(), MeasureValue::Text("GET".to_string())),
            ]),
        }],
        ..Default::default()
    };
    sr.finalize_from(&node_result).unwrap();
    let results = sr.segment_stats_measure_results();
    assert_eq!(results["count(x)"], MeasureValue::Signed(1_234));
    assert_eq!(results["avg(x)"], MeasureValue::Float(2.5));
    assert_eq!(results["values(y)"], MeasureValue::Text("GET".to_string()));

    let err = sr
        .add_segment_statistics(&column_stats(&[("x", &[1])]), &[])
        .unwrap_err();
    assert!(matches!(err, StatsMergeError::StatsAreFinal));
}

#[test]
fn test_finalize_validates_before_mutating() {
    let sr = search_results(0, QueryType::SegmentStatistics, None);
    let missing = NodeResult {
        measure_functions: vec!["sum(x)".to_string()],
        measure_results: vec![BucketRow::default()],
        ..Default::default()
    };
    let err = sr.finalize_from(&missing).unwrap_err();
    assert!(matches!(err, FinalizeError::MissingMeasure { .. }));
    assert!(!sr.stats_are_final());

    let err = sr.finalize_from(&NodeResult::default()).unwrap_err();
    assert!(matches!(
        err,
        FinalizeError::UnexpectedMeasureRows { rows: 0, .. }
    ));
    assert!(!sr.stats_are_final());
}

#[test]
fn test_segment_encoding_starts_at_one_and_is_stable() {
    let sr = search_results(10, QueryType::RawRecord, None);
    assert_eq!(sr.segment_encoding("seg-a").unwrap(), 1);
    assert_eq!(sr.segment_encoding("seg-b").unwrap(), 2);
    assert_eq!(sr.segment_encoding("seg-a").unwrap(), 1);
    assert_eq!(sr.segment_key(2).as_deref(), Some("seg-b"));
    assert_eq!(sr.segment_key(0), None);
}

#[test]
fn test_segment_encoding_hands_out_the_last_value() {
    let sr = search_results(10, QueryType::RawRecord, None);
    for i in 1..=u16::MAX {
        assert_eq!(sr.segment_encoding(&format!("seg-{i}")).unwrap(), i);
    }
    assert_eq!(sr.segment_key(u16::MAX).as_deref(), Some("seg-65535"));

    let err = sr.segment_encoding("seg-overflow").unwrap_err();
    assert_eq!(err.code(), ErrorCodes::OutOfRange);
    assert_eq!(sr.segment_encoding("seg-65535").unwrap(), u16::MAX);
    assert_eq!(sr.segment_key(1).as_deref(), Some("seg-1"));
}

#[test]
fn test_pending_stats_are_taken_once() {
    let sum = MeasureAggregator::new(AggregationFunction::Sum, "x");
    let producer = search_results(10, QueryType::SegmentStatistics, None);
    let enc = producer.segment_encoding("seg-a").unwrap();
    producer.add_pending_segment_stats(enc, column_stats(&[("x", &[1, 2, 3])]));

    let encoded = producer.take_encoded_segment_stats(enc).unwrap().unwrap();
    assert!(producer.take_encoded_segment_stats(enc).unwrap().is_none());

    let consumer = search_results(
        10,
        QueryType::SegmentStatistics,
        Some(QueryAggregators::default().with_measures(vec![sum])),
    );
    consumer.merge_encoded_segment_stats(&encoded).unwrap();
    consumer.merge_encoded_segment_stats(&encoded).unwrap();
    assert_eq!(
        consumer.segment_stats_measure_results()["sum(x)"],
        MeasureValue::Signed(12)
    );

    let err = consumer.merge_encoded_segment_stats(b"not json").unwrap_err();
    assert_eq!(err.code(), ErrorCodes::DataLoss);
}

#[test]
fn test_segment_stats_rows_are_humanized() {
    let ops = vec![
        MeasureAggregator::new(AggregationFunction::Sum, "bytes"),
        MeasureAggregator::new(AggregationFunction::Avg, "bytes"),
    ];
    let sr = search_results(
        10,
        QueryType::SegmentStatistics,
        Some(QueryAggregators::default().with_measures(ops.clone())),
    );
    let enc = sr.segment_encoding("seg-a").unwrap();
    sr.add_pending_segment_stats(enc, column_stats(&[("bytes", &[1_000_000])]));
    sr.add_segment_statistics(&column_stats(&[("bytes", &[1_000_000, 1, 1])]), &ops)
        .unwrap();

    let rows = sr.segment_stats_rows(enc);
    assert_eq!(rows.measure_count, 2);
    assert_eq!(rows.measure_functions, vec!["sum(bytes)", "avg(bytes)"]);
    assert_eq!(rows.rows[0].group_by_values, vec!["*"]);
    assert_eq!(
        rows.rows[0].measure_val["sum(bytes)"],
        MeasureValue::Text("1,000,002".to_string())
    );
    assert_eq!(
        rows.rows[0].measure_val["avg(bytes)"],
        MeasureValue::Text("333,334".to_string())
    );
    assert!(sr.take_encoded_segment_stats(enc).unwrap().is_none());
}

#[test]
fn test_eval_failures_are_recorded_and_other_measures_merge() {
    let ops = vec![
        MeasureAggregator::new(AggregationFunction::Max, "x"),
        MeasureAggregator::with_eval(AggregationFunction::Sum, EvalExpr::field("absent")),
    ];
    let sr = search_results(
        10,
        QueryType::SegmentStatistics,
        Some(QueryAggregators::default().with_measures(ops.clone())),
    );
    let err = sr
        .add_segment_statistics(&column_stats(&[("x", &[3, 8])]), &ops)
        .unwrap_err();
    assert!(matches!(err, StatsMergeError::MeasuresFailed(ref names) if names == &["sum(eval(absent))"]));
    assert_eq!(sr.errors().len(), 1);
    assert_eq!(
        sr.segment_stats_measure_results()["max(x)"],
        MeasureValue::Signed(8)
    );
}

#[test]
fn test_unmergeable_function_is_structural() {
    let ops = vec![MeasureAggregator::new(AggregationFunction::Median, "x")];
    let sr = search_results(10, QueryType::SegmentStatistics, None);
    let err = sr
        .add_segment_statistics(&column_stats(&[("x", &[1])]), &ops)
        .unwrap_err();
    assert!(err.code().is_structural());
    assert!(sr.errors().is_empty());
}

#[test]
fn test_query_count_reflects_early_exit() {
    let sr = search_results(10, QueryType::RawRecord, None);
    sr.add_block_results(&records_partial(&[("a", 1.0)]));
    let count = sr.query_count();
    assert_eq!(count.total_count, 1);
    assert!(count.early_exit_allowed);
    assert_eq!(count.op, CountOp::Equals);

    sr.set_early_exit();
    assert_eq!(sr.query_count().op, CountOp::GreaterThanOrEqual);

    let disabled = search_results(
        10,
        QueryType::RawRecord,
        Some(QueryAggregators::default().with_early_exit(false)),
    );
    assert!(!disabled.query_count().early_exit_allowed);
}

#[test]
fn test_unexpected_local_buckets_are_recorded() {
    let sr = search_results(10, QueryType::RawRecord, None);
    sr.add_block_results(&group_by_partial(vec![host_bucket("a", &[1])]));
    let errors = sr.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code(), ErrorCodes::InvalidArgument);
    assert_eq!(sr.total_count(), 1);
}

#[test]
fn test_invalid_spec_is_rejected() {
    let mut request = group_by_request(3);
    request.group_by_columns.clear();
    let params = QueryParams {
        qid: 9,
        size_limit: 10,
        query_type: QueryType::GroupBy,
        aggs: Some(QueryAggregators::default().with_group_by(request)),
    };
    let err = SearchResults::try_from_config(&(SearchResultsConfig::default(), params))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCodes::InvalidArgument);
}
