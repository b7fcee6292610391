use crate::block_results::BoundedResultMerger;
use sift_types::{QueryAggregators, QueryType, SearchNodeType, SegmentCandidate};
use std::fmt;

/// How much of a candidate segment still has to be searched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EarlyExitType {
    ContinueScan,
    /// Records are complete, but the segment still contributes to aggregations.
    AggregatesOnly,
    SkipEntirely,
}

impl fmt::Display for EarlyExitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EarlyExitType::ContinueScan => "continue_scan",
            EarlyExitType::AggregatesOnly => "aggregates_only",
            EarlyExitType::SkipEntirely => "skip_entirely",
        };
        f.write_str(name)
    }
}

/// Snapshot of the query state the early-exit rules read. Built under the
/// controller lock and never kept past it.
pub struct EarlyExitContext<'a> {
    pub result_count: u64,
    pub size_limit: u64,
    pub query_type: QueryType,
    pub aggs: Option<&'a QueryAggregators>,
    pub num_buckets: usize,
    pub merger: &'a dyn BoundedResultMerger,
}

impl EarlyExitContext<'_> {
    fn top_k_incomplete(&self) -> bool {
        self.result_count <= self.size_limit
    }

    /// Whether a record at the boundary of `[low_ms, high_ms]` would still make the top-K.
    /// Ascending sorts care about the earliest timestamp, descending ones about the latest.
    fn boundary_admitted(&self, low_ms: u64, high_ms: u64) -> Option<bool> {
        let sort = self.aggs?.sort.as_ref()?;
        let boundary = if sort.ascending { low_ms } else { high_ms };
        Some(self.merger.will_value_be_added(boundary as f64))
    }

    pub fn should_search_segment(&self, candidate: &SegmentCandidate) -> EarlyExitType {
        if self.top_k_incomplete() {
            return EarlyExitType::ContinueScan;
        }
        match self.query_type {
            QueryType::GroupBy => {
                let target = self
                    .aggs
                    .and_then(|aggs| aggs.group_by.as_ref())
                    .map_or(0, |request| request.bucket_count);
                return if self.num_buckets < target {
                    EarlyExitType::ContinueScan
                } else {
                    EarlyExitType::SkipEntirely
                };
            }
            QueryType::SegmentStatistics => return EarlyExitType::ContinueScan,
            QueryType::RawRecord => {}
        }

        let range = &candidate.time_range;
        if self.boundary_admitted(range.start_ms, range.end_ms) == Some(true) {
            return EarlyExitType::ContinueScan;
        }

        let match_all = candidate.node_type == SearchNodeType::MatchAll;
        if match_all && candidate.time_aggs && !candidate.other_aggs_present {
            return EarlyExitType::AggregatesOnly;
        }
        if !match_all && (candidate.time_aggs || candidate.other_aggs_present) {
            return EarlyExitType::ContinueScan;
        }

        let Some(aggs) = self.aggs else {
            return EarlyExitType::SkipEntirely;
        };
        if !aggs.early_exit || aggs.time_histogram.is_some() || aggs.group_by.is_some() {
            return EarlyExitType::ContinueScan;
        }
        EarlyExitType::SkipEntirely
    }

    /// Whether a time span wider than one segment still has to be searched.
    pub fn should_search_range(&self, low_ms: u64, high_ms: u64) -> bool {
        if self.query_type != QueryType::RawRecord || self.top_k_incomplete() {
            return true;
        }
        let Some(aggs) = self.aggs else {
            return true;
        };
        if !aggs.early_exit || aggs.time_histogram.is_some() {
            return true;
        }
        self.boundary_admitted(low_ms, high_ms).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_results::SortedRecordHeap;
    use sift_types::{
        AggregationFunction, GroupByRequest, MeasureAggregator, RecordResultContainer,
        TimeHistogramRequest, TimeRange,
    };

    fn candidate(node_type: SearchNodeType, time_aggs: bool, other: bool) -> SegmentCandidate {
        SegmentCandidate {
            time_range: TimeRange::new(1_000, 2_000),
            node_type,
            other_aggs_present: other,
            time_aggs,
        }
    }

    fn full_heap(sort: Option<&sift_types::SortSpec>) -> SortedRecordHeap {
        let mut heap = SortedRecordHeap::new(2, sort);
        heap.add(RecordResultContainer::new("a", 3_000.0));
        heap.add(RecordResultContainer::new("b", 4_000.0));
        heap
    }

    fn context<'a>(
        query_type: QueryType,
        aggs: Option<&'a QueryAggregators>,
        num_buckets: usize,
        merger: &'a dyn BoundedResultMerger,
    ) -> EarlyExitContext<'a> {
        EarlyExitContext {
            result_count: 5,
            size_limit: 2,
            query_type,
            aggs,
            num_buckets,
            merger,
        }
    }

    fn group_by_aggs(bucket_count: usize) -> QueryAggregators {
        QueryAggregators::default().with_group_by(GroupByRequest {
            agg_name: "groupby".to_string(),
            group_by_columns: vec!["host".to_string()],
            measure_operations: vec![MeasureAggregator::new(AggregationFunction::Count, "*")],
            bucket_count,
        })
    }

    fn histogram_aggs() -> QueryAggregators {
        QueryAggregators::default().with_time_histogram(TimeHistogramRequest {
            agg_name: "timechart".to_string(),
            start_ms: 0,
            end_ms: 10_000,
            interval_ms: 1_000,
        })
    }

    #[test]
    fn test_incomplete_top_k_always_scans() {
        let heap = full_heap(None);
        let mut ctx = context(QueryType::RawRecord, None, 0, &heap);
        ctx.result_count = 2;
        assert_eq!(
            ctx.should_search_segment(&candidate(SearchNodeType::MatchAll, false, false)),
            EarlyExitType::ContinueScan
        );
        assert!(ctx.should_search_range(0, 10));
    }

    #[test]
    fn test_group_by_stops_at_bucket_target() {
        let heap = full_heap(None);
        let aggs = group_by_aggs(3);
        let seg = candidate(SearchNodeType::Filtered, false, true);
        assert_eq!(
            context(QueryType::GroupBy, Some(&aggs), 2, &heap).should_search_segment(&seg),
            EarlyExitType::ContinueScan
        );
        assert_eq!(
            context(QueryType::GroupBy, Some(&aggs), 3, &heap).should_search_segment(&seg),
            EarlyExitType::SkipEntirely
        );
    }

    #[test]
    fn test_statistics_queries_scan() {
        let heap = full_heap(None);
        assert_eq!(
            context(QueryType::SegmentStatistics, None, 0, &heap)
                .should_search_segment(&candidate(SearchNodeType::MatchAll, false, false)),
            EarlyExitType::ContinueScan
        );
    }

    #[test]
    fn test_sort_boundary_admission() {
        let aggs = QueryAggregators::default().with_sort("timestamp", false);
        let heap = full_heap(aggs.sort.as_ref());
        let ctx = context(QueryType::RawRecord, Some(&aggs), 0, &heap);
        // Descending: the heap holds 4000 and 3000; a segment ending at 2000 cannot beat them.
        assert_eq!(
            ctx.should_search_segment(&candidate(SearchNodeType::MatchAll, false, false)),
            EarlyExitType::SkipEntirely
        );
        let mut later = candidate(SearchNodeType::MatchAll, false, false);
        later.time_range = TimeRange::new(1_000, 5_000);
        assert_eq!(
            ctx.should_search_segment(&later),
            EarlyExitType::ContinueScan
        );
        assert!(ctx.should_search_range(0, 5_000));
        assert!(!ctx.should_search_range(0, 2_000));
    }

    #[test]
    fn test_match_all_with_only_time_histogram_is_aggregates_only() {
        let heap = full_heap(None);
        let aggs = histogram_aggs();
        let ctx = context(QueryType::RawRecord, Some(&aggs), 0, &heap);
        assert_eq!(
            ctx.should_search_segment(&candidate(SearchNodeType::MatchAll, true, false)),
            EarlyExitType::AggregatesOnly
        );
        assert_eq!(
            ctx.should_search_segment(&candidate(SearchNodeType::Filtered, true, false)),
            EarlyExitType::ContinueScan
        );
    }

    #[test]
    fn test_spec_level_rules() {
        let heap = full_heap(None);
        let seg = candidate(SearchNodeType::MatchAll, false, false);

        assert_eq!(
            context(QueryType::RawRecord, None, 0, &heap).should_search_segment(&seg),
            EarlyExitType::SkipEntirely
        );

        let disabled = QueryAggregators::default().with_early_exit(false);
        assert_eq!(
            context(QueryType::RawRecord, Some(&disabled), 0, &heap).should_search_segment(&seg),
            EarlyExitType::ContinueScan
        );

        let histogram = histogram_aggs();
        assert_eq!(
            context(QueryType::RawRecord, Some(&histogram), 0, &heap).should_search_segment(&seg),
            EarlyExitType::ContinueScan
        );

        let plain = QueryAggregators::default();
        assert_eq!(
            context(QueryType::RawRecord, Some(&plain), 0, &heap).should_search_segment(&seg),
            EarlyExitType::SkipEntirely
        );
    }

    #[test]
    fn test_range_check_short_circuits() {
        let heap = full_heap(None);
        assert!(context(QueryType::GroupBy, None, 0, &heap).should_search_range(0, 1));
        assert!(context(QueryType::RawRecord, None, 0, &heap).should_search_range(0, 1));

        let disabled = QueryAggregators::default().with_early_exit(false);
        assert!(context(QueryType::RawRecord, Some(&disabled), 0, &heap).should_search_range(0, 1));

        let histogram = histogram_aggs();
        assert!(context(QueryType::RawRecord, Some(&histogram), 0, &heap).should_search_range(0, 1));

        let plain = QueryAggregators::default();
        assert!(!context(QueryType::RawRecord, Some(&plain), 0, &heap).should_search_range(0, 1));
    }
}
