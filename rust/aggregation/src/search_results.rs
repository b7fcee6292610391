use crate::{
    block_results::{BoundedResultMerger, SortedRecordHeap},
    buckets::RunningBuckets,
    config::SearchResultsConfig,
    early_exit::{EarlyExitContext, EarlyExitType},
    format::humanize_measure,
    materialize::{bucket_rows, MaterializedRows},
    running_stats::{RunningStatistics, StatsMergeError},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sift_config::Configurable;
use sift_error::{ErrorCodes, SiftError};
use sift_types::{
    AggregationResult, AggregationSpecError, AllColumnStatsJson, BucketRow, ColumnStats, CountOp,
    MeasureAggregator, MeasureValue, NodeResult, QueryAggregators, QueryCount, QueryType, RawLog,
    RecordResultContainer, SegmentCandidate, SegmentPartial, WILDCARD_COLUMN,
};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};
use thiserror::Error;

/// Immutable parameters of one query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    pub qid: u64,
    pub size_limit: u64,
    pub query_type: QueryType,
    #[serde(default)]
    pub aggs: Option<QueryAggregators>,
}

#[derive(Debug, Error)]
pub enum SearchResultsError {
    #[error("Invalid aggregation spec: {0}")]
    InvalidSpec(#[from] AggregationSpecError),
    #[error("Segment key encodings exhausted after {0} segments")]
    SegmentEncodingExhausted(usize),
}

impl SiftError for SearchResultsError {
    fn code(&self) -> ErrorCodes {
        match self {
            SearchResultsError::InvalidSpec(e) => e.code(),
            SearchResultsError::SegmentEncodingExhausted(_) => ErrorCodes::OutOfRange,
        }
    }
}

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("Stats of query {qid} are already final")]
    AlreadyFinal { qid: u64 },
    #[error("Expected exactly one measure row for query {qid}, got {rows}")]
    UnexpectedMeasureRows { qid: u64, rows: usize },
    #[error("Measure {measure} is missing from the final row of query {qid}")]
    MissingMeasure { qid: u64, measure: String },
}

impl SiftError for FinalizeError {
    fn code(&self) -> ErrorCodes {
        match self {
            FinalizeError::AlreadyFinal { .. } => ErrorCodes::FailedPrecondition,
            FinalizeError::UnexpectedMeasureRows { .. } | FinalizeError::MissingMeasure { .. } => {
                ErrorCodes::InvalidArgument
            }
        }
    }
}

/// Group-by rows plus the metadata a presentation layer needs to lay them out.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupByRows {
    pub rows: Vec<BucketRow>,
    pub measure_functions: Vec<String>,
    pub group_by_columns: Vec<String>,
    pub columns_order: HashMap<String, usize>,
    pub added: usize,
}

/// Humanized single-row view of a statistics query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SegmentStatsRows {
    pub rows: Vec<BucketRow>,
    pub measure_functions: Vec<String>,
    pub group_by_cols: Vec<String>,
    pub measure_count: usize,
}

/// Everything mutable about a query. Only ever touched with the controller lock held.
#[derive(Debug)]
pub(crate) struct SearchResultsState {
    pub(crate) result_count: u64,
    pub(crate) early_exit: bool,
    pub(crate) stats_are_final: bool,
    pub(crate) merger: Box<dyn BoundedResultMerger>,
    /// Raw payloads of remote records currently in `merger`, by record id.
    pub(crate) remote_logs: HashMap<String, RawLog>,
    pub(crate) remote_columns: HashSet<String>,
    pub(crate) running_buckets: RunningBuckets,
    pub(crate) stats: Option<RunningStatistics>,
    pub(crate) converted_buckets: BTreeMap<String, AggregationResult>,
    /// Whether `converted_buckets` reflects the running buckets.
    pub(crate) materialized: bool,
    pending_stats: HashMap<u16, HashMap<String, ColumnStats>>,
    pub(crate) errors: Vec<Arc<dyn SiftError>>,
    seg_key_to_enc: HashMap<String, u16>,
    seg_enc_to_key: HashMap<u16, String>,
    next_seg_key_enc: Option<u16>,
    columns_order: HashMap<String, usize>,
}

impl SearchResultsState {
    pub(crate) fn push_error<E: SiftError + 'static>(&mut self, err: E) {
        self.errors.push(Arc::new(err));
    }

    /// Drops the cached raw payload of a record that left the top-K.
    pub(crate) fn evict_remote_log(&mut self, evicted_id: Option<String>) {
        if let Some(id) = evicted_id.filter(|id| !id.is_empty()) {
            self.remote_logs.remove(&id);
        }
    }

    fn load_buckets(&mut self, aggs: Option<&QueryAggregators>) {
        if self.stats_are_final || self.materialized {
            return;
        }
        self.converted_buckets = self.running_buckets.convert(aggs);
        self.materialized = true;
    }
}

/// Per-query aggregation controller.
///
/// Segment workers and remote-merge handlers call into it concurrently; every
/// operation runs as one short critical section on a single lock, so the result
/// count, top-K membership and raw-log cache always change together.
#[derive(Debug)]
pub struct SearchResults {
    qid: u64,
    query_type: QueryType,
    size_limit: u64,
    aggs: Option<QueryAggregators>,
    config: SearchResultsConfig,
    pub(crate) state: Mutex<SearchResultsState>,
}

impl SearchResults {
    pub fn new(params: QueryParams, config: SearchResultsConfig) -> Result<Self, SearchResultsError> {
        let merger = SortedRecordHeap::new(
            params.size_limit,
            params.aggs.as_ref().and_then(|aggs| aggs.sort.as_ref()),
        );
        Self::with_merger(params, config, Box::new(merger))
    }

    /// Builds the controller around a caller-provided top-K implementation.
    pub fn with_merger(
        params: QueryParams,
        config: SearchResultsConfig,
        merger: Box<dyn BoundedResultMerger>,
    ) -> Result<Self, SearchResultsError> {
        if let Some(aggs) = &params.aggs {
            aggs.validate()?;
        }
        let stats = match (params.query_type, &params.aggs) {
            (QueryType::SegmentStatistics, Some(aggs)) => {
                Some(RunningStatistics::new(&aggs.measure_operations))
            }
            _ => None,
        };
        let state = SearchResultsState {
            result_count: 0,
            early_exit: false,
            stats_are_final: false,
            merger,
            remote_logs: HashMap::new(),
            remote_columns: HashSet::new(),
            running_buckets: RunningBuckets::new(params.aggs.as_ref()),
            stats,
            converted_buckets: BTreeMap::new(),
            materialized: false,
            pending_stats: HashMap::new(),
            errors: Vec::new(),
            seg_key_to_enc: HashMap::new(),
            seg_enc_to_key: HashMap::new(),
            // 0 is never handed out.
            next_seg_key_enc: Some(1),
            columns_order: HashMap::new(),
        };
        tracing::debug!(qid = params.qid, query_type = ?params.query_type, size_limit = params.size_limit, "Initialized search results");
        Ok(Self {
            qid: params.qid,
            query_type: params.query_type,
            size_limit: params.size_limit,
            aggs: params.aggs,
            config,
            state: Mutex::new(state),
        })
    }

    pub fn qid(&self) -> u64 {
        self.qid
    }

    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    pub fn size_limit(&self) -> u64 {
        self.size_limit
    }

    pub fn aggs(&self) -> Option<&QueryAggregators> {
        self.aggs.as_ref()
    }

    pub fn config(&self) -> &SearchResultsConfig {
        &self.config
    }

    /// (Re)initializes the running statistics for `measure_ops`.
    pub fn init_segment_stats(&self, measure_ops: &[MeasureAggregator]) {
        let mut state = self.state.lock();
        state.stats = Some(RunningStatistics::new(measure_ops));
    }

    /// Folds one segment's matched records, count and bucket contributions in.
    pub fn add_block_results(&self, partial: &SegmentPartial) {
        let mut state = self.state.lock();
        for record in &partial.records {
            let outcome = state.merger.add(record.clone());
            state.evict_remote_log(outcome.evicted_id);
        }
        state.result_count += partial.matched_count;
        state.materialized = false;

        if partial.buckets.is_empty() {
            return;
        }
        let group_by = self.aggs.as_ref().and_then(|aggs| aggs.group_by.as_ref());
        let max_records = self.config.max_list_values;
        if let Err(err) = state
            .running_buckets
            .merge(&partial.buckets, group_by, max_records)
        {
            tracing::error!(qid = self.qid, error = %err, "Failed to merge segment buckets");
            state.push_error(err);
        }
    }

    /// Folds one segment's column statistics into the running statistics.
    ///
    /// Eval measures that cannot be evaluated are recorded in the error list and
    /// reported as [`StatsMergeError::MeasuresFailed`]; the remaining measures are
    /// merged regardless.
    #[tracing::instrument(skip_all, fields(qid = self.qid))]
    pub fn add_segment_statistics(
        &self,
        stats: &HashMap<String, ColumnStats>,
        measure_ops: &[MeasureAggregator],
    ) -> Result<(), StatsMergeError> {
        let mut state = self.state.lock();
        if state.stats_are_final {
            return Err(StatsMergeError::StatsAreFinal);
        }
        let running = state
            .stats
            .get_or_insert_with(|| RunningStatistics::new(measure_ops));
        let failures = running.update(stats, measure_ops, self.config.max_list_values)?;
        if failures.is_empty() {
            return Ok(());
        }
        let failed = failures
            .iter()
            .map(|(measure, _)| measure.clone())
            .collect();
        for (_, err) in failures {
            state.push_error(err);
        }
        Err(StatsMergeError::MeasuresFailed(failed))
    }

    /// Keeps a segment's column statistics until they are taken for transmission.
    pub fn add_pending_segment_stats(
        &self,
        segment_key_enc: u16,
        stats: HashMap<String, ColumnStats>,
    ) {
        self.state.lock().pending_stats.insert(segment_key_enc, stats);
    }

    /// Removes a segment's pending statistics and encodes them. Returns `None` when
    /// nothing is pending, including when they were already taken.
    pub fn take_encoded_segment_stats(
        &self,
        segment_key_enc: u16,
    ) -> Result<Option<Vec<u8>>, StatsMergeError> {
        let pending = self.state.lock().pending_stats.remove(&segment_key_enc);
        let Some(all_seg_stats) = pending else {
            return Ok(None);
        };
        let encoded = AllColumnStatsJson { all_seg_stats }.to_bytes().map_err(|err| {
            tracing::error!(qid = self.qid, segment_key_enc, error = %err, "Failed to encode segment stats");
            err
        })?;
        Ok(Some(encoded))
    }

    /// Decodes statistics produced by [`Self::take_encoded_segment_stats`] (possibly on
    /// another node) and merges them with this query's measure operations.
    pub fn merge_encoded_segment_stats(&self, bytes: &[u8]) -> Result<(), StatsMergeError> {
        let decoded = AllColumnStatsJson::from_bytes(bytes)?;
        let measure_ops = self
            .aggs
            .as_ref()
            .map(|aggs| aggs.measure_operations.as_slice())
            .unwrap_or_default();
        self.add_segment_statistics(&decoded.all_seg_stats, measure_ops)
    }

    pub fn add_error<E: SiftError + 'static>(&self, err: E) {
        self.state.lock().push_error(err);
    }

    /// Encoding of `segment_key`, allocating the next one on first sight.
    pub fn segment_encoding(&self, segment_key: &str) -> Result<u16, SearchResultsError> {
        let mut state = self.state.lock();
        if let Some(enc) = state.seg_key_to_enc.get(segment_key) {
            return Ok(*enc);
        }
        let Some(enc) = state.next_seg_key_enc else {
            return Err(SearchResultsError::SegmentEncodingExhausted(
                state.seg_key_to_enc.len(),
            ));
        };
        state.seg_key_to_enc.insert(segment_key.to_string(), enc);
        state.seg_enc_to_key.insert(enc, segment_key.to_string());
        // `None` once u16::MAX has been handed out.
        state.next_seg_key_enc = enc.checked_add(1);
        Ok(enc)
    }

    pub fn segment_key(&self, segment_key_enc: u16) -> Option<String> {
        self.state.lock().seg_enc_to_key.get(&segment_key_enc).cloned()
    }

    /// True while the top-K can still take more records.
    pub fn should_continue_raw_search(&self) -> bool {
        self.state.lock().result_count <= self.size_limit
    }

    fn with_early_exit_context<R>(&self, f: impl FnOnce(&EarlyExitContext<'_>) -> R) -> R {
        let state = self.state.lock();
        let ctx = EarlyExitContext {
            result_count: state.result_count,
            size_limit: self.size_limit,
            query_type: self.query_type,
            aggs: self.aggs.as_ref(),
            num_buckets: state.running_buckets.num_buckets(),
            merger: &*state.merger,
        };
        f(&ctx)
    }

    pub fn should_search_segment(&self, candidate: &SegmentCandidate) -> EarlyExitType {
        let decision = self.with_early_exit_context(|ctx| ctx.should_search_segment(candidate));
        tracing::trace!(qid = self.qid, %decision, "Early exit decision");
        decision
    }

    pub fn should_search_range(&self, low_ms: u64, high_ms: u64) -> bool {
        self.with_early_exit_context(|ctx| ctx.should_search_range(low_ms, high_ms))
    }

    /// Marks the record set as exhausted. There is no way back.
    pub fn set_early_exit(&self) {
        let mut state = self.state.lock();
        if !state.early_exit {
            tracing::info!(qid = self.qid, "Early exit reached");
            state.early_exit = true;
        }
    }

    pub fn early_exit(&self) -> bool {
        self.state.lock().early_exit
    }

    pub fn stats_are_final(&self) -> bool {
        self.state.lock().stats_are_final
    }

    /// Replaces the local results with the ones a coordinator computed across nodes.
    /// The node result is fully validated before anything is replaced.
    #[tracing::instrument(skip_all, fields(qid = self.qid))]
    pub fn finalize_from(&self, node_result: &NodeResult) -> Result<(), FinalizeError> {
        let mut state = self.state.lock();
        if state.stats_are_final {
            return Err(FinalizeError::AlreadyFinal { qid: self.qid });
        }

        if node_result.group_by_cols.is_empty() {
            let [row] = node_result.measure_results.as_slice() else {
                return Err(FinalizeError::UnexpectedMeasureRows {
                    qid: self.qid,
                    rows: node_result.measure_results.len(),
                });
            };
            let mut measure_results = HashMap::with_capacity(node_result.measure_functions.len());
            for measure in &node_result.measure_functions {
                let value = row.measure_val.get(measure).ok_or_else(|| {
                    FinalizeError::MissingMeasure {
                        qid: self.qid,
                        measure: measure.clone(),
                    }
                })?;
                let value = match value {
                    MeasureValue::Text(text) => MeasureValue::parse_lenient(text),
                    other => other.clone(),
                };
                measure_results.insert(measure.clone(), value);
            }
            state
                .stats
                .get_or_insert_with(|| RunningStatistics::new(&[]))
                .set_final(node_result.measure_functions.clone(), measure_results);
        } else {
            state.converted_buckets = node_result.histogram.clone();
        }

        state.columns_order = node_result.columns_order.clone();
        state.stats_are_final = true;
        tracing::info!("Stats are final");
        Ok(())
    }

    pub fn total_count(&self) -> u64 {
        self.state.lock().result_count
    }

    pub fn query_count(&self) -> QueryCount {
        let state = self.state.lock();
        QueryCount {
            total_count: state.result_count,
            early_exit_allowed: self.aggs.as_ref().map_or(true, |aggs| aggs.early_exit),
            op: if state.early_exit {
                CountOp::GreaterThanOrEqual
            } else {
                CountOp::Equals
            },
        }
    }

    pub fn errors(&self) -> Vec<Arc<dyn SiftError>> {
        self.state.lock().errors.clone()
    }

    /// Current top-K, best ranked first.
    pub fn results(&self) -> Vec<RecordResultContainer> {
        self.state.lock().merger.results()
    }

    pub fn running_buckets(&self) -> RunningBuckets {
        self.state.lock().running_buckets.clone()
    }

    pub fn num_buckets(&self) -> usize {
        self.state.lock().running_buckets.num_buckets()
    }

    /// Materialized buckets keyed by aggregation name. Recomputed after any change
    /// until the stats are final, then frozen.
    pub fn bucket_results(&self) -> BTreeMap<String, AggregationResult> {
        let mut state = self.state.lock();
        state.load_buckets(self.aggs.as_ref());
        state.converted_buckets.clone()
    }

    pub fn bucket_rows(&self, limit: usize) -> MaterializedRows {
        let mut state = self.state.lock();
        state.load_buckets(self.aggs.as_ref());
        bucket_rows(&state.converted_buckets, limit)
    }

    pub fn bucket_rows_default(&self) -> MaterializedRows {
        self.bucket_rows(self.config.default_bucket_limit)
    }

    pub fn group_by_buckets(&self, limit: usize) -> GroupByRows {
        let mut state = self.state.lock();
        state.load_buckets(self.aggs.as_ref());
        let MaterializedRows {
            rows,
            measure_functions,
            added,
        } = bucket_rows(&state.converted_buckets, limit);
        match self.aggs.as_ref().and_then(|aggs| aggs.group_by.as_ref()) {
            Some(request) => GroupByRows {
                rows,
                measure_functions,
                group_by_columns: request.group_by_columns.clone(),
                columns_order: state.columns_order.clone(),
                added,
            },
            None => GroupByRows {
                rows,
                measure_functions,
                added,
                ..Default::default()
            },
        }
    }

    pub fn running_segment_stats(&self) -> Vec<Option<ColumnStats>> {
        self.state
            .lock()
            .stats
            .as_ref()
            .map(|stats| stats.slots().to_vec())
            .unwrap_or_default()
    }

    pub fn segment_stats_measure_results(&self) -> HashMap<String, MeasureValue> {
        self.state
            .lock()
            .stats
            .as_ref()
            .map(|stats| stats.measure_results().clone())
            .unwrap_or_default()
    }

    /// Drops the segment's pending statistics and renders the running measures as
    /// one humanized row under the empty group-by key.
    pub fn segment_stats_rows(&self, segment_key_enc: u16) -> SegmentStatsRows {
        let mut state = self.state.lock();
        state.pending_stats.remove(&segment_key_enc);
        let Some(stats) = state.stats.as_ref() else {
            return SegmentStatsRows::default();
        };
        let measure_val = stats
            .measure_results()
            .iter()
            .map(|(name, value)| (name.clone(), MeasureValue::Text(humanize_measure(value))))
            .collect::<BTreeMap<_, _>>();
        SegmentStatsRows {
            measure_count: measure_val.len(),
            rows: vec![BucketRow {
                group_by_values: vec![WILDCARD_COLUMN.to_string()],
                measure_val,
            }],
            measure_functions: stats.measure_functions().to_vec(),
            group_by_cols: stats.group_by_cols().to_vec(),
        }
    }
}

impl Configurable<(SearchResultsConfig, QueryParams)> for SearchResults {
    fn try_from_config(
        (config, params): &(SearchResultsConfig, QueryParams),
    ) -> Result<Self, Box<dyn SiftError>> {
        SearchResults::new(params.clone(), config.clone()).map_err(|e| e.boxed())
    }
}
