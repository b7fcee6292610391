use crate::{
    block_results::BoundedResultMerger, buckets::BucketMergeError, search_results::SearchResults,
};
use itertools::Itertools;
use sift_error::{ErrorCodes, SiftError};
use sift_types::{RawLog, RecordResultContainer, RemotePartial};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteMergeError {
    #[error("Remote partial carries {records} records but {raw_logs} raw logs")]
    RawLogCountMismatch { records: usize, raw_logs: usize },
    #[error("Failed to merge remote buckets: {0}")]
    Buckets(#[from] BucketMergeError),
}

impl SiftError for RemoteMergeError {
    fn code(&self) -> ErrorCodes {
        match self {
            RemoteMergeError::RawLogCountMismatch { .. } => ErrorCodes::InvalidArgument,
            RemoteMergeError::Buckets(e) => e.code(),
        }
    }
}

/// Raw payloads of remote records, looked up for presentation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RemoteSearchResult {
    pub remote_logs: Vec<RawLog>,
    /// Every column any peer reported, sorted.
    pub remote_columns: Vec<String>,
}

impl SearchResults {
    /// Folds a peer's partial result in under one critical section.
    ///
    /// Records, the early-exit flag, buckets and the count are applied in that order.
    /// A bucket failure is returned after the records and the flag were merged, and the
    /// peer's count is then left out.
    #[tracing::instrument(skip_all, fields(qid = self.qid(), records = partial.records.len()))]
    pub fn merge_remote(&self, partial: RemotePartial) -> Result<(), RemoteMergeError> {
        let RemotePartial {
            records,
            raw_logs,
            all_columns,
            buckets,
            remote_count,
            early_exit,
        } = partial;
        if records.len() != raw_logs.len() {
            return Err(RemoteMergeError::RawLogCountMismatch {
                records: records.len(),
                raw_logs: raw_logs.len(),
            });
        }

        let mut state = self.state.lock();
        state.remote_columns.extend(all_columns);

        for (mut record, raw_log) in records.into_iter().zip(raw_logs) {
            record.is_remote = true;
            let record_id = record.record_id.clone();
            let outcome = state.merger.add(record);
            if outcome.added {
                state.remote_logs.insert(record_id, raw_log);
            }
            state.evict_remote_log(outcome.evicted_id);
        }
        state.materialized = false;

        if early_exit && !state.early_exit {
            tracing::info!("Peer reached early exit");
            state.early_exit = true;
        }

        if !buckets.is_empty() {
            let group_by = self.aggs().and_then(|aggs| aggs.group_by.as_ref());
            state
                .running_buckets
                .merge(&buckets, group_by, self.config().max_list_values)
                .map_err(|err| {
                    tracing::error!(error = %err, "Failed to merge remote buckets");
                    err
                })?;
        }

        state.result_count += remote_count;
        Ok(())
    }

    /// Cached payloads of the remote records in `records` whose id starts with
    /// `remote_id`, in the order given.
    pub fn remote_info(
        &self,
        remote_id: &str,
        records: &[RecordResultContainer],
    ) -> RemoteSearchResult {
        let state = self.state.lock();
        let remote_logs = records
            .iter()
            .filter(|record| record.is_remote && record.record_id.starts_with(remote_id))
            .filter_map(|record| {
                let raw_log = state.remote_logs.get(&record.record_id);
                if raw_log.is_none() {
                    tracing::debug!(qid = self.qid(), record_id = %record.record_id, "No cached raw log for remote record");
                }
                raw_log.cloned()
            })
            .collect();
        let remote_columns = state.remote_columns.iter().cloned().sorted().collect();
        RemoteSearchResult {
            remote_logs,
            remote_columns,
        }
    }

    /// Number of raw payloads currently cached for remote records.
    pub fn cached_remote_logs(&self) -> usize {
        self.state.lock().remote_logs.len()
    }

    /// Whether a raw payload is cached for `record_id`.
    pub fn has_remote_log(&self, record_id: &str) -> bool {
        self.state.lock().remote_logs.contains_key(record_id)
    }
}
