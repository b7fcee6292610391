pub mod block_results;
pub mod buckets;
pub mod config;
pub mod early_exit;
pub mod eval;
pub mod format;
pub mod materialize;
pub mod remote;
pub mod running_stats;
pub mod search_results;
pub mod stats_results;

pub use block_results::{AddOutcome, BoundedResultMerger, SortedRecordHeap};
pub use buckets::{BucketMergeError, RunningBuckets};
pub use config::SearchResultsConfig;
pub use early_exit::EarlyExitType;
pub use materialize::MaterializedRows;
pub use remote::{RemoteMergeError, RemoteSearchResult};
pub use running_stats::{RunningStatistics, StatsMergeError};
pub use search_results::{
    FinalizeError, GroupByRows, QueryParams, SearchResults, SearchResultsError, SegmentStatsRows,
};
pub use stats_results::StatsResults;
