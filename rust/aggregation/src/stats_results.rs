use parking_lot::RwLock;
use sift_types::{merge_column_stats, ColumnStats};
use std::collections::HashMap;

/// Column statistics of one segment, merged from several blocks searched in parallel
/// before the segment is handed to [`crate::SearchResults`].
#[derive(Debug, Default)]
pub struct StatsResults {
    stats: RwLock<HashMap<String, ColumnStats>>,
}

impl StatsResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one block's statistics in. Records are never capped here: they are the
    /// rows eval measures are later evaluated over.
    pub fn merge_seg_stats(&self, block_stats: &HashMap<String, ColumnStats>) {
        let mut stats = self.stats.write();
        merge_column_stats(&mut stats, block_stats);
    }

    pub fn seg_stats(&self) -> HashMap<String, ColumnStats> {
        self.stats.read().clone()
    }
}
