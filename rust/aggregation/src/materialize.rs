use sift_types::{AggregationResult, BucketRow};
use std::collections::{BTreeMap, BTreeSet};

/// Flat rows produced from materialized buckets.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaterializedRows {
    pub rows: Vec<BucketRow>,
    /// Distinct measure names seen across the emitted rows, sorted.
    pub measure_functions: Vec<String>,
    pub added: usize,
}

/// Converts aggregation results into rows, stopping once `limit` rows were emitted.
///
/// Rows follow the aggregation name order and then each aggregation's bucket order.
pub fn bucket_rows(
    aggregations: &BTreeMap<String, AggregationResult>,
    limit: usize,
) -> MaterializedRows {
    let mut rows = Vec::new();
    let mut measure_functions = BTreeSet::new();

    'aggs: for aggregation in aggregations.values() {
        for bucket in &aggregation.results {
            if rows.len() >= limit {
                break 'aggs;
            }
            measure_functions.extend(bucket.stat_res.keys().cloned());
            rows.push(BucketRow {
                group_by_values: bucket.key.render(),
                measure_val: bucket.stat_res.clone(),
            });
        }
    }

    MaterializedRows {
        added: rows.len(),
        rows,
        measure_functions: measure_functions.into_iter().collect(),
    }
}
