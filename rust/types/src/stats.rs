use crate::{ExactSum, Number, ScalarValue};
use serde::{Deserialize, Serialize};
use sift_error::{ErrorCodes, SiftError};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Column name that stands for "any column" in `count(*)`.
pub const WILDCARD_COLUMN: &str = "*";

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub min: Number,
    pub max: Number,
    pub sum: ExactSum,
}

impl NumericStats {
    pub fn new(value: Number) -> Self {
        Self {
            min: value,
            max: value,
            sum: ExactSum::from(value),
        }
    }

    pub fn merge(&mut self, other: &NumericStats) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum.merge(&other.sum);
    }
}

/// Mergeable statistics of one column over some set of records.
///
/// Everything except `records` merges associatively and commutatively, so the
/// order in which segments arrive never changes a merged answer. `records` keeps
/// raw observed values for list and expression aggregates and is bounded by
/// whoever merges it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub is_numeric: bool,
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric: Option<NumericStats>,
    #[serde(default)]
    pub distinct: BTreeSet<String>,
    #[serde(default)]
    pub records: Vec<ScalarValue>,
}

impl ColumnStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds statistics from a sequence of observed values.
    pub fn from_values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ScalarValue>,
    {
        let mut stats = Self::new();
        for value in values {
            stats.observe(value.into());
        }
        stats
    }

    /// Folds one observed value in. Nulls are kept in `records` so that
    /// expressions stay row-aligned across columns, but they do not count.
    pub fn observe(&mut self, value: ScalarValue) {
        if !value.is_null() {
            self.count += 1;
            if let Some(number) = value.as_number() {
                self.is_numeric = true;
                match self.numeric.as_mut() {
                    Some(numeric) => numeric.merge(&NumericStats::new(number)),
                    None => self.numeric = Some(NumericStats::new(number)),
                }
            }
            self.distinct.insert(value.to_string());
        }
        self.records.push(value);
    }

    /// Merges `other` into `self`, keeping every record. Used to assemble one
    /// segment's statistics, whose records expressions are evaluated over.
    pub fn merge(&mut self, other: &ColumnStats) {
        self.merge_summary(other);
        self.records.extend(other.records.iter().cloned());
    }

    /// Merges `other` into running statistics. `records` only feeds `list(...)` here,
    /// so it is appended up to `max_records` entries.
    pub fn merge_capped(&mut self, other: &ColumnStats, max_records: usize) {
        self.merge_summary(other);
        let room = max_records.saturating_sub(self.records.len());
        self.records
            .extend(other.records.iter().take(room).cloned());
    }

    fn merge_summary(&mut self, other: &ColumnStats) {
        self.is_numeric |= other.is_numeric;
        self.count += other.count;
        match (self.numeric.as_mut(), other.numeric.as_ref()) {
            (Some(mine), Some(theirs)) => mine.merge(theirs),
            (None, Some(theirs)) => self.numeric = Some(*theirs),
            _ => {}
        }
        self.distinct.extend(other.distinct.iter().cloned());
    }

    pub fn min(&self) -> Option<Number> {
        self.numeric.map(|n| n.min)
    }

    pub fn max(&self) -> Option<Number> {
        self.numeric.map(|n| n.max)
    }

    pub fn sum(&self) -> Option<Number> {
        self.numeric.map(|n| n.sum.value())
    }

    pub fn cardinality(&self) -> u64 {
        self.distinct.len() as u64
    }
}

/// Merges every column of `incoming` into `running`, adding columns `running` has not
/// seen. Every record is kept.
pub fn merge_column_stats(
    running: &mut HashMap<String, ColumnStats>,
    incoming: &HashMap<String, ColumnStats>,
) {
    for (column, stats) in incoming {
        running
            .entry(column.clone())
            .and_modify(|existing| existing.merge(stats))
            .or_insert_with(|| stats.clone());
    }
}

/// Like [`merge_column_stats`], for running state whose records are capped at `max_records`.
pub fn merge_column_stats_capped(
    running: &mut HashMap<String, ColumnStats>,
    incoming: &HashMap<String, ColumnStats>,
    max_records: usize,
) {
    for (column, stats) in incoming {
        running
            .entry(column.clone())
            .or_default()
            .merge_capped(stats, max_records);
    }
}

/// Wire form of one segment's statistics: one entry per column.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AllColumnStatsJson {
    pub all_seg_stats: HashMap<String, ColumnStats>,
}

#[derive(Debug, Error)]
pub enum StatsCodecError {
    #[error("Failed to encode column statistics: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Failed to decode column statistics: {0}")]
    Decode(#[source] serde_json::Error),
}

impl SiftError for StatsCodecError {
    fn code(&self) -> ErrorCodes {
        match self {
            StatsCodecError::Encode(_) => ErrorCodes::Internal,
            StatsCodecError::Decode(_) => ErrorCodes::DataLoss,
        }
    }
}

impl AllColumnStatsJson {
    pub fn to_bytes(&self) -> Result<Vec<u8>, StatsCodecError> {
        serde_json::to_vec(self).map_err(StatsCodecError::Encode)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StatsCodecError> {
        serde_json::from_slice(bytes).map_err(StatsCodecError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_tracks_numeric_and_distinct() {
        let stats = ColumnStats::from_values([5i64, 1, 5, 3]);
        assert!(stats.is_numeric);
        assert_eq!(stats.count, 4);
        assert_eq!(stats.min(), Some(Number::Signed(1)));
        assert_eq!(stats.max(), Some(Number::Signed(5)));
        assert_eq!(stats.sum(), Some(Number::Signed(14)));
        assert_eq!(stats.cardinality(), 3);
        assert_eq!(stats.records.len(), 4);
    }

    #[test]
    fn test_nulls_do_not_count() {
        let stats = ColumnStats::from_values([ScalarValue::Null, ScalarValue::from("a")]);
        assert_eq!(stats.count, 1);
        assert_eq!(stats.records.len(), 2);
        assert!(!stats.is_numeric);
    }

    #[test]
    fn test_merge_caps_records() {
        let mut left = ColumnStats::from_values(["a", "b"]);
        let right = ColumnStats::from_values(["c", "d", "e"]);
        let mut capped = left.clone();
        capped.merge_capped(&right, 3);
        assert_eq!(capped.count, 5);
        assert_eq!(capped.records.len(), 3);
        assert_eq!(capped.cardinality(), 5);

        left.merge(&right);
        assert_eq!(left.records.len(), 5);
    }

    #[test]
    fn test_merge_into_non_numeric() {
        let mut left = ColumnStats::from_values(["GET"]);
        let right = ColumnStats::from_values([2.5f64]);
        left.merge(&right);
        assert!(left.is_numeric);
        assert_eq!(left.min(), Some(Number::Float(2.5)));
    }

    #[test]
    fn test_encoded_stats_stay_mergeable() {
        let mut all = AllColumnStatsJson::default();
        all.all_seg_stats
            .insert("latency".to_string(), ColumnStats::from_values([10i64, 20]));
        let bytes = all.to_bytes().expect("encode should succeed");
        let decoded = AllColumnStatsJson::from_bytes(&bytes).expect("decode should succeed");
        assert_eq!(decoded, all);

        let mut running = HashMap::new();
        merge_column_stats(&mut running, &decoded.all_seg_stats);
        merge_column_stats(&mut running, &decoded.all_seg_stats);
        assert_eq!(running["latency"].sum(), Some(Number::Signed(60)));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = AllColumnStatsJson::from_bytes(b"{not json").unwrap_err();
        assert_eq!(err.code(), ErrorCodes::DataLoss);
    }

    proptest::proptest! {
        #[test]
        fn test_merge_is_commutative_apart_from_records(
            left in proptest::collection::vec(-1_000i64..1_000, 0..20),
            right in proptest::collection::vec(-1_000i64..1_000, 0..20),
        ) {
            let (a, b) = (ColumnStats::from_values(left), ColumnStats::from_values(right));
            let mut ab = a.clone();
            ab.merge(&b);
            let mut ba = b.clone();
            ba.merge(&a);
            proptest::prop_assert_eq!(ab.count, ba.count);
            proptest::prop_assert_eq!(ab.numeric, ba.numeric);
            proptest::prop_assert_eq!(ab.distinct, ba.distinct);
            proptest::prop_assert_eq!(ab.is_numeric, ba.is_numeric);
        }
    }

    #[test]
    fn test_capped_merge_into_new_column() {
        let mut running = HashMap::new();
        let incoming = HashMap::from([(
            "x".to_string(),
            ColumnStats::from_values([1i64, 2, 3, 4]),
        )]);
        merge_column_stats_capped(&mut running, &incoming, 2);
        assert_eq!(running["x"].records.len(), 2);
        assert_eq!(running["x"].count, 4);

        let mut uncapped = HashMap::new();
        merge_column_stats(&mut uncapped, &incoming);
        merge_column_stats(&mut uncapped, &incoming);
        assert_eq!(uncapped["x"].records.len(), 8);
    }
}
