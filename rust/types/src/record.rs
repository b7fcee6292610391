use serde::{Deserialize, Serialize};

/// Reference to one matched record: enough to rank it and to fetch its payload later.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordResultContainer {
    pub record_id: String,
    pub segment_key_enc: u16,
    pub block_num: u16,
    pub record_num: u16,
    /// Value of the sort column, or the timestamp when sorting by time.
    pub sort_value: f64,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub is_remote: bool,
}

impl RecordResultContainer {
    pub fn new(record_id: impl Into<String>, sort_value: f64) -> Self {
        Self {
            record_id: record_id.into(),
            segment_key_enc: 0,
            block_num: 0,
            record_num: 0,
            sort_value,
            timestamp_ms: 0,
            is_remote: false,
        }
    }

    pub fn remote(mut self) -> Self {
        self.is_remote = true;
        self
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }
}

/// Raw payload of a record contributed by a peer node.
pub type RawLog = serde_json::Map<String, serde_json::Value>;
