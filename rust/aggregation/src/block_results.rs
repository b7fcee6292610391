use sift_types::{RecordResultContainer, SortSpec};
use std::{cmp::Ordering, collections::BinaryHeap, fmt::Debug};

/// Result of offering one record to a [`BoundedResultMerger`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddOutcome {
    pub added: bool,
    /// Id of the record pushed out to make room, if any.
    pub evicted_id: Option<String>,
}

/// Ranks matched records by sort key and keeps at most `size_limit` of them.
///
/// The aggregation core only relies on this contract; the ordering structure
/// behind it is up to the implementation.
pub trait BoundedResultMerger: Debug + Send {
    fn add(&mut self, record: RecordResultContainer) -> AddOutcome;

    /// Whether a record whose sort key is `value` would still be admitted.
    fn will_value_be_added(&self, value: f64) -> bool;

    /// Current contents, best ranked first.
    fn results(&self) -> Vec<RecordResultContainer>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Ranking {
    Ascending,
    Descending,
    /// No sort requested: the first `size_limit` arrivals win.
    Arrival,
}

/// Entry of the heap ordered by how bad it is: the heap top is the first to evict.
#[derive(Clone, Debug)]
struct RankedRecord {
    badness: f64,
    seq: u64,
    record: RecordResultContainer,
}

impl PartialEq for RankedRecord {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankedRecord {}

impl Ord for RankedRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        // Among equal keys the later arrival is the worse one.
        self.badness
            .total_cmp(&other.badness)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for RankedRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Default [`BoundedResultMerger`]: a max-heap on "badness" capped at `size_limit`.
#[derive(Clone, Debug)]
pub struct SortedRecordHeap {
    size_limit: usize,
    ranking: Ranking,
    next_seq: u64,
    max_heap: BinaryHeap<RankedRecord>,
}

impl SortedRecordHeap {
    pub fn new(size_limit: u64, sort: Option<&SortSpec>) -> Self {
        let ranking = match sort {
            Some(sort) if sort.ascending => Ranking::Ascending,
            Some(_) => Ranking::Descending,
            None => Ranking::Arrival,
        };
        let size_limit = usize::try_from(size_limit).unwrap_or(usize::MAX);
        Self {
            size_limit,
            ranking,
            next_seq: 0,
            max_heap: BinaryHeap::with_capacity(size_limit.min(1024)),
        }
    }

    fn badness(&self, value: f64) -> f64 {
        match self.ranking {
            Ranking::Ascending => value,
            Ranking::Descending => -value,
            Ranking::Arrival => 0.0,
        }
    }
}

impl BoundedResultMerger for SortedRecordHeap {
    fn add(&mut self, record: RecordResultContainer) -> AddOutcome {
        if self.size_limit == 0 {
            return AddOutcome::default();
        }
        let candidate = RankedRecord {
            badness: self.badness(record.sort_value),
            seq: self.next_seq,
            record,
        };
        self.next_seq += 1;

        if self.max_heap.len() < self.size_limit {
            self.max_heap.push(candidate);
            return AddOutcome {
                added: true,
                evicted_id: None,
            };
        }

        match self.max_heap.peek() {
            Some(worst) if candidate < *worst => {
                let evicted = self.max_heap.pop().map(|ranked| ranked.record.record_id);
                self.max_heap.push(candidate);
                AddOutcome {
                    added: true,
                    evicted_id: evicted,
                }
            }
            _ => AddOutcome::default(),
        }
    }

    fn will_value_be_added(&self, value: f64) -> bool {
        if self.max_heap.len() < self.size_limit {
            return true;
        }
        if self.ranking == Ranking::Arrival {
            return false;
        }
        match self.max_heap.peek() {
            Some(worst) => self.badness(value) < worst.badness,
            None => false,
        }
    }

    fn results(&self) -> Vec<RecordResultContainer> {
        self.max_heap
            .clone()
            .into_sorted_vec()
            .into_iter()
            .map(|ranked| ranked.record)
            .collect()
    }

    fn len(&self) -> usize {
        self.max_heap.len()
    }
}
