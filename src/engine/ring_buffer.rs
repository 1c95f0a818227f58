//! Fixed-capacity history of recent calls

use std::collections::VecDeque;

use super::models::CallRecord;

pub const DEFAULT_CAPACITY: usize = 1000;

/// FIFO ring buffer of [`CallRecord`]s
///
/// Only the engine holds one; every rolling metric is a scan over it.
#[derive(Debug)]
pub struct CallBuffer {
    records: VecDeque<CallRecord>,
    capacity: usize,
}

impl CallBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record, evicting the oldest when full
    pub fn push(&mut self, record: CallRecord) -> Option<CallRecord> {
        let evicted = if self.records.len() >= self.capacity {
            self.records.pop_front()
        } else {
            None
        };
        self.records.push_back(record);
        evicted
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &CallRecord> + ExactSizeIterator {
        self.records.iter()
    }

    /// The newest `n` records, oldest first
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &CallRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl Default for CallBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::models::{BreakerState, CallReport};
    use chrono::Utc;

    fn record(seq: u64) -> CallRecord {
        CallRecord::new(
            seq,
            CallReport::new("caller", "m1", 10, 5),
            Utc::now(),
            BreakerState::Closed,
        )
    }

    #[test]
    fn test_push_evicts_oldest_when_full() {
        let mut buffer = CallBuffer::new(3);
        for seq in 1..=3 {
            assert!(buffer.push(record(seq)).is_none());
        }
        let evicted = buffer.push(record(4)).unwrap();
        assert_eq!(evicted.seq, 1);
        assert_eq!(buffer.len(), 3);
        let seqs: Vec<u64> = buffer.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[test]
    fn test_tail_returns_newest_in_order() {
        let mut buffer = CallBuffer::new(10);
        for seq in 1..=5 {
            buffer.push(record(seq));
        }
        let seqs: Vec<u64> = buffer.tail(2).map(|r| r.seq).collect();
        assert_eq!(seqs, vec![4, 5]);
        assert_eq!(buffer.tail(50).count(), 5);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut buffer = CallBuffer::new(0);
        buffer.push(record(1));
        buffer.push(record(2));
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.iter().next().unwrap().seq, 2);
    }

    #[test]
    fn test_clear() {
        let mut buffer = CallBuffer::default();
        buffer.push(record(1));
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
